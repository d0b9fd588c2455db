//! The error taxonomy shared across the whole runtime.

use thiserror::Error;

use crate::ids::TaskId;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure a suspending primitive or public entry point can produce.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A kernel op completed with a negative result not tolerated by the
    /// op's own policy (see `Operation::is_success`).
    #[error("os error {errno}: {message}")]
    Os { errno: i32, message: String },

    /// Raised at a suspension point when the task's containing cancel
    /// scope was cancelled, or its in-flight kernel op completed ECANCELED.
    #[error("task {0} was cancelled")]
    Cancelled(TaskId),

    /// Receive-side: buffer empty and all send halves/the peer are closed.
    #[error("end of stream")]
    EndOfStream,

    /// The stream itself was already closed by this side.
    #[error("resource already closed")]
    ClosedResource,

    /// The peer/opposite end of the stream is gone.
    #[error("resource is broken: peer closed")]
    BrokenResource,

    /// `receive_until` exhausted `max_bytes` without finding the delimiter.
    #[error("delimiter not found within {0} bytes")]
    DelimiterNotFound(usize),

    /// Fatal: every task is blocked on another task or parked, with no
    /// kernel op in flight to ever wake anything up.
    #[error("deadlock: every task is waiting with nothing in flight")]
    Deadlock,

    /// A `TaskGroup` collected more than one child failure.
    #[error("task group raised {} error(s)", .0.len())]
    Aggregate(Vec<Error>),

    /// A programmer error: releasing a lock you don't own, releasing an
    /// empty semaphore, reading the result of a task that isn't Done,
    /// running a primitive with no loop on this thread.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// TLS handshake or record-layer failure.
    #[error("tls error: {0}")]
    Tls(String),
}

impl Error {
    pub fn os(errno: i32) -> Self {
        let message = nix::errno::Errno::from_raw(errno).to_string();
        Error::Os { errno, message }
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Error::Runtime(msg.into())
    }

    /// `true` for `Cancelled` raised as a direct, expected consequence of a
    /// scope this error's task belongs to cancelling itself — used by
    /// `TaskGroup` to decide whether to add an error to its aggregate.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}
