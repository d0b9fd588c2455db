//! A single-threaded, cooperative async runtime built directly on Linux
//! `io_uring`.
//!
//! Every kernel op — file I/O, socket setup, accept, connect, send,
//! recv, sleep, cancel — goes through one submission/completion ring
//! per [`run`] call. Tasks are ordinary `async fn`s; the handful of
//! suspension points ([`checkpoint`], [`sleep`], I/O, [`wait_on`], the
//! primitives in [`sync`]) all check for cancellation before and after
//! parking, so a cancelled [`CancelScope`] unwinds at the very next
//! await point rather than needing to be polled for.
//!
//! ```rust,no_run
//! use ringrt::{run, sleep};
//!
//! fn main() -> ringrt::Result<()> {
//!     run(async {
//!         sleep(0.01).await?;
//!         Ok(())
//!     })
//! }
//! ```

#![deny(warnings)]

pub mod buffer;
pub mod config;
pub mod context;
pub mod deadline;
pub mod error;
pub mod fs;
pub mod ids;
pub mod io_future;
pub mod join;
pub mod op;
pub mod ring;
pub mod scheduler;
pub mod streams;
pub mod sync;
pub mod task;
pub mod worker;

// Re-export the runtime's public surface.
pub use deadline::{fail_after, move_on_after};
pub use error::{Error, Result};
pub use fs::{open_file, File};
pub use ids::{OperationId, TaskId};
pub use io_future::{checkpoint, sleep};
pub use join::JoinHandle;
pub use scheduler::run;
pub use streams::{
    connect, create_memory_object_stream, create_server, default_client_config,
    load_server_config, BufferedByteReceiveStream, BufferedByteStream, ByteReceiveSource,
    ByteSendSource, Connection, MemoryReceiver, MemorySender, Server, TlsStream,
};
pub use sync::{Condition, Event, Lock, Semaphore};
pub use task::{gather, gather2, spawn, wait_on, CancelScope, CancelScopeGuard, TaskGroup};
