//! The suspension futures every other primitive in this crate is built
//! from: one kernel op in flight, and a bare checkpoint with no op at all.
//! `WaitsOn`/`Park` are built on these same pieces in `task.rs`/`sync.rs`
//! via ordinary Rust futures, not separate primitives of their own — see
//! SPEC_FULL.md §9.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::context;
use crate::error::{Error, Result};
use crate::ids::OperationId;
use crate::op::{Completion, Operation};
use crate::scheduler::SubmitOutcome;

enum State {
    NotSubmitted(Option<Operation>),
    Submitted(OperationId),
    CancelRequested(OperationId),
}

/// Awaits a single kernel operation's completion. Every fs/socket call in
/// this crate bottoms out in one of these.
///
/// Once the op is in flight, cancellation of the task's scope does not
/// fabricate a result out of thin air: it registers a kernel `Cancel`
/// targeting the op (see SPEC_FULL.md §4.4 step 1 / spec.md §4.4) and keeps
/// waiting for the real completion, which then arrives either as `ECANCELED`
/// (translated to `Cancelled`) or — if the cancel lost the race — as the
/// op's ordinary result. Either way the op is never left dangling in the
/// worker's pending table.
pub struct IoOpFuture {
    state: State,
}

impl IoOpFuture {
    pub fn new(op: Operation) -> Self {
        Self {
            state: State::NotSubmitted(Some(op)),
        }
    }
}

impl Future for IoOpFuture {
    type Output = Result<Completion>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let task_id = context::current_task();
        loop {
            match &self.state {
                State::NotSubmitted(_) => {
                    // No kernel op in flight yet — a cancelled scope can be
                    // reported directly, nothing to tell the ring about.
                    if let Err(e) = context::check_scope_cancellation() {
                        return Poll::Ready(Err(e));
                    }
                    let op = match &mut self.state {
                        State::NotSubmitted(op) => op.take().expect("polled after completion"),
                        _ => unreachable!(),
                    };
                    return match context::reactor().submit_op(op, task_id) {
                        SubmitOutcome::Pending(id) => {
                            self.state = State::Submitted(id);
                            Poll::Pending
                        }
                        SubmitOutcome::Ready(result) => {
                            Poll::Ready(translate_cancel(result, task_id))
                        }
                    };
                }
                State::Submitted(id) => {
                    let id = *id;
                    if let Some(result) = context::reactor().take_op_result(id) {
                        return Poll::Ready(translate_cancel(result, task_id));
                    }
                    if context::check_scope_cancellation().is_err() {
                        context::reactor().request_cancel(id);
                        self.state = State::CancelRequested(id);
                        continue;
                    }
                    return Poll::Pending;
                }
                State::CancelRequested(id) => {
                    let id = *id;
                    return match context::reactor().take_op_result(id) {
                        Some(result) => Poll::Ready(translate_cancel(result, task_id)),
                        None => Poll::Pending,
                    };
                }
            }
        }
    }
}

fn translate_cancel(result: Result<Completion>, task_id: crate::ids::TaskId) -> Result<Completion> {
    match result {
        Err(Error::Os { errno, .. }) if errno == libc::ECANCELED => {
            Err(Error::Cancelled(task_id))
        }
        other => other,
    }
}

/// A suspension point with no kernel op of its own: checks cancellation,
/// then yields control back to the ready queue exactly once before
/// resuming. Every other task gets a turn before this one continues.
pub struct CheckpointFuture {
    yielded: bool,
}

impl CheckpointFuture {
    pub fn new() -> Self {
        Self { yielded: false }
    }
}

impl Default for CheckpointFuture {
    fn default() -> Self {
        Self::new()
    }
}

impl Future for CheckpointFuture {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Err(e) = context::check_scope_cancellation() {
            return Poll::Ready(Err(e));
        }
        if self.yielded {
            return Poll::Ready(Ok(()));
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Yields once, letting every other ready task run before this one
/// resumes; checks this task's own cancellation on the way back in.
pub async fn checkpoint() -> Result<()> {
    CheckpointFuture::new().await
}

/// Suspends for `seconds`. Zero collapses to a bare [`checkpoint`] rather
/// than a real kernel timeout (see SPEC_FULL.md §4.6) — there's nothing for
/// the ring to wait on, and a zero-length `Timeout` op would just be a
/// checkpoint with extra steps.
pub async fn sleep(seconds: f64) -> Result<()> {
    if seconds <= 0.0 {
        return checkpoint().await;
    }
    match IoOpFuture::new(Operation::sleep(seconds)).await? {
        Completion::Slept => Ok(()),
        other => unreachable!("sleep produced {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_sleep_is_a_checkpoint() {
        // Can't drive this without a loop; just check it builds the right
        // future type without panicking at construction time.
        let _ = sleep(0.0);
    }
}
