//! Thread-local context a running task's future uses to reach its loop.
//!
//! The loop is an explicit value (`Loop`, see `scheduler.rs`) — it is never
//! itself stored in a thread-local. What lives here is the minimal slice a
//! primitive needs while a task's future is being polled: which task this
//! is, its cancel-scope stack, and a handle back to the loop's shared
//! queues. It is pushed immediately before `poll()` and popped immediately
//! after, so its lifetime never outlives a single poll call — see
//! SPEC_FULL.md §C.3.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::ids::TaskId;
use crate::task::CancelScope;

thread_local! {
    static CURRENT: RefCell<Option<TaskContext>> = RefCell::new(None);
}

/// Shared handle to the loop's reactor, reachable from any suspension
/// future while a task is being polled.
pub type ReactorHandle = Rc<crate::scheduler::Reactor>;

#[derive(Clone)]
struct TaskContext {
    task_id: TaskId,
    scopes: Vec<CancelScope>,
    reactor: ReactorHandle,
}

/// Runs `f` with `task_id`/`scopes` installed as the current task context,
/// returning the (possibly mutated) scope stack alongside `f`'s result.
pub fn enter<R>(
    task_id: TaskId,
    scopes: Vec<CancelScope>,
    reactor: ReactorHandle,
    f: impl FnOnce() -> R,
) -> (R, Vec<CancelScope>) {
    let ctx = TaskContext {
        task_id,
        scopes,
        reactor,
    };
    let previous = CURRENT.with(|c| c.borrow_mut().replace(ctx));
    let result = f();
    let restored = CURRENT.with(|c| c.borrow_mut().take()).expect("context vanished");
    if let Some(previous) = previous {
        CURRENT.with(|c| *c.borrow_mut() = Some(previous));
    }
    (result, restored.scopes)
}

/// The id of the task currently being polled.
///
/// # Panics
/// Panics if called outside of `run()` — mirrors the original's
/// `RuntimeError("no running loop")`, surfaced here as a panic since this
/// indicates a programmer error (using a primitive outside the runtime),
/// not a recoverable condition.
pub fn current_task() -> TaskId {
    try_current_task().unwrap_or_else(|| panic!("runtime primitive used outside of run()"))
}

pub fn try_current_task() -> Option<TaskId> {
    CURRENT.with(|c| c.borrow().as_ref().map(|ctx| ctx.task_id))
}

pub fn reactor() -> ReactorHandle {
    CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .unwrap_or_else(|| panic!("runtime primitive used outside of run()"))
            .reactor
            .clone()
    })
}

/// The innermost (current) cancel scope for the task being polled, if any.
pub fn innermost_scope() -> Option<CancelScope> {
    CURRENT.with(|c| c.borrow().as_ref().and_then(|ctx| ctx.scopes.last().cloned()))
}

/// A clone of the current task's whole scope stack, or `fallback` if
/// called outside of `run()` (used when spawning top-level tasks from
/// `run()`'s own setup, before any task context exists).
pub fn current_scope_stack_or(fallback: Vec<CancelScope>) -> Vec<CancelScope> {
    CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .map(|ctx| ctx.scopes.clone())
            .unwrap_or(fallback)
    })
}

pub fn push_scope(scope: CancelScope) {
    CURRENT.with(|c| {
        let mut c = c.borrow_mut();
        let ctx = c.as_mut().expect("push_scope outside of run()");
        scope.add_member(ctx.task_id);
        ctx.scopes.push(scope);
    });
}

pub fn pop_scope() {
    CURRENT.with(|c| {
        let mut c = c.borrow_mut();
        let ctx = c.as_mut().expect("pop_scope outside of run()");
        if let Some(scope) = ctx.scopes.pop() {
            scope.remove_member(ctx.task_id);
        }
    });
}

/// Returns `Err(Error::Cancelled(..))` if, walking outward from the
/// innermost scope, a cancelled scope is reached before any shielded one.
pub fn check_scope_cancellation() -> Result<()> {
    let task_id = current_task();
    CURRENT.with(|c| {
        let c = c.borrow();
        let ctx = c.as_ref().unwrap();
        for scope in ctx.scopes.iter().rev() {
            if scope.is_shielded() {
                return Ok(());
            }
            if scope.is_cancelled() {
                return Err(Error::Cancelled(task_id));
            }
        }
        Ok(())
    })
}
