//! Cancel scopes, task groups, and the standalone task-spawning surface.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::context;
use crate::error::{Error, Result};
use crate::ids::TaskId;
use crate::join::{box_result, JoinHandle};

/// A lexical region whose cancellation reaches every task registered to
/// it at that task's next suspension point. Stacked per task; the
/// innermost scope on a task's stack is that task's "current" scope.
#[derive(Clone)]
pub struct CancelScope(Rc<CancelScopeInner>);

struct CancelScopeInner {
    shielded: bool,
    cancelled: Cell<bool>,
    members: RefCell<HashSet<TaskId>>,
}

impl CancelScope {
    pub fn new(shielded: bool) -> Self {
        Self(Rc::new(CancelScopeInner {
            shielded,
            cancelled: Cell::new(false),
            members: RefCell::new(HashSet::new()),
        }))
    }

    /// Pushes this scope onto the current task's stack. The returned guard
    /// pops it back off on drop — the RAII equivalent of the `finally`
    /// block that unwinds a `with CancelScope():` block in the original.
    pub fn enter(&self) -> CancelScopeGuard {
        context::push_scope(self.clone());
        CancelScopeGuard { _private: () }
    }

    /// Marks the scope cancelled and queues delivery to every member task.
    /// Idempotent.
    pub fn cancel(&self) {
        if self.0.cancelled.replace(true) {
            return;
        }
        let reactor = context::reactor();
        for tid in self.0.members.borrow().iter().copied() {
            reactor.enqueue_cancel(tid);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.get()
    }

    pub(crate) fn is_shielded(&self) -> bool {
        self.0.shielded
    }

    pub(crate) fn add_member(&self, task: TaskId) {
        self.0.members.borrow_mut().insert(task);
    }

    pub(crate) fn remove_member(&self, task: TaskId) {
        self.0.members.borrow_mut().remove(&task);
    }

    /// Used by `move_on_after` to tell whether the scope that fired a
    /// `Cancelled` is this scope specifically (see SPEC_FULL.md §C, the
    /// "only our own scope" resolution).
    pub(crate) fn same_scope(&self, other: &CancelScope) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// RAII guard returned by [`CancelScope::enter`]. Dropping it pops the
/// scope off the current task's stack.
pub struct CancelScopeGuard {
    _private: (),
}

impl Drop for CancelScopeGuard {
    fn drop(&mut self) {
        context::pop_scope();
    }
}

/// Spawns a standalone task not owned by any [`TaskGroup`], inheriting the
/// calling task's current cancel-scope stack.
pub fn spawn<F, T>(coro: F) -> JoinHandle<T>
where
    F: Future<Output = Result<T>> + 'static,
    T: 'static,
{
    let reactor = context::reactor();
    let scopes = context::current_scope_stack_or(Vec::new());
    let wrapped = async move { box_result(coro.await) };
    reactor.spawn_task(Box::pin(wrapped), scopes)
}

/// A Trio-style nursery: owns a set of concurrently running child tasks
/// and aggregates their failures.
pub struct TaskGroup {
    scope: CancelScope,
    children: RefCell<Vec<JoinHandle<()>>>,
    errors: Rc<RefCell<Vec<Error>>>,
}

impl TaskGroup {
    /// Pushes a fresh scope that all children (and the group itself) will
    /// share.
    pub fn enter() -> TaskGroup {
        TaskGroup {
            scope: CancelScope::new(false),
            children: RefCell::new(Vec::new()),
            errors: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Spawns a child carrying the parent's scope stack plus the group's
    /// own scope. Any error the child raises cancels the group (`Cancelled`
    /// itself is not recorded as a group error — it's an expected
    /// consequence, not a new failure).
    pub fn create_task<F>(&self, coro: F)
    where
        F: Future<Output = Result<()>> + 'static,
    {
        let reactor = context::reactor();
        let mut scopes = context::current_scope_stack_or(Vec::new());
        scopes.push(self.scope.clone());

        let scope_for_error = self.scope.clone();
        let errors = self.errors.clone();
        let wrapped = async move {
            let result = coro.await;
            if let Err(e) = &result {
                if !e.is_cancelled() {
                    errors.borrow_mut().push(e.clone());
                }
                scope_for_error.cancel();
            }
            box_result(result)
        };
        // `spawn_task` registers the new task as a member of every scope
        // in `scopes`, including the one just pushed above, so `cancel()`
        // reaches it without any bookkeeping here.
        let handle = reactor.spawn_task(Box::pin(wrapped), scopes);
        self.children.borrow_mut().push(handle);
    }

    /// If any child isn't done yet, cancels the group's scope; then waits
    /// for every child; then, if any non-cancellation errors were
    /// collected, raises them as an aggregate.
    pub async fn exit(self) -> Result<()> {
        let any_unfinished = self.children.borrow().iter().any(|h| !h.is_done());
        if any_unfinished {
            self.scope.cancel();
        }
        WaitAllDone {
            children: &self.children,
        }
        .await;

        let errors = Rc::try_unwrap(self.errors)
            .map(RefCell::into_inner)
            .unwrap_or_else(|rc| rc.borrow().clone());
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.into_iter().next().unwrap()),
            _ => Err(Error::Aggregate(errors)),
        }
    }
}

struct WaitAllDone<'a> {
    children: &'a RefCell<Vec<JoinHandle<()>>>,
}

impl Future for WaitAllDone<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut all_done = true;
        for child in self.children.borrow().iter() {
            if !child.poll_done(cx) {
                all_done = false;
            }
        }
        if all_done {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Yields a single `WaitsOn(unfinished_ids)` per iteration (i.e. re-checks
/// on every wakeup) until every given task is done.
pub async fn wait_on<T>(tasks: &[JoinHandle<T>]) {
    WaitOn { tasks }.await
}

struct WaitOn<'a, T> {
    tasks: &'a [JoinHandle<T>],
}

impl<T> Future for WaitOn<'_, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut all_done = true;
        for t in self.tasks {
            if !t.poll_done(cx) {
                all_done = false;
            }
        }
        if all_done {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Waits for every task to finish, then returns their results in argument
/// order. If any task failed, the first failure (in argument order) is
/// returned once every task has finished — siblings are never orphaned.
pub async fn gather<T: 'static>(tasks: Vec<JoinHandle<T>>) -> Result<Vec<T>> {
    wait_on(&tasks).await;
    let mut out = Vec::with_capacity(tasks.len());
    let mut first_error = None;
    for t in tasks {
        match t.await {
            Ok(v) => out.push(v),
            Err(e) if first_error.is_none() => first_error = Some(e),
            Err(_) => {}
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

/// Two-element heterogeneous gather, covering the common case Rust's type
/// system can't express as a variadic over [`gather`].
pub async fn gather2<A: 'static, B: 'static>(
    a: JoinHandle<A>,
    b: JoinHandle<B>,
) -> Result<(A, B)> {
    struct Both<'a, A, B> {
        a: &'a JoinHandle<A>,
        b: &'a JoinHandle<B>,
    }
    impl<A, B> Future for Both<'_, A, B> {
        type Output = ();
        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            let a_done = self.a.poll_done(cx);
            let b_done = self.b.poll_done(cx);
            if a_done && b_done {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        }
    }
    Both { a: &a, b: &b }.await;
    let ra = a.await;
    let rb = b.await;
    Ok((ra?, rb?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent_without_a_loop() {
        // With no members, cancel() never reaches the reactor, so this is
        // safe to call outside of `run()`.
        let scope = CancelScope::new(false);
        scope.cancel();
        scope.cancel();
        assert!(scope.is_cancelled());
    }

    #[test]
    fn shielded_scope_reports_itself() {
        let scope = CancelScope::new(true);
        assert!(scope.is_shielded());
    }

    #[test]
    fn same_scope_identifies_by_identity_not_value() {
        let a = CancelScope::new(false);
        let b = CancelScope::new(false);
        assert!(a.same_scope(&a.clone()));
        assert!(!a.same_scope(&b));
    }
}
