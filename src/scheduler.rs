//! The reactor: the task table, the ready queue, and the top-level run
//! loop that drives everything else.
//!
//! The original's tick is seven named phases (run ready tasks, process
//! timers, poll I/O, process cancellations, ...). Here every one of those
//! transitions collapses into "push a `TaskId` onto `ready`" — a timer
//! firing, an I/O op completing, and a cancel scope tripping all reduce to
//! the same waker call. The loop below only has two things left to do:
//! drain `ready` until it's empty, then block on the kernel ring for the
//! next external event. See SPEC_FULL.md §C.1.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use crossbeam_queue::SegQueue;
use tracing::{debug, trace};

use crate::config::RING_DEPTH;
use crate::context;
use crate::error::{Error, Result};
use crate::ids::{IdCounter, OperationId, TaskId};
use crate::join::{AnyResult, JoinHandle, TaskCompletion};
use crate::op::{Completion, Operation};
use crate::task::CancelScope;
use crate::worker::{IoWorker, RegisterOutcome};

pub(crate) type BoxedTaskFuture = Pin<Box<dyn Future<Output = AnyResult>>>;

struct TaskSlot {
    future: BoxedTaskFuture,
    scopes: Vec<CancelScope>,
    completion: TaskCompletion,
}

/// What [`Reactor::submit_op`] hands back to a suspension future: either
/// the op is now in flight and will show up later via
/// [`Reactor::take_op_result`], or it already has its answer.
pub(crate) enum SubmitOutcome {
    Pending(OperationId),
    Ready(Result<Completion>),
}

/// Owns one OS thread's worth of runtime state. Reachable from any
/// suspension future, while its task is being polled, via
/// [`context::reactor`].
pub struct Reactor {
    io: std::cell::RefCell<IoWorker>,
    ids: IdCounter,
    tasks: std::cell::RefCell<HashMap<TaskId, TaskSlot>>,
    ready: Rc<SegQueue<TaskId>>,
    waiters: std::cell::RefCell<HashMap<OperationId, TaskId>>,
    op_results: std::cell::RefCell<HashMap<OperationId, Result<Completion>>>,
    unwaited: std::cell::RefCell<std::collections::HashSet<OperationId>>,
}

impl Reactor {
    fn new() -> Result<Rc<Self>> {
        Ok(Rc::new(Self {
            io: std::cell::RefCell::new(IoWorker::new(RING_DEPTH)?),
            ids: IdCounter::new(),
            tasks: std::cell::RefCell::new(HashMap::with_capacity(
                crate::config::INITIAL_TASK_CAPACITY,
            )),
            ready: Rc::new(SegQueue::new()),
            waiters: std::cell::RefCell::new(HashMap::new()),
            op_results: std::cell::RefCell::new(HashMap::new()),
            unwaited: std::cell::RefCell::new(std::collections::HashSet::new()),
        }))
    }

    /// Spawns `future` with the given initial cancel-scope stack,
    /// registering it as a member of each of those scopes.
    pub(crate) fn spawn_task<T: 'static>(
        &self,
        future: BoxedTaskFuture,
        scopes: Vec<CancelScope>,
    ) -> JoinHandle<T> {
        let id = self.ids.next();
        for scope in &scopes {
            scope.add_member(id);
        }
        let completion = TaskCompletion::new();
        self.tasks.borrow_mut().insert(
            id,
            TaskSlot {
                future,
                scopes,
                completion: completion.clone(),
            },
        );
        self.ready.push(id);
        JoinHandle::new(id, completion)
    }

    /// Forces `task_id` back onto the ready queue so it gets a chance to
    /// observe its scope's cancellation at its next suspension point.
    pub(crate) fn enqueue_cancel(&self, task_id: TaskId) {
        self.ready.push(task_id);
    }

    /// Registers an operation descriptor, running its synchronous phase
    /// if it has one. Doesn't block — the caller submits the batch once
    /// its own poll returns.
    pub(crate) fn submit_op(&self, op: Operation, waiter: TaskId) -> SubmitOutcome {
        let op_id = self.ids.next();
        match self.io.borrow_mut().register(op, op_id) {
            RegisterOutcome::Pending => {
                self.waiters.borrow_mut().insert(op_id, waiter);
                SubmitOutcome::Pending(op_id)
            }
            RegisterOutcome::Immediate(result) => SubmitOutcome::Ready(result),
        }
    }

    /// Takes a completed op's result if it has arrived, without blocking.
    pub(crate) fn take_op_result(&self, op_id: OperationId) -> Option<Result<Completion>> {
        self.op_results.borrow_mut().remove(&op_id)
    }

    /// Submits an `Operation::Cancel` targeting `target`, an op already in
    /// flight. Fire-and-forget: nothing awaits this op's own completion, so
    /// it's recorded in `unwaited` and dropped on arrival in
    /// [`Reactor::handle_completion`] instead of accumulating in
    /// `op_results` forever.
    pub(crate) fn request_cancel(&self, target: OperationId) {
        let op_id = self.ids.next();
        self.unwaited.borrow_mut().insert(op_id);
        if let RegisterOutcome::Immediate(_) =
            self.io.borrow_mut().register(Operation::cancel(target), op_id)
        {
            self.unwaited.borrow_mut().remove(&op_id);
        }
    }

    fn drain_ready(self: &Rc<Self>) {
        while let Some(task_id) = self.ready.pop() {
            self.poll_task(task_id);
        }
    }

    fn poll_task(self: &Rc<Self>, task_id: TaskId) {
        let slot = match self.tasks.borrow_mut().remove(&task_id) {
            Some(s) => s,
            None => return, // already finished; a stale wake, harmless
        };
        let TaskSlot {
            mut future,
            scopes,
            completion,
        } = slot;

        let waker = task_waker(task_id, self.ready.clone());
        let mut cx = Context::from_waker(&waker);
        let (poll_result, scopes) =
            context::enter(task_id, scopes, self.clone(), || future.as_mut().poll(&mut cx));

        match poll_result {
            Poll::Ready(result) => {
                trace!(%task_id, "task finished");
                completion.fulfill(result);
            }
            Poll::Pending => {
                self.tasks.borrow_mut().insert(
                    task_id,
                    TaskSlot {
                        future,
                        scopes,
                        completion,
                    },
                );
            }
        }
    }

    fn handle_completion(&self, io: crate::worker::IoCompletion) {
        if self.unwaited.borrow_mut().remove(&io.op_id) {
            return;
        }
        self.op_results.borrow_mut().insert(io.op_id, io.result);
        if let Some(waiter) = self.waiters.borrow_mut().remove(&io.op_id) {
            self.ready.push(waiter);
        }
    }

    /// Runs every task spawned (directly or transitively) from `root` to
    /// completion, including `root` itself, and returns `root`'s result.
    fn run_to_completion<T: 'static>(self: Rc<Self>, root: JoinHandle<T>) -> Result<T> {
        loop {
            self.drain_ready();
            if self.tasks.borrow().is_empty() {
                break;
            }

            self.io.borrow().submit()?;
            let mut reaped_any = false;
            while let Some(c) = self.io.borrow_mut().peek() {
                self.handle_completion(c);
                reaped_any = true;
            }
            if reaped_any || !self.ready.is_empty() {
                continue;
            }

            if self.io.borrow().in_flight() == 0 {
                return Err(Error::Deadlock);
            }
            let c = self.io.borrow_mut().wait()?;
            self.handle_completion(c);
        }

        debug_assert!(root.is_done(), "root task must be done once the table is empty");
        block_on_done(root)
    }
}

/// Consumes an already-finished `JoinHandle` without re-entering the loop
/// (used only once `run_to_completion` has confirmed the task table, and
/// therefore `root`, is done).
fn block_on_done<T: 'static>(mut handle: JoinHandle<T>) -> Result<T> {
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    match Future::poll(Pin::new(&mut handle), &mut cx) {
        Poll::Ready(result) => result,
        Poll::Pending => unreachable!("caller guarantees the task is already done"),
    }
}

fn noop_waker() -> Waker {
    fn clone(_: *const ()) -> RawWaker {
        RawWaker::new(std::ptr::null(), &VTABLE)
    }
    fn noop(_: *const ()) {}
    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
    unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
}

fn task_waker(task_id: TaskId, queue: Rc<SegQueue<TaskId>>) -> Waker {
    struct Inner {
        task_id: TaskId,
        queue: Rc<SegQueue<TaskId>>,
    }

    unsafe fn clone(data: *const ()) -> RawWaker {
        let inner = Rc::from_raw(data as *const Inner);
        let cloned = inner.clone();
        std::mem::forget(inner);
        RawWaker::new(Rc::into_raw(cloned) as *const (), &VTABLE)
    }
    unsafe fn wake(data: *const ()) {
        let inner = Rc::from_raw(data as *const Inner);
        inner.queue.push(inner.task_id);
    }
    unsafe fn wake_by_ref(data: *const ()) {
        let inner = &*(data as *const Inner);
        inner.queue.push(inner.task_id);
    }
    unsafe fn drop_fn(data: *const ()) {
        drop(Rc::from_raw(data as *const Inner));
    }

    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop_fn);
    let inner = Rc::new(Inner { task_id, queue });
    let raw = RawWaker::new(Rc::into_raw(inner) as *const (), &VTABLE);
    unsafe { Waker::from_raw(raw) }
}

/// Runs `coro` as the root task of a fresh loop on the current OS thread,
/// blocking until it (and everything it transitively spawned) finishes.
///
/// # Panics
/// Panics if called from within another `run()` on the same thread — one
/// loop per OS thread, and loops don't nest.
pub fn run<F, T>(coro: F) -> Result<T>
where
    F: Future<Output = Result<T>> + 'static,
    T: 'static,
{
    if context::try_current_task().is_some() {
        panic!("run() called from within a running loop");
    }
    let reactor = Reactor::new()?;
    let wrapped = async move { crate::join::box_result(coro.await) };
    let root = reactor.spawn_task(Box::pin(wrapped), Vec::new());
    debug!("loop starting");
    reactor.run_to_completion(root)
}
