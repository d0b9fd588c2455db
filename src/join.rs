//! The result-delivery half of a spawned task.
//!
//! Generalizes the teacher's `Promise`/`Future` pair (`future.rs`) to
//! support more than one waiter: a task can be awaited by its
//! `TaskGroup`'s exit *and* by an unrelated `wait_on`/`gather` caller.

use std::any::Any;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::{Error, Result};
use crate::ids::TaskId;

pub(crate) type AnyResult = std::result::Result<Box<dyn Any>, Error>;

struct Shared {
    result: Option<AnyResult>,
    wakers: Vec<Waker>,
}

/// Shared completion cell for one task; type-erased so the scheduler's
/// task table doesn't need to be generic over every spawned task's output.
#[derive(Clone)]
pub(crate) struct TaskCompletion(Rc<RefCell<Shared>>);

impl TaskCompletion {
    pub(crate) fn new() -> Self {
        Self(Rc::new(RefCell::new(Shared {
            result: None,
            wakers: Vec::new(),
        })))
    }

    pub(crate) fn fulfill(&self, result: AnyResult) {
        let wakers = {
            let mut shared = self.0.borrow_mut();
            debug_assert!(shared.result.is_none(), "task completed twice");
            shared.result = Some(result);
            std::mem::take(&mut shared.wakers)
        };
        for w in wakers {
            w.wake();
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.0.borrow().result.is_some()
    }

    fn poll_any(&self, cx: &mut Context<'_>) -> Poll<()> {
        let mut shared = self.0.borrow_mut();
        if shared.result.is_some() {
            Poll::Ready(())
        } else {
            shared.wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }

    fn take_typed<T: 'static>(&self) -> Result<T> {
        let result = self
            .0
            .borrow_mut()
            .result
            .take()
            .expect("take_typed called before completion");
        match result {
            Ok(boxed) => Ok(*boxed
                .downcast::<T>()
                .unwrap_or_else(|_| panic!("task result type mismatch"))),
            Err(e) => Err(e),
        }
    }

    /// Puts the result back after a peek, for a second waiter to consume.
    fn put_back(&self, result: AnyResult) {
        self.0.borrow_mut().result = Some(result);
    }
}

/// A handle to a spawned task's eventual result.
pub struct JoinHandle<T> {
    pub(crate) id: TaskId,
    pub(crate) completion: TaskCompletion,
    _marker: std::marker::PhantomData<T>,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new(id: TaskId, completion: TaskCompletion) -> Self {
        Self {
            id,
            completion,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Non-consuming completion check, for `wait_on`/`TaskGroup::exit`,
    /// which may need to observe more than one task reaching done without
    /// taking any of their results.
    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }

    /// Non-consuming poll: registers `cx`'s waker if not yet done, but
    /// never touches the stored result. Unlike `Future::poll`, this can be
    /// called repeatedly and by more than one waiter.
    pub(crate) fn poll_done(&self, cx: &mut Context<'_>) -> bool {
        matches!(self.completion.poll_any(cx), Poll::Ready(()))
    }
}

impl<T: 'static> Future for JoinHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.completion.poll_any(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(()) => Poll::Ready(self.completion.take_typed::<T>()),
        }
    }
}

pub(crate) fn box_result<T: 'static>(result: Result<T>) -> AnyResult {
    match result {
        Ok(v) => Ok(Box::new(v)),
        Err(e) => Err(e),
    }
}

pub(crate) fn put_back_any(completion: &TaskCompletion, result: AnyResult) {
    completion.put_back(result);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fulfilling_before_poll_resolves_immediately() {
        let completion = TaskCompletion::new();
        completion.fulfill(box_result::<u32>(Ok(42)));
        assert!(completion.is_done());
    }
}
