//! Cooperative synchronization primitives: `Event`, `Lock`, `Semaphore`,
//! `Condition`.
//!
//! `Event` and `Lock` are a direct port of `sync_primitives.py`'s
//! single-waiter `Event`/deque-of-events `Lock`, generalized to a shared
//! `Vec<Waker>` per event so one `set()` can wake more than one waiter
//! (needed by `Condition::notify_all`) instead of the original's single
//! `_task_id`/`unpark()` pair. `Semaphore` and `Condition` are new — the
//! original leaves them as an explicit `# TODO`.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::context;
use crate::error::Result;

/// A one-shot gate: every `wait()` parks until `set()` is called, after
/// which `wait()` resolves immediately for anyone who calls it.
#[derive(Clone)]
pub struct Event(Rc<EventInner>);

struct EventInner {
    ready: Cell<bool>,
    wakers: RefCell<Vec<Waker>>,
}

impl Event {
    pub fn new() -> Self {
        Self(Rc::new(EventInner {
            ready: Cell::new(false),
            wakers: RefCell::new(Vec::new()),
        }))
    }

    pub fn is_set(&self) -> bool {
        self.0.ready.get()
    }

    /// Sets the event and wakes every current waiter. Idempotent.
    pub fn set(&self) {
        if self.0.ready.replace(true) {
            return;
        }
        for w in self.0.wakers.borrow_mut().drain(..) {
            w.wake();
        }
    }

    pub async fn wait(&self) -> Result<()> {
        EventWait { event: self }.await
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

struct EventWait<'a> {
    event: &'a Event,
}

impl Future for EventWait<'_> {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        if let Err(e) = context::check_scope_cancellation() {
            return Poll::Ready(Err(e));
        }
        if self.event.is_set() {
            return Poll::Ready(Ok(()));
        }
        self.event.0.wakers.borrow_mut().push(cx.waker().clone());
        Poll::Pending
    }
}

/// A mutual-exclusion lock. Each `acquire()` appends a fresh event to the
/// back of the queue and, if the lock was already held, waits on whatever
/// was previously at the back — so `release()` only ever has to set the
/// single event at the front, handing the lock to the next task in line.
pub struct Lock {
    events: RefCell<VecDeque<Event>>,
}

impl Lock {
    pub fn new() -> Self {
        Self {
            events: RefCell::new(VecDeque::new()),
        }
    }

    pub async fn acquire(&self) -> Result<()> {
        let dependant = {
            let mut events = self.events.borrow_mut();
            let dependant = events.back().cloned();
            events.push_back(Event::new());
            dependant
        };
        if let Some(dependant) = dependant {
            dependant.wait().await?;
        }
        Ok(())
    }

    /// Releases the lock, waking whichever task is next in line.
    ///
    /// # Panics
    /// Panics if nothing currently holds the lock.
    pub fn release(&self) {
        match self.events.borrow_mut().pop_front() {
            Some(event) => event.set(),
            None => panic!("released a Lock with nothing to release"),
        }
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

/// A counting semaphore. `release()` always returns the permit to the
/// pool before waking the longest-waiting acquirer, so a woken waiter is
/// always guaranteed to find a permit on its next poll.
pub struct Semaphore {
    permits: Cell<usize>,
    waiters: RefCell<VecDeque<Waker>>,
}

impl Semaphore {
    pub fn new(initial: usize) -> Self {
        Self {
            permits: Cell::new(initial),
            waiters: RefCell::new(VecDeque::new()),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.get()
    }

    pub async fn acquire(&self) -> Result<()> {
        SemaphoreAcquire { sem: self }.await
    }

    pub fn release(&self) {
        self.permits.set(self.permits.get() + 1);
        if let Some(w) = self.waiters.borrow_mut().pop_front() {
            w.wake();
        }
    }
}

struct SemaphoreAcquire<'a> {
    sem: &'a Semaphore,
}

impl Future for SemaphoreAcquire<'_> {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        if let Err(e) = context::check_scope_cancellation() {
            return Poll::Ready(Err(e));
        }
        let available = self.sem.permits.get();
        if available > 0 {
            self.sem.permits.set(available - 1);
            return Poll::Ready(Ok(()));
        }
        self.sem.waiters.borrow_mut().push_back(cx.waker().clone());
        Poll::Pending
    }
}

/// A condition variable paired with its own lock. `wait()` must be called
/// while holding the lock (via `acquire()`); it releases the lock, parks
/// until notified, then reacquires it before returning.
pub struct Condition {
    lock: Lock,
    waiters: RefCell<VecDeque<Event>>,
}

impl Condition {
    pub fn new() -> Self {
        Self {
            lock: Lock::new(),
            waiters: RefCell::new(VecDeque::new()),
        }
    }

    pub async fn acquire(&self) -> Result<()> {
        self.lock.acquire().await
    }

    pub fn release(&self) {
        self.lock.release()
    }

    pub async fn wait(&self) -> Result<()> {
        let notifier = Event::new();
        self.waiters.borrow_mut().push_back(notifier.clone());
        self.lock.release();
        notifier.wait().await?;
        self.lock.acquire().await
    }

    pub fn notify_one(&self) {
        if let Some(event) = self.waiters.borrow_mut().pop_front() {
            event.set();
        }
    }

    pub fn notify_all(&self) {
        for event in self.waiters.borrow_mut().drain(..) {
            event.set();
        }
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_set_before_wait_is_not_lost() {
        let event = Event::new();
        event.set();
        assert!(event.is_set());
        // A second set() must not panic or double-wake.
        event.set();
    }

    #[test]
    fn lock_starts_uncontended() {
        let lock = Lock::new();
        assert!(lock.events.borrow().is_empty());
    }

    #[test]
    #[should_panic(expected = "nothing to release")]
    fn releasing_an_unheld_lock_panics() {
        let lock = Lock::new();
        lock.release();
    }

    #[test]
    fn semaphore_tracks_available_permits() {
        let sem = Semaphore::new(3);
        assert_eq!(sem.available_permits(), 3);
        sem.release();
        assert_eq!(sem.available_permits(), 4);
    }
}
