//! An in-process bounded channel: a bounded deque shared by any number of
//! send and receive halves, with two conditions gating backpressure in
//! each direction and a refcount per side so the last closed half tips
//! the other side over into `EndOfStream`/`BrokenResource`.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::sync::Condition;

struct Shared<T> {
    queue: RefCell<VecDeque<T>>,
    maxlen: Option<usize>,
    senders: Cell<usize>,
    receivers: Cell<usize>,
    /// Signaled when the queue has room for another `send`.
    send_ready: Condition,
    /// Signaled when the queue has an item for `receive`.
    receive_ready: Condition,
}

/// The sending half. Cloning increments the shared sender refcount;
/// dropping (or explicitly [`MemorySender::close`]ing) decrements it.
pub struct MemorySender<T> {
    shared: Rc<Shared<T>>,
    closed: Cell<bool>,
}

/// The receiving half, symmetric to [`MemorySender`].
pub struct MemoryReceiver<T> {
    shared: Rc<Shared<T>>,
    closed: Cell<bool>,
}

/// Creates a bounded (`maxlen = Some(n)`) or unbounded (`None`) channel.
pub fn create_memory_object_stream<T>(
    maxlen: Option<usize>,
) -> (MemorySender<T>, MemoryReceiver<T>) {
    let shared = Rc::new(Shared {
        queue: RefCell::new(VecDeque::new()),
        maxlen,
        senders: Cell::new(1),
        receivers: Cell::new(1),
        send_ready: Condition::new(),
        receive_ready: Condition::new(),
    });
    (
        MemorySender {
            shared: shared.clone(),
            closed: Cell::new(false),
        },
        MemoryReceiver {
            shared,
            closed: Cell::new(false),
        },
    )
}

impl<T> MemorySender<T> {
    /// Sends `item`, blocking while the queue is at `maxlen`.
    pub async fn send(&self, item: T) -> Result<()> {
        if self.closed.get() {
            return Err(Error::ClosedResource);
        }
        if self.shared.receivers.get() == 0 {
            return Err(Error::BrokenResource);
        }
        self.shared.send_ready.acquire().await?;
        let result = loop {
            let full = {
                let queue = self.shared.queue.borrow();
                matches!(self.shared.maxlen, Some(max) if queue.len() >= max)
            };
            if !full {
                self.shared.queue.borrow_mut().push_back(item);
                break Ok(());
            }
            if self.shared.receivers.get() == 0 {
                break Err(Error::BrokenResource);
            }
            if let Err(e) = self.shared.send_ready.wait().await {
                break Err(e);
            }
        };
        self.shared.send_ready.release();
        if result.is_ok() {
            self.shared.receive_ready.notify_one();
        }
        result
    }

    /// Closes this specific handle. Idempotent; further `send` calls on
    /// it raise `ClosedResource` regardless of other live clones.
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        let remaining = self.shared.senders.get() - 1;
        self.shared.senders.set(remaining);
        if remaining == 0 {
            self.shared.receive_ready.notify_all();
        }
    }
}

impl<T> Clone for MemorySender<T> {
    fn clone(&self) -> Self {
        self.shared.senders.set(self.shared.senders.get() + 1);
        Self {
            shared: self.shared.clone(),
            closed: Cell::new(false),
        }
    }
}

impl<T> Drop for MemorySender<T> {
    fn drop(&mut self) {
        if !self.closed.get() {
            self.close();
        }
    }
}

impl<T> MemoryReceiver<T> {
    /// Receives the next item, blocking while the queue is empty.
    /// Resolves to `EndOfStream` once the queue is drained and every
    /// sender half has closed.
    pub async fn receive(&self) -> Result<T> {
        if self.closed.get() {
            return Err(Error::ClosedResource);
        }
        self.shared.receive_ready.acquire().await?;
        let result = loop {
            if let Some(item) = self.shared.queue.borrow_mut().pop_front() {
                break Ok(item);
            }
            if self.shared.senders.get() == 0 {
                break Err(Error::EndOfStream);
            }
            if let Err(e) = self.shared.receive_ready.wait().await {
                break Err(e);
            }
        };
        self.shared.receive_ready.release();
        if result.is_ok() {
            self.shared.send_ready.notify_one();
        }
        result
    }

    /// Closes this specific handle. Idempotent; further `receive` calls
    /// on it raise `ClosedResource` regardless of other live clones.
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        let remaining = self.shared.receivers.get() - 1;
        self.shared.receivers.set(remaining);
        if remaining == 0 {
            self.shared.send_ready.notify_all();
        }
    }
}

impl<T> Clone for MemoryReceiver<T> {
    fn clone(&self) -> Self {
        self.shared.receivers.set(self.shared.receivers.get() + 1);
        Self {
            shared: self.shared.clone(),
            closed: Cell::new(false),
        }
    }
}

impl<T> Drop for MemoryReceiver<T> {
    fn drop(&mut self) {
        if !self.closed.get() {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_channel_has_one_sender_and_receiver() {
        let (tx, rx) = create_memory_object_stream::<u32>(Some(4));
        assert_eq!(tx.shared.senders.get(), 1);
        assert_eq!(rx.shared.receivers.get(), 1);
    }

    #[test]
    fn cloning_a_sender_increments_the_shared_count() {
        let (tx, _rx) = create_memory_object_stream::<u32>(None);
        let tx2 = tx.clone();
        assert_eq!(tx.shared.senders.get(), 2);
        drop(tx2);
        assert_eq!(tx.shared.senders.get(), 1);
    }
}
