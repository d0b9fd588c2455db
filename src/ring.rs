//! Thin wrapper over the kernel submission/completion ring.
//!
//! Knows nothing about [`Operation`](crate::op::Operation) — it only
//! pushes already-built submission entries and reaps raw `(user_data,
//! result)` completions. Scoped acquisition: the ring is torn down when
//! this value is dropped, on every exit path.

use std::cell::RefCell;

use io_uring::{squeue, IoUring};

use crate::error::{Error, Result};

/// One reaped completion, not yet matched up with its [`Operation`].
#[derive(Debug, Clone, Copy)]
pub struct RawCompletion {
    pub user_data: u64,
    pub raw_result: i32,
}

pub struct Ring {
    inner: RefCell<IoUring>,
}

impl Ring {
    /// `depth` is fixed at construction (default [`crate::config::RING_DEPTH`]).
    pub fn new(depth: u32) -> Result<Self> {
        let ring = IoUring::new(depth)
            .map_err(|e| Error::runtime(format!("failed to create io_uring: {e}")))?;
        Ok(Self {
            inner: RefCell::new(ring),
        })
    }

    /// Pushes a prepared entry onto the submission queue. Does not submit.
    ///
    /// Fails with a fatal [`Error::Runtime`] if the submission queue has no
    /// free slot (spec.md §4.1: "a missing submission slot is a fatal
    /// runtime error").
    pub fn push(&self, entry: squeue::Entry) -> Result<()> {
        let mut ring = self.inner.borrow_mut();
        unsafe {
            ring.submission()
                .push(&entry)
                .map_err(|_| Error::runtime("submission queue is full"))
        }
    }

    /// Flushes the submission queue to the kernel, returning the count of
    /// entries submitted.
    pub fn submit(&self) -> Result<usize> {
        self.inner
            .borrow()
            .submit()
            .map_err(|e| Error::runtime(format!("ring submit failed: {e}")))
    }

    /// Non-blocking: returns the next completion if one is already queued.
    pub fn peek(&self) -> Option<RawCompletion> {
        let mut ring = self.inner.borrow_mut();
        ring.completion().next().map(|cqe| RawCompletion {
            user_data: cqe.user_data(),
            raw_result: cqe.result(),
        })
    }

    /// Blocks until at least one completion is available, then returns it.
    pub fn wait(&self) -> Result<RawCompletion> {
        {
            let ring = self.inner.borrow();
            ring.submit_and_wait(1)
                .map_err(|e| Error::runtime(format!("ring wait failed: {e}")))?;
        }
        self.peek()
            .ok_or_else(|| Error::runtime("ring wait returned but no completion was queued"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nop_round_trips_through_the_ring() {
        let ring = Ring::new(crate::config::RING_DEPTH).expect("io_uring unavailable in sandbox");
        let entry = io_uring::opcode::Nop::new().build().user_data(7);
        ring.push(entry).unwrap();
        let completion = ring.wait().unwrap();
        assert_eq!(completion.user_data, 7);
        assert_eq!(completion.raw_result, 0);
    }
}
