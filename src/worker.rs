//! Keeps the map of in-flight operation ids and bridges [`Operation`]
//! descriptors to the raw [`Ring`].

use std::collections::HashMap;

use tracing::trace;

use crate::error::Result;
use crate::ids::OperationId;
use crate::op::{Completion, Operation};
use crate::ring::Ring;

/// A completion with its operation resolved back to a typed result.
pub struct IoCompletion {
    pub op_id: OperationId,
    pub result: Result<Completion>,
}

/// Outcome of registering an op: either it's now in flight on the ring, or
/// it already failed during its synchronous phase (bind/listen/setsockopt,
/// or a full submission queue) and will never produce a kernel completion.
pub enum RegisterOutcome {
    Pending,
    Immediate(Result<Completion>),
}

pub struct IoWorker {
    ring: Ring,
    pending: HashMap<OperationId, Operation>,
}

impl IoWorker {
    pub fn new(depth: u32) -> Result<Self> {
        Ok(Self {
            ring: Ring::new(depth)?,
            pending: HashMap::new(),
        })
    }

    /// Number of kernel ops currently in flight. Used by the scheduler's
    /// deadlock check: if this is zero and nothing is otherwise ready,
    /// nothing will ever wake the loop up again.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Binds `op_id` to `op`, performing any synchronous half of the op and
    /// preparing its submission entry. Does not submit to the kernel —
    /// call [`IoWorker::submit`] after registering a batch.
    pub fn register(&mut self, mut op: Operation, op_id: OperationId) -> RegisterOutcome {
        if let Err(e) = op.perform_sync() {
            trace!(%op_id, "op failed its synchronous phase");
            return RegisterOutcome::Immediate(Err(e));
        }
        match op.build_entry(op_id) {
            Ok(entry) => match self.ring.push(entry) {
                Ok(()) => {
                    self.pending.insert(op_id, op);
                    trace!(%op_id, "registered op");
                    RegisterOutcome::Pending
                }
                Err(e) => RegisterOutcome::Immediate(Err(e)),
            },
            Err(e) => RegisterOutcome::Immediate(Err(e)),
        }
    }

    pub fn submit(&self) -> Result<usize> {
        self.ring.submit()
    }

    /// Non-blocking: resolves the next already-queued completion, if any.
    pub fn peek(&mut self) -> Option<IoCompletion> {
        let raw = self.ring.peek()?;
        Some(self.resolve(raw))
    }

    /// Blocks until a completion is available, resolves and returns it.
    pub fn wait(&mut self) -> Result<IoCompletion> {
        let raw = self.ring.wait()?;
        Ok(self.resolve(raw))
    }

    fn resolve(&mut self, raw: crate::ring::RawCompletion) -> IoCompletion {
        let op_id = crate::ids::Id::from_u64(raw.user_data);
        match self.pending.remove(&op_id) {
            Some(op) => {
                trace!(%op_id, result = raw.raw_result, "reaped completion");
                IoCompletion {
                    op_id,
                    result: op.extract(raw.raw_result),
                }
            }
            None => IoCompletion {
                op_id,
                result: Err(crate::error::Error::runtime(format!(
                    "completion for unknown op {op_id}"
                ))),
            },
        }
    }
}
