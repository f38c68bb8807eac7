use alloy_primitives::B256;
use cinder_state_backend::StateError;

use crate::vm::VmError;

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// Cooperative cancellation: the engine was stopped while a block was
    /// in flight. Treated as a normal termination by the run loop.
    #[error("execution stopped")]
    Stopped,

    #[error("no blocks provided for the head update")]
    EmptyHeadUpdate,

    #[error("block {number} ({hash}) is not canonical after the head update")]
    NonCanonical { number: u64, hash: B256 },

    #[error("state root {root} of head block {number} is not materialized")]
    HeadStateMissing { number: u64, root: B256 },

    #[error("block {hash} has no parent in the store")]
    UnknownParent { hash: B256 },

    #[error("no canonical block at number {number}")]
    UnknownBlock { number: u64 },

    #[error("invalid replay range {first}..={last}")]
    InvalidRange { first: u64, last: u64 },

    #[error(transparent)]
    Vm(#[from] VmError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("block store error: {0}")]
    Store(eyre::Report),
}

impl ExecutionError {
    /// Whether back-step recovery applies: the VM could not load the state
    /// it was asked to execute from.
    pub fn is_missing_state_root(&self) -> bool {
        matches!(self, ExecutionError::Vm(VmError::MissingStateRoot(_)))
    }
}
