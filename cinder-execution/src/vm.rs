use alloy_consensus::ReceiptEnvelope;
use alloy_primitives::{TxHash, B256};
use cinder_chain_config::Hardfork;
use cinder_state_backend::StateBackend;
use cinder_types::{Block, BlockReceipts};

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// The trie backing the VM has no node for this root; the block cannot
    /// be executed from it.
    #[error("state trie does not contain state root {0}")]
    MissingStateRoot(B256),
    #[error("block execution failed: {0}")]
    Execution(String),
}

pub struct RunBlockOpts<'a> {
    pub block: &'a Block,
    /// State root to execute from (the parent block's post-state).
    pub root: B256,
    /// Drop the VM's per-block caches before running; required whenever the
    /// previous VM state does not match `root`.
    pub clear_cache: bool,
    pub skip_block_validation: bool,
    pub skip_header_validation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunBlockOutcome {
    pub gas_used: u64,
    pub receipts: BlockReceipts,
    pub state_root: B256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReplayOutcome {
    pub gas_used: u64,
    pub receipt: ReceiptEnvelope,
}

/// Which transactions a debug replay re-runs for each block in the range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayTxs {
    /// Re-run whole blocks.
    FullBlocks,
    /// Re-run every transaction individually.
    All,
    /// Re-run only the listed transactions.
    Hashes(Vec<TxHash>),
}

/// The engine's contract with the virtual machine.
///
/// `run_block` must either produce receipts and a new state root or fail
/// without leaving partial state behind. A `shallow_copy` shares the backing
/// state but keeps independent caches, so replays do not disturb normal
/// execution.
pub trait BlockRunner: Send + 'static {
    type State: StateBackend + Send;

    fn init(&mut self) -> Result<(), VmError>;

    fn state(&self) -> &Self::State;
    fn state_mut(&mut self) -> &mut Self::State;

    /// Rekey the VM's protocol parameters for a new ruleset.
    fn set_hardfork(&mut self, fork: Hardfork);

    fn run_block(
        &mut self,
        opts: RunBlockOpts<'_>,
    ) -> impl std::future::Future<Output = Result<RunBlockOutcome, VmError>> + Send;

    /// Re-run a single transaction of `block` from `root`. Used by debug
    /// replay only; persists nothing.
    fn run_tx(
        &mut self,
        block: &Block,
        root: B256,
        tx_index: usize,
    ) -> impl std::future::Future<Output = Result<TxReplayOutcome, VmError>> + Send;

    fn shallow_copy(&self, preserve_caches: bool) -> Self
    where
        Self: Sized;
}
