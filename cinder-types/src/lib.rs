use alloy_consensus::{Block as AlloyBlock, Header, ReceiptEnvelope, TxEnvelope};
use alloy_primitives::BlockHash;

pub type Block = AlloyBlock<TxEnvelope, Header>;
pub type BlockReceipts = Vec<ReceiptEnvelope>;

/// Hash of a block, computed over its header.
pub fn block_hash(block: &Block) -> BlockHash {
    block.header.hash_slow()
}

/// Named chain cursors persisted by the block store.
///
/// `Vm` tracks the last executed block, `Safe` and `Finalized` mirror the
/// consensus client's fork-choice pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorKind {
    Vm,
    Safe,
    Finalized,
}

impl CursorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CursorKind::Vm => "vm",
            CursorKind::Safe => "safe",
            CursorKind::Finalized => "finalized",
        }
    }
}

impl std::fmt::Display for CursorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
