//! Deterministic fixtures for exercising the execution engine: signed mock
//! transactions, chain builders with derivable state roots, and a mock VM
//! that honors the engine's `BlockRunner` contract.

mod vm;

use std::sync::Arc;

use alloy_consensus::{
    BlockBody, Eip658Value, Header, Receipt, ReceiptWithBloom, ReceiptEnvelope,
    SignableTransaction, TxEip1559, TxEnvelope,
};
use alloy_primitives::{keccak256, Bloom, Bytes, Log, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use cinder_blockstore::{kvstore::memory::MemoryStorage, BlockStore};
use cinder_chain_config::{ChainSpec, ConsensusType};
use cinder_execution::genesis_state;
use cinder_receipts::ReceiptsManager;
use cinder_state_backend::snapshot_root;
use cinder_types::{block_hash, Block, BlockReceipts};

pub use crate::vm::{MockVm, MockVmProbe, RunRecord};

/// Tag blocks carry in `extra_data`; forks use their own tag so sibling
/// blocks at the same height get distinct hashes and state roots.
pub const MAIN_TAG: &[u8] = b"cinder";

pub fn mock_tx(seed: u64) -> TxEnvelope {
    let tx = TxEip1559 {
        nonce: 0,
        gas_limit: 21_000,
        max_fee_per_gas: 100,
        max_priority_fee_per_gas: 10,
        ..Default::default()
    };
    let signer = PrivateKeySigner::from_bytes(&B256::from(U256::from(seed + 1))).unwrap();
    let sig = signer.sign_hash_sync(&tx.signature_hash()).unwrap();
    tx.into_signed(sig).into()
}

pub fn mock_receipt(cumulative_gas_used: u64) -> ReceiptEnvelope {
    ReceiptEnvelope::Eip1559(ReceiptWithBloom::new(
        Receipt::<Log> {
            status: Eip658Value::Eip658(true),
            cumulative_gas_used,
            logs: vec![],
        },
        Bloom::default(),
    ))
}

/// The receipts a block yields under the mock VM's flat gas schedule.
pub fn expected_receipts(block: &Block, tx_gas: u64) -> BlockReceipts {
    (1..=block.body.transactions.len() as u64)
        .map(|i| mock_receipt(tx_gas * i))
        .collect()
}

/// Post-state commitment of a block, derived from its parent's root. The
/// mock VM recomputes this and rejects blocks whose header disagrees.
pub fn derived_state_root(parent_root: B256, number: u64, extra_data: &[u8]) -> B256 {
    let mut preimage = Vec::with_capacity(32 + 8 + extra_data.len());
    preimage.extend_from_slice(parent_root.as_slice());
    preimage.extend_from_slice(&number.to_be_bytes());
    preimage.extend_from_slice(extra_data);
    keccak256(&preimage)
}

pub fn genesis_block(spec: &ChainSpec) -> Block {
    Block {
        header: Header {
            number: 0,
            parent_hash: B256::ZERO,
            state_root: snapshot_root(&genesis_state(spec)),
            timestamp: spec.genesis.timestamp,
            difficulty: spec.genesis.difficulty,
            gas_limit: spec.genesis.gas_limit,
            base_fee_per_gas: spec.genesis.base_fee_per_gas,
            extra_data: spec.genesis.extra_data.clone(),
            ..Default::default()
        },
        body: BlockBody {
            transactions: vec![],
            ommers: vec![],
            withdrawals: None,
        },
    }
}

fn block_difficulty(spec: &ChainSpec) -> U256 {
    match spec.consensus {
        ConsensusType::ProofOfStake => U256::ZERO,
        _ => U256::from(100u64),
    }
}

/// One child block on top of `parent`.
pub fn next_block(
    spec: &ChainSpec,
    parent: &Block,
    tag: &[u8],
    txs_per_block: usize,
) -> Block {
    let number = parent.header.number + 1;
    let transactions: Vec<TxEnvelope> = (0..txs_per_block as u64)
        .map(|i| mock_tx(number * 1_000 + i))
        .collect();
    Block {
        header: Header {
            number,
            parent_hash: block_hash(parent),
            state_root: derived_state_root(parent.header.state_root, number, tag),
            timestamp: spec.genesis.timestamp + number * 12,
            difficulty: block_difficulty(spec),
            gas_limit: spec.genesis.gas_limit,
            gas_used: transactions.len() as u64 * 21_000,
            base_fee_per_gas: spec.genesis.base_fee_per_gas,
            extra_data: Bytes::copy_from_slice(tag),
            ..Default::default()
        },
        body: BlockBody {
            transactions,
            ommers: vec![],
            withdrawals: None,
        },
    }
}

/// Genesis plus `len` linked blocks on the main tag.
pub fn build_chain(spec: &ChainSpec, len: u64, txs_per_block: usize) -> Vec<Block> {
    let mut blocks = vec![genesis_block(spec)];
    for _ in 0..len {
        let next = next_block(spec, blocks.last().unwrap(), MAIN_TAG, txs_per_block);
        blocks.push(next);
    }
    blocks
}

/// A fork branch of `len` blocks on top of `base`, tagged so it diverges.
pub fn build_fork(
    spec: &ChainSpec,
    base: &Block,
    len: u64,
    tag: &[u8],
    txs_per_block: usize,
) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(len as usize);
    let mut parent = base.clone();
    for _ in 0..len {
        let next = next_block(spec, &parent, tag, txs_per_block);
        parent = next.clone();
        blocks.push(next);
    }
    blocks
}

/// A seeded block store plus the receipts manager sharing its backend.
pub struct TestChain {
    pub spec: Arc<ChainSpec>,
    pub store: BlockStore,
    pub receipts: ReceiptsManager,
    pub blocks: Vec<Block>,
}

/// Build a canonical chain of `len` blocks and load it into a fresh
/// in-memory store.
pub async fn setup_chain(spec: ChainSpec, len: u64, txs_per_block: usize) -> TestChain {
    let spec = Arc::new(spec);
    let blocks = build_chain(&spec, len, txs_per_block);

    let backend = MemoryStorage::new("chain");
    let store = BlockStore::new(backend.clone());
    store.initialize(&blocks[0]).await.unwrap();
    if blocks.len() > 1 {
        store.put_blocks(&blocks[1..], false, true).await.unwrap();
    }

    TestChain {
        spec,
        store,
        receipts: ReceiptsManager::new(backend),
        blocks,
    }
}
