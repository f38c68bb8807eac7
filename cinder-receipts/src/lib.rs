use alloy_consensus::ReceiptEnvelope;
use alloy_primitives::{BlockHash, TxHash, B256};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use cinder_blockstore::kvstore::{KVReader, KVStore, KVStoreErased};
use cinder_types::{block_hash, Block, BlockReceipts};
use eyre::{bail, Context, Result};
use tracing::debug;

/// Where a transaction landed: the containing block and its index in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct TxLocation {
    pub block_hash: BlockHash,
    pub tx_index: u64,
}

/// A receipt resolved through the transaction index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceiptEntry {
    pub receipt: ReceiptEnvelope,
    pub block_hash: BlockHash,
    pub tx_index: u64,
}

/// Persists per-block receipt lists keyed by block hash, plus a
/// tx hash -> location index for point lookups.
#[derive(Clone)]
pub struct ReceiptsManager {
    store: KVStoreErased,
}

impl ReceiptsManager {
    pub fn new(store: impl Into<KVStoreErased>) -> Self {
        Self {
            store: store.into(),
        }
    }

    /// Write the receipts for `block` and index every transaction in it.
    /// Overwrites any previous record for the same hash, so re-execution
    /// after a reorg converges on the latest result.
    pub async fn save_receipts(&self, block: &Block, receipts: &BlockReceipts) -> Result<()> {
        if block.body.transactions.len() != receipts.len() {
            bail!(
                "block has {} transactions but {} receipts",
                block.body.transactions.len(),
                receipts.len()
            );
        }

        let hash = block_hash(block);

        let mut rlp = Vec::new();
        receipts.encode(&mut rlp);
        self.store.put(&receipts_key(&hash), rlp).await?;

        for (index, tx) in block.body.transactions.iter().enumerate() {
            let location = TxLocation {
                block_hash: hash,
                tx_index: index as u64,
            };
            let mut encoded = Vec::new();
            location.encode(&mut encoded);
            self.store.put(&tx_index_key(tx.tx_hash()), encoded).await?;
        }

        debug!(%hash, count = receipts.len(), "saved block receipts");
        Ok(())
    }

    pub async fn get_receipts(&self, hash: &BlockHash) -> Result<Option<BlockReceipts>> {
        let Some(bytes) = self.store.get(&receipts_key(hash)).await? else {
            return Ok(None);
        };
        let receipts = BlockReceipts::decode(&mut bytes.as_ref())
            .wrap_err_with(|| format!("failed to decode receipts for block {hash}"))?;
        Ok(Some(receipts))
    }

    /// Resolve a single transaction's receipt through the index.
    pub async fn get_tx_receipt(&self, tx_hash: &TxHash) -> Result<Option<TxReceiptEntry>> {
        let Some(bytes) = self.store.get(&tx_index_key(tx_hash)).await? else {
            return Ok(None);
        };
        let location = TxLocation::decode(&mut bytes.as_ref())
            .wrap_err_with(|| format!("failed to decode tx location for {tx_hash}"))?;

        let receipts = self
            .get_receipts(&location.block_hash)
            .await?
            .ok_or_else(|| {
                eyre::eyre!(
                    "tx index points at block {} with no receipts",
                    location.block_hash
                )
            })?;
        let receipt = receipts
            .into_iter()
            .nth(location.tx_index as usize)
            .ok_or_else(|| {
                eyre::eyre!(
                    "tx index {} out of range for block {}",
                    location.tx_index,
                    location.block_hash
                )
            })?;

        Ok(Some(TxReceiptEntry {
            receipt,
            block_hash: location.block_hash,
            tx_index: location.tx_index,
        }))
    }

    /// Drop the receipt record and tx index entries for a block.
    pub async fn delete_receipts(&self, block: &Block) -> Result<()> {
        let hash = block_hash(block);
        self.store.delete(&receipts_key(&hash)).await?;
        for tx in &block.body.transactions {
            self.store.delete(&tx_index_key(tx.tx_hash())).await?;
        }
        Ok(())
    }
}

fn receipts_key(hash: &B256) -> String {
    format!("receipts/{}", hex::encode(hash))
}

fn tx_index_key(tx_hash: &TxHash) -> String {
    format!("txidx/{}", hex::encode(tx_hash))
}

#[cfg(test)]
mod tests {
    use alloy_consensus::{
        BlockBody, Eip658Value, Header, Receipt, ReceiptWithBloom, SignableTransaction, TxEip1559,
        TxEnvelope,
    };
    use alloy_primitives::{Bloom, Log, B256, U256};
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;
    use cinder_blockstore::kvstore::memory::MemoryStorage;

    use super::*;

    fn mock_tx(seed: u64) -> TxEnvelope {
        let tx = TxEip1559 {
            nonce: seed,
            gas_limit: 21_000,
            max_fee_per_gas: 100,
            max_priority_fee_per_gas: 10,
            ..Default::default()
        };
        let signer =
            PrivateKeySigner::from_bytes(&B256::from(U256::from(seed + 1))).unwrap();
        let sig = signer.sign_hash_sync(&tx.signature_hash()).unwrap();
        tx.into_signed(sig).into()
    }

    fn mock_receipt(cumulative_gas_used: u64) -> ReceiptEnvelope {
        ReceiptEnvelope::Eip1559(ReceiptWithBloom::new(
            Receipt::<Log> {
                status: Eip658Value::Eip658(true),
                cumulative_gas_used,
                logs: vec![],
            },
            Bloom::default(),
        ))
    }

    fn mock_block(number: u64, transactions: Vec<TxEnvelope>) -> Block {
        Block {
            header: Header {
                number,
                ..Default::default()
            },
            body: BlockBody {
                transactions,
                ommers: vec![],
                withdrawals: None,
            },
        }
    }

    fn manager() -> ReceiptsManager {
        ReceiptsManager::new(MemoryStorage::new("receipts"))
    }

    #[tokio::test]
    async fn save_and_query_by_block_hash() -> Result<()> {
        let manager = manager();
        let block = mock_block(1, vec![mock_tx(1), mock_tx(2)]);
        let receipts = vec![mock_receipt(21_000), mock_receipt(42_000)];

        manager.save_receipts(&block, &receipts).await?;

        let loaded = manager.get_receipts(&block_hash(&block)).await?.unwrap();
        assert_eq!(loaded, receipts);

        assert!(manager
            .get_receipts(&B256::repeat_byte(0xff))
            .await?
            .is_none());

        Ok(())
    }

    #[tokio::test]
    async fn tx_index_resolves_block_and_position() -> Result<()> {
        let manager = manager();
        let tx_a = mock_tx(10);
        let tx_b = mock_tx(11);
        let block = mock_block(7, vec![tx_a.clone(), tx_b.clone()]);
        let receipts = vec![mock_receipt(21_000), mock_receipt(42_000)];

        manager.save_receipts(&block, &receipts).await?;

        let entry = manager.get_tx_receipt(tx_b.tx_hash()).await?.unwrap();
        assert_eq!(entry.block_hash, block_hash(&block));
        assert_eq!(entry.tx_index, 1);
        assert_eq!(entry.receipt, receipts[1]);

        let unknown = B256::repeat_byte(0x01);
        assert!(manager.get_tx_receipt(&unknown).await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn receipt_count_must_match_tx_count() {
        let manager = manager();
        let block = mock_block(1, vec![mock_tx(1)]);
        let result = manager.save_receipts(&block, &vec![]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn saving_twice_overwrites() -> Result<()> {
        let manager = manager();
        let block = mock_block(1, vec![mock_tx(1)]);

        manager
            .save_receipts(&block, &vec![mock_receipt(21_000)])
            .await?;
        manager
            .save_receipts(&block, &vec![mock_receipt(30_000)])
            .await?;

        let loaded = manager.get_receipts(&block_hash(&block)).await?.unwrap();
        assert_eq!(loaded, vec![mock_receipt(30_000)]);

        Ok(())
    }

    #[tokio::test]
    async fn delete_removes_record_and_index() -> Result<()> {
        let manager = manager();
        let tx = mock_tx(3);
        let block = mock_block(2, vec![tx.clone()]);
        manager
            .save_receipts(&block, &vec![mock_receipt(21_000)])
            .await?;

        manager.delete_receipts(&block).await?;

        assert!(manager.get_receipts(&block_hash(&block)).await?.is_none());
        assert!(manager.get_tx_receipt(tx.tx_hash()).await?.is_none());

        Ok(())
    }
}
