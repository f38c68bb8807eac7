use alloy_consensus::Header;
use alloy_primitives::{B256, U256};
use alloy_rlp::{Decodable, Encodable};
use bytes::Bytes;
use cinder_types::{block_hash, Block, CursorKind};
use eyre::{bail, Context, OptionExt, Result};
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tracing::debug;

use crate::kvstore::{KVReader, KVStore, KVStoreErased};

const NUM_KEY_WIDTH: usize = 12;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Emitted when the canonical chain tip moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    ChainUpdated { hash: B256, number: u64 },
}

/// Composable writes applied under the store's write lock.
///
/// `SaveNumberLookup` is the only op that touches the canonical
/// number -> hash table; staging a block without it keeps the block
/// retrievable by hash but invisible to canonical reads.
#[derive(Debug, Clone)]
pub enum StoreOp {
    SetTotalDifficulty { hash: B256, td: U256 },
    SetBlockRecord { block: Block },
    SetHashToNumber { hash: B256, number: u64 },
    SaveNumberLookup { number: u64, hash: B256 },
}

/// Per-block callback driven by [`BlockStore::iterate`]. `reorg` is true for
/// the first block delivered after the cursor was re-anchored onto a new
/// canonical branch.
pub trait BlockHandler {
    type Error;

    fn handle(
        &mut self,
        block: Block,
        reorg: bool,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send;
}

/// Block, header, difficulty and cursor tables over a key-value backend,
/// with a canonical-order iterator.
#[derive(Clone)]
pub struct BlockStore {
    store: KVStoreErased,
    write_lock: std::sync::Arc<Mutex<()>>,
    events: broadcast::Sender<ChainEvent>,
}

impl BlockStore {
    pub fn new(store: impl Into<KVStoreErased>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store: store.into(),
            write_lock: std::sync::Arc::new(Mutex::new(())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    /// Seed the store with the genesis block. Idempotent for the same
    /// genesis; rejects a different one.
    pub async fn initialize(&self, genesis: &Block) -> Result<()> {
        if genesis.header.number != 0 {
            bail!("genesis block must have number 0");
        }
        let hash = block_hash(genesis);

        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.canonical_hash_at(0).await? {
            if existing != hash {
                bail!("store already initialized with a different genesis");
            }
            return Ok(());
        }

        self.apply_op(StoreOp::SetBlockRecord {
            block: genesis.clone(),
        })
        .await?;
        self.apply_op(StoreOp::SetTotalDifficulty {
            hash,
            td: genesis.header.difficulty,
        })
        .await?;
        self.apply_op(StoreOp::SetHashToNumber { hash, number: 0 }).await?;
        self.apply_op(StoreOp::SaveNumberLookup { number: 0, hash }).await?;
        self.set_head_tag(hash).await?;

        debug!(%hash, "initialized block store");
        Ok(())
    }

    pub async fn get_block_by_hash(&self, hash: &B256) -> Result<Option<Block>> {
        let Some(bytes) = self.store.get(&block_key(hash)).await? else {
            return Ok(None);
        };
        let block = Block::decode(&mut bytes.as_ref())
            .wrap_err_with(|| format!("failed to decode block {hash}"))?;
        Ok(Some(block))
    }

    pub async fn get_block_by_number(&self, number: u64) -> Result<Option<Block>> {
        let Some(hash) = self.canonical_hash_at(number).await? else {
            return Ok(None);
        };
        self.get_block_by_hash(&hash).await
    }

    pub async fn get_header(&self, hash: &B256) -> Result<Option<Header>> {
        let Some(bytes) = self.store.get(&header_key(hash)).await? else {
            return Ok(None);
        };
        let header = Header::decode(&mut bytes.as_ref())
            .wrap_err_with(|| format!("failed to decode header {hash}"))?;
        Ok(Some(header))
    }

    pub async fn block_number_for(&self, hash: &B256) -> Result<Option<u64>> {
        let Some(bytes) = self.store.get(&hash_to_num_key(hash)).await? else {
            return Ok(None);
        };
        decode_number(&bytes).map(Some)
    }

    pub async fn get_total_difficulty(&self, hash: &B256) -> Result<Option<U256>> {
        let Some(bytes) = self.store.get(&td_key(hash)).await? else {
            return Ok(None);
        };
        if bytes.len() != 32 {
            bail!("malformed total difficulty record for {hash}");
        }
        let mut raw = [0u8; 32];
        raw.copy_from_slice(&bytes);
        Ok(Some(U256::from_be_bytes(raw)))
    }

    /// Current tip of the canonical chain.
    pub async fn canonical_head(&self) -> Result<Block> {
        let hash = self
            .store
            .get(HEAD_TAG_KEY)
            .await?
            .ok_or_eyre("block store is not initialized")?;
        let hash = decode_hash(&hash)?;
        self.get_block_by_hash(&hash)
            .await?
            .ok_or_eyre("canonical head block is missing")
    }

    /// Block a named cursor points at; genesis until the cursor is first
    /// moved.
    pub async fn iterator_head(&self, kind: CursorKind) -> Result<Block> {
        match self.store.get(&cursor_key(kind)).await? {
            Some(bytes) => {
                let hash = decode_hash(&bytes)?;
                self.get_block_by_hash(&hash)
                    .await?
                    .ok_or_eyre("cursor points at an unknown block")
            }
            None => self
                .get_block_by_number(0)
                .await?
                .ok_or_eyre("block store is not initialized"),
        }
    }

    pub async fn set_iterator_head(&self, kind: CursorKind, hash: B256) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.set_cursor_raw(kind, hash).await
    }

    /// Apply a group of writes under the write lock.
    pub async fn batch(&self, ops: Vec<StoreOp>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        for op in ops {
            self.apply_op(op).await?;
        }
        Ok(())
    }

    /// Append blocks to the store.
    ///
    /// With `skip_canonical_check` the blocks are canonicalized
    /// unconditionally (fork-choice mode): the number -> hash table is
    /// rewritten for each block, stale canonical entries above the new tip
    /// are pruned, and the head tag moves to the last block. Without it,
    /// each block must extend the current canonical head.
    pub async fn put_blocks(
        &self,
        blocks: &[Block],
        skip_canonical_check: bool,
        suppress_event: bool,
    ) -> Result<()> {
        let Some(last) = blocks.last() else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;

        let old_head = self
            .store
            .get(HEAD_TAG_KEY)
            .await?
            .ok_or_eyre("block store is not initialized")?;
        let old_head_hash = decode_hash(&old_head)?;
        let mut expected_parent = old_head_hash;

        for block in blocks {
            let number = block.header.number;
            if number == 0 {
                bail!("genesis is written by initialize, not put_blocks");
            }
            let hash = block_hash(block);

            if !skip_canonical_check && block.header.parent_hash != expected_parent {
                bail!(
                    "block {number} ({hash}) does not extend the canonical head {expected_parent}"
                );
            }
            expected_parent = hash;

            let parent_td = self
                .get_total_difficulty(&block.header.parent_hash)
                .await?
                .ok_or_eyre("parent total difficulty is missing")?;

            self.apply_op(StoreOp::SetBlockRecord {
                block: block.clone(),
            })
            .await?;
            self.apply_op(StoreOp::SetTotalDifficulty {
                hash,
                td: parent_td + block.header.difficulty,
            })
            .await?;
            self.apply_op(StoreOp::SetHashToNumber { hash, number }).await?;
            self.apply_op(StoreOp::SaveNumberLookup { number, hash }).await?;
        }

        // prune canonical entries the new tip obsoletes
        let last_number = last.header.number;
        let old_head_number = self.block_number_for(&old_head_hash).await?.unwrap_or(0);
        for number in (last_number + 1)..=old_head_number {
            self.store.delete(&num_key(number)).await?;
        }

        let last_hash = block_hash(last);
        self.set_head_tag(last_hash).await?;

        if !suppress_event {
            self.emit(ChainEvent::ChainUpdated {
                hash: last_hash,
                number: last_number,
            });
        }
        Ok(())
    }

    /// Re-announce the current tip; used after event-suppressed writes.
    pub async fn update(&self, skip_emit: bool) -> Result<()> {
        let head = self.canonical_head().await?;
        if !skip_emit {
            self.emit(ChainEvent::ChainUpdated {
                hash: block_hash(&head),
                number: head.header.number,
            });
        }
        Ok(())
    }

    /// Walk the canonical chain from the named cursor, delivering at most
    /// `max_blocks` to `handler` and advancing the cursor after every
    /// successful callback.
    ///
    /// If the cursor is no longer canonical (the chain reorged), it is
    /// re-anchored on the closest canonical ancestor and the next delivered
    /// block carries `reorg = true`. With `release_lock` the store's write
    /// lock is dropped around each callback so other writers can proceed
    /// while a block is being processed.
    ///
    /// Returns the number of successfully handled blocks, plus the handler
    /// error that ended the walk early, if any.
    pub async fn iterate<H: BlockHandler>(
        &self,
        kind: CursorKind,
        max_blocks: usize,
        release_lock: bool,
        handler: &mut H,
    ) -> Result<(usize, Option<H::Error>)> {
        let mut handled = 0usize;
        let mut guard: Option<MutexGuard<'_, ()>> = Some(self.write_lock.lock().await);
        let mut head = self.iterator_head(kind).await?;
        let mut head_hash = block_hash(&head);

        while handled < max_blocks {
            if guard.is_none() {
                guard = Some(self.write_lock.lock().await);
            }

            let mut reorg = false;
            if self.canonical_hash_at(head.header.number).await? != Some(head_hash) {
                (head, head_hash) = self.common_canonical_ancestor(&head).await?;
                reorg = true;
            }

            let Some(next) = self.get_block_by_number(head.header.number + 1).await? else {
                break;
            };
            let next_hash = block_hash(&next);

            if release_lock {
                guard = None;
            }
            if let Err(e) = handler.handle(next.clone(), reorg).await {
                return Ok((handled, Some(e)));
            }
            if guard.is_none() {
                guard = Some(self.write_lock.lock().await);
            }
            self.set_cursor_raw(kind, next_hash).await?;

            head = next;
            head_hash = next_hash;
            handled += 1;
        }

        Ok((handled, None))
    }

    async fn common_canonical_ancestor(&self, from: &Block) -> Result<(Block, B256)> {
        let mut cursor = from.clone();
        loop {
            if cursor.header.number == 0 {
                bail!("genesis block is not canonical");
            }
            let parent = self
                .get_block_by_hash(&cursor.header.parent_hash)
                .await?
                .ok_or_eyre("ancestor block is missing from the store")?;
            let parent_hash = block_hash(&parent);
            if self.canonical_hash_at(parent.header.number).await? == Some(parent_hash) {
                debug!(
                    number = parent.header.number,
                    hash = %parent_hash,
                    "re-anchored iterator on canonical ancestor"
                );
                return Ok((parent, parent_hash));
            }
            cursor = parent;
        }
    }

    async fn canonical_hash_at(&self, number: u64) -> Result<Option<B256>> {
        match self.store.get(&num_key(number)).await? {
            Some(bytes) => decode_hash(&bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn apply_op(&self, op: StoreOp) -> Result<()> {
        match op {
            StoreOp::SetTotalDifficulty { hash, td } => {
                self.store
                    .put(&td_key(&hash), td.to_be_bytes::<32>().to_vec())
                    .await
            }
            StoreOp::SetBlockRecord { block } => {
                let hash = block_hash(&block);

                let mut header_rlp = Vec::new();
                block.header.encode(&mut header_rlp);
                self.store.put(&header_key(&hash), header_rlp).await?;

                let mut block_rlp = Vec::new();
                block.encode(&mut block_rlp);
                self.store.put(&block_key(&hash), block_rlp).await
            }
            StoreOp::SetHashToNumber { hash, number } => {
                self.store
                    .put(&hash_to_num_key(&hash), number.to_string().into_bytes())
                    .await
            }
            StoreOp::SaveNumberLookup { number, hash } => {
                self.store.put(&num_key(number), hash.to_vec()).await
            }
        }
    }

    async fn set_cursor_raw(&self, kind: CursorKind, hash: B256) -> Result<()> {
        self.store.put(&cursor_key(kind), hash.to_vec()).await
    }

    async fn set_head_tag(&self, hash: B256) -> Result<()> {
        self.store.put(HEAD_TAG_KEY, hash.to_vec()).await
    }

    fn emit(&self, event: ChainEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }
}

const HEAD_TAG_KEY: &str = "tag/latest";

fn block_key(hash: &B256) -> String {
    format!("block/{}", hex::encode(hash))
}

fn header_key(hash: &B256) -> String {
    format!("header/{}", hex::encode(hash))
}

fn hash_to_num_key(hash: &B256) -> String {
    format!("hash2num/{}", hex::encode(hash))
}

fn num_key(number: u64) -> String {
    format!("num/{:0width$}", number, width = NUM_KEY_WIDTH)
}

fn td_key(hash: &B256) -> String {
    format!("td/{}", hex::encode(hash))
}

fn cursor_key(kind: CursorKind) -> String {
    format!("cursor/{}", kind.as_str())
}

fn decode_hash(bytes: &Bytes) -> Result<B256> {
    if bytes.len() != 32 {
        bail!("malformed hash record");
    }
    Ok(B256::from_slice(bytes))
}

fn decode_number(bytes: &Bytes) -> Result<u64> {
    let s = std::str::from_utf8(bytes).wrap_err("invalid utf-8 in number record")?;
    s.parse::<u64>()
        .wrap_err_with(|| format!("unable to parse block number, value: {s}"))
}
