use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::{Duration, Instant},
};

use alloy_primitives::B256;
use cinder_blockstore::{BlockHandler, BlockStore, StoreOp};
use cinder_chain_config::{ChainSpec, Hardfork};
use cinder_receipts::ReceiptsManager;
use cinder_state_backend::{AccountState, StateBackend, StateSnapshot};
use cinder_types::{block_hash, Block, BlockReceipts, CursorKind};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    errors::ExecutionError,
    gate::{ExecutionGate, GateGuard},
    metrics::{ExecutionMetrics, MetricsSnapshot},
    vm::{BlockRunner, ReplayTxs, RunBlockOpts},
    ExecutionConfig,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Emitted to observers on fatal per-block failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    VmError {
        number: u64,
        hash: B256,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenResult {
    Opened,
    /// The engine was already open (or an execution is still pending); the
    /// call changed nothing.
    AlreadyOpen,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub blocks: usize,
    pub txs: usize,
    pub gas_used: u64,
}

/// Everything a serialized mutator may touch.
struct EngineInner<V> {
    vm: V,
    hardfork: Hardfork,
    /// Receipts of executed-but-not-yet-canonical blocks, keyed by block
    /// hash. Drained by [`VmExecution::set_head`].
    pending_receipts: HashMap<B256, BlockReceipts>,
}

/// The block-execution engine.
///
/// Owns the VM and advances the `vm` cursor along the canonical chain,
/// either autonomously (`run`, pre-merge catch-up) or driven by a consensus
/// client (`run_without_set_head` + `set_head`). All mutators are serialized
/// through a single gate.
pub struct VmExecution<V: BlockRunner> {
    chain: Arc<ChainSpec>,
    store: BlockStore,
    receipts: ReceiptsManager,
    config: ExecutionConfig,

    gate: ExecutionGate<EngineInner<V>>,
    started: AtomicBool,
    shutdown: AtomicBool,

    metrics: ExecutionMetrics,
    events: broadcast::Sender<ExecutionEvent>,
    stats_task: StdMutex<Option<JoinHandle<()>>>,
    run_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<V: BlockRunner + Sync> VmExecution<V> {
    pub fn new(
        vm: V,
        chain: Arc<ChainSpec>,
        store: BlockStore,
        receipts: ReceiptsManager,
        config: ExecutionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            chain,
            store,
            receipts,
            config,
            gate: ExecutionGate::new(EngineInner {
                vm,
                hardfork: Hardfork::Frontier,
                pending_receipts: HashMap::new(),
            }),
            started: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            metrics: ExecutionMetrics::default(),
            events,
            stats_task: StdMutex::new(None),
            run_task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Whether a mutator currently holds the gate.
    pub fn running(&self) -> bool {
        self.gate.is_running()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    /// The hardfork the engine currently executes under.
    pub async fn hardfork(&self) -> Hardfork {
        self.gate.acquire().await.hardfork
    }

    pub async fn pending_receipt_count(&self) -> usize {
        self.gate.acquire().await.pending_receipts.len()
    }

    /// One-shot initialization: set up the VM, derive the active hardfork
    /// from the `vm` cursor block, and materialize the genesis state when
    /// opening a fresh data directory.
    pub async fn open(&self) -> Result<OpenResult, ExecutionError> {
        if self.started() || self.run_task.lock().await.is_some() {
            debug!("execution engine is already open");
            return Ok(OpenResult::AlreadyOpen);
        }

        let mut inner = self.gate.acquire().await;

        inner.vm.init()?;

        let head = self
            .store
            .iterator_head(CursorKind::Vm)
            .await
            .map_err(ExecutionError::Store)?;
        let hash = block_hash(&head);
        let td = self
            .store
            .get_total_difficulty(&hash)
            .await
            .map_err(ExecutionError::Store)?;

        let fork = self
            .chain
            .hardfork_for(head.header.number, td, head.header.timestamp);
        inner.hardfork = fork;
        inner.vm.set_hardfork(fork);

        if head.header.number == 0 && inner.vm.state().is_empty() {
            let root = inner
                .vm
                .state_mut()
                .generate_canonical_genesis(genesis_state(&self.chain))?;
            if root != head.header.state_root {
                warn!(
                    computed = %root,
                    expected = %head.header.state_root,
                    "genesis state root does not match the genesis header"
                );
            }
        }

        self.started.store(true, Ordering::SeqCst);
        info!(number = head.header.number, %hash, fork = %fork, "opened execution engine");
        Ok(OpenResult::Opened)
    }

    /// Begin periodic stats reporting and, on pre-merge chains with a
    /// lagging `vm` cursor, kick off an asynchronous catch-up run. Post-merge
    /// the consensus client drives execution and no autonomous run starts.
    ///
    /// Returns whether a catch-up run was spawned.
    pub async fn start(self: &Arc<Self>) -> Result<bool, ExecutionError> {
        if !self.started() {
            debug!("start called before open");
            return Ok(false);
        }

        self.spawn_stats_task();

        let fork = self.hardfork().await;
        let head = self
            .store
            .iterator_head(CursorKind::Vm)
            .await
            .map_err(ExecutionError::Store)?;
        let canonical = self
            .store
            .canonical_head()
            .await
            .map_err(ExecutionError::Store)?;

        if fork >= Hardfork::Paris || head.header.number >= canonical.header.number {
            return Ok(false);
        }

        info!(
            vm_head = head.header.number,
            canonical = canonical.header.number,
            "vm cursor is behind, starting catch-up execution"
        );
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            match engine.run(true, true).await {
                Ok(count) => debug!(count, "catch-up execution finished"),
                Err(e) => error!(error = %e, "catch-up execution failed"),
            }
        });
        *self.run_task.lock().await = Some(handle);
        Ok(true)
    }

    /// Two-phase shutdown: signal cancellation and flip `started` under the
    /// gate, await the in-flight run outside it (the run holds the gate, so
    /// waiting inside would deadlock), then reacquire to close the state
    /// backend.
    pub async fn stop(&self) -> Result<(), ExecutionError> {
        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(handle) = self.stats_task.lock().unwrap().take() {
            handle.abort();
        }

        {
            let _inner = self.gate.acquire().await;
            self.started.store(false, Ordering::SeqCst);
        }

        if let Some(handle) = self.run_task.lock().await.take() {
            let _ = handle.await;
        }

        let mut inner = self.gate.acquire().await;
        inner.vm.state_mut().close();
        info!("execution engine stopped");
        Ok(())
    }

    /// Execute canonical blocks from the `vm` cursor toward the chain tip.
    ///
    /// With `loop_run` the walk repeats in `num_blocks_per_iteration`
    /// batches while full batches keep coming; with `only_batched` it does
    /// not start unless at least one full batch is pending. Returns the
    /// number of blocks that executed successfully.
    pub async fn run(&self, loop_run: bool, only_batched: bool) -> Result<usize, ExecutionError> {
        if !self.started() || self.is_shutdown() {
            return Ok(0);
        }

        let mut inner = self.gate.acquire().await;

        let per_iteration = self.config.num_blocks_per_iteration;
        let mut total = 0usize;
        let mut start_head = self
            .store
            .iterator_head(CursorKind::Vm)
            .await
            .map_err(ExecutionError::Store)?;
        let mut canonical = self
            .store
            .canonical_head()
            .await
            .map_err(ExecutionError::Store)?;
        let mut first_pass = true;
        let mut last_count = per_iteration;

        while self.started()
            && !self.is_shutdown()
            && block_hash(&start_head) != block_hash(&canonical)
            && (!only_batched
                || canonical
                    .header
                    .number
                    .saturating_sub(start_head.header.number)
                    >= per_iteration as u64)
            && (first_pass || (loop_run && last_count == per_iteration))
        {
            first_pass = false;

            let EngineInner { vm, hardfork, .. } = &mut *inner;
            let mut handler = RunHandler {
                vm,
                hardfork,
                chain: &self.chain,
                store: &self.store,
                receipts: &self.receipts,
                metrics: &self.metrics,
                started: &self.started,
                shutdown: &self.shutdown,
                max_tolerated_block_time: self.config.max_tolerated_block_time,
                head_block: None,
                parent_state: B256::ZERO,
                error_block: None,
            };

            let (count, callback_error) = self
                .store
                .iterate(CursorKind::Vm, per_iteration, true, &mut handler)
                .await
                .map_err(ExecutionError::Store)?;
            let head_block = handler.head_block.take();
            let error_block = handler.error_block.take();

            total += count;
            last_count = count;

            if let Some(err) = callback_error {
                if matches!(err, ExecutionError::Stopped) {
                    debug!(executed = total, "execution interrupted by shutdown");
                    return Ok(total);
                }
                let Some(error_block) = error_block else {
                    // failed outside any block's scope; abort the outer loop
                    return Err(err);
                };

                let number = error_block.header.number;
                let hash = block_hash(&error_block);
                self.emit(ExecutionEvent::VmError {
                    number,
                    hash,
                    message: err.to_string(),
                });
                warn!(number, %hash, error = %err, "block execution failed, cursor stays at last good block");

                if err.is_missing_state_root() && number > 1 {
                    self.backstep(&inner, head_block).await?;
                }
                return Ok(total);
            }

            start_head = self
                .store
                .iterator_head(CursorKind::Vm)
                .await
                .map_err(ExecutionError::Store)?;
            canonical = self
                .store
                .canonical_head()
                .await
                .map_err(ExecutionError::Store)?;
        }

        Ok(total)
    }

    /// Rewind the `vm` cursor so that the iterator re-delivers an ancestor
    /// whose state is still materialized. One step per failure; repeated
    /// failures back-step again on the next run.
    async fn backstep(
        &self,
        inner: &GateGuard<'_, EngineInner<V>>,
        head_block: Option<Block>,
    ) -> Result<(), ExecutionError> {
        let Some(head_block) = head_block else {
            error!("no parent tracked for the failed block, cannot back-step");
            return Ok(());
        };

        let candidate = if head_block.header.number > 1 {
            self.store
                .get_block_by_hash(&head_block.header.parent_hash)
                .await
                .map_err(ExecutionError::Store)?
        } else {
            Some(head_block)
        };
        let Some(candidate) = candidate else {
            error!("back-step candidate is missing from the store");
            return Ok(());
        };

        let number = candidate.header.number;
        let root = candidate.header.state_root;
        if inner.vm.state().has_state_root(&root) {
            // land on the candidate's parent so the candidate is the next
            // block the iterator delivers
            warn!(
                number,
                %root,
                "rewinding vm cursor to retry the transition into an executable ancestor"
            );
            self.store
                .set_iterator_head(CursorKind::Vm, candidate.header.parent_hash)
                .await
                .map_err(ExecutionError::Store)?;
            self.metrics.backsteps.inc();
        } else {
            error!(
                number,
                %root,
                "ancestor state is not materialized either, manual intervention required"
            );
        }
        Ok(())
    }

    /// Execute a candidate block without promoting it: stash its receipts
    /// and (unless `skip_blockchain`) stage its records without touching the
    /// canonical number -> hash table.
    ///
    /// Non-blocking callers get `false` back when another mutation holds the
    /// gate. When `receipts` is supplied (we built the block ourselves)
    /// re-execution is skipped.
    pub async fn run_without_set_head(
        &self,
        block: &Block,
        receipts: Option<BlockReceipts>,
        blocking: bool,
        skip_blockchain: bool,
    ) -> Result<bool, ExecutionError> {
        if !blocking && self.running() {
            return Ok(false);
        }

        let mut inner = self.gate.acquire().await;
        if self.is_shutdown() {
            return Err(ExecutionError::Stopped);
        }

        let number = block.header.number;
        let hash = block_hash(block);

        let receipts = match receipts {
            Some(receipts) => receipts,
            None => {
                let parent = self
                    .store
                    .get_block_by_hash(&block.header.parent_hash)
                    .await
                    .map_err(ExecutionError::Store)?
                    .ok_or(ExecutionError::UnknownParent {
                        hash: block.header.parent_hash,
                    })?;
                let root = parent.header.state_root;
                let clear_cache = inner.vm.state().state_root() != root;

                let td = self
                    .store
                    .get_total_difficulty(&block.header.parent_hash)
                    .await
                    .map_err(ExecutionError::Store)?;
                let fork = self.chain.hardfork_for(number, td, block.header.timestamp);
                if fork != inner.hardfork {
                    info!(number, from = %inner.hardfork, to = %fork, "hardfork transition");
                    inner.hardfork = fork;
                    inner.vm.set_hardfork(fork);
                }

                let outcome = inner
                    .vm
                    .run_block(RunBlockOpts {
                        block,
                        root,
                        clear_cache,
                        skip_block_validation: self.chain.is_proof_of_authority(),
                        skip_header_validation: true,
                    })
                    .await?;

                self.metrics.blocks_executed.inc();
                self.metrics
                    .txs_executed
                    .add(block.body.transactions.len() as u64);
                self.metrics.gas_processed.add(outcome.gas_used);
                outcome.receipts
            }
        };

        inner.pending_receipts.insert(hash, receipts);
        debug!(number, %hash, "executed block without head update");

        if !skip_blockchain {
            let parent_td = self
                .store
                .get_total_difficulty(&block.header.parent_hash)
                .await
                .map_err(ExecutionError::Store)?
                .ok_or(ExecutionError::UnknownParent {
                    hash: block.header.parent_hash,
                })?;
            self.store
                .batch(vec![
                    StoreOp::SetTotalDifficulty {
                        hash,
                        td: parent_td + block.header.difficulty,
                    },
                    StoreOp::SetBlockRecord {
                        block: block.clone(),
                    },
                    StoreOp::SetHashToNumber { hash, number },
                ])
                .await
                .map_err(ExecutionError::Store)?;
        }

        Ok(true)
    }

    /// Promote previously executed blocks: canonicalize them, drain their
    /// pending receipts, verify every named pointer landed on the canonical
    /// chain, advance the cursors, and announce the new tip once.
    ///
    /// Only the new head's state must be materialized. `safe` and
    /// `finalized` may point at ancestors whose state was never pulled
    /// locally (snap-synced ranges), so they are not checked.
    pub async fn set_head(
        &self,
        blocks: &[Block],
        safe: Option<&Block>,
        finalized: Option<&Block>,
    ) -> Result<(), ExecutionError> {
        let mut inner = self.gate.acquire().await;
        if self.is_shutdown() {
            return Err(ExecutionError::Stopped);
        }

        let vm_head = blocks.last().ok_or(ExecutionError::EmptyHeadUpdate)?;
        let root = vm_head.header.state_root;
        if !inner.vm.state().has_state_root(&root) {
            // executing from a head without state would stall immediately
            return Err(ExecutionError::HeadStateMissing {
                number: vm_head.header.number,
                root,
            });
        }

        self.store
            .put_blocks(blocks, true, true)
            .await
            .map_err(ExecutionError::Store)?;

        for block in blocks {
            let hash = block_hash(block);
            if let Some(receipts) = inner.pending_receipts.remove(&hash) {
                self.receipts
                    .save_receipts(block, &receipts)
                    .await
                    .map_err(ExecutionError::Store)?;
            }
        }

        let mut named: Vec<&Block> = vec![vm_head];
        named.extend(safe);
        named.extend(finalized);
        for block in named {
            let number = block.header.number;
            let hash = block_hash(block);
            let canonical = self
                .store
                .get_block_by_number(number)
                .await
                .map_err(ExecutionError::Store)?;
            if canonical.map(|b| block_hash(&b)) != Some(hash) {
                return Err(ExecutionError::NonCanonical { number, hash });
            }
        }

        let head_hash = block_hash(vm_head);
        self.store
            .set_iterator_head(CursorKind::Vm, head_hash)
            .await
            .map_err(ExecutionError::Store)?;
        if let Some(safe) = safe {
            self.store
                .set_iterator_head(CursorKind::Safe, block_hash(safe))
                .await
                .map_err(ExecutionError::Store)?;
        }
        if let Some(finalized) = finalized {
            self.store
                .set_iterator_head(CursorKind::Finalized, block_hash(finalized))
                .await
                .map_err(ExecutionError::Store)?;
        }

        // putBlocks above was event-suppressed; announce the move once
        self.store
            .update(false)
            .await
            .map_err(ExecutionError::Store)?;

        info!(
            number = vm_head.header.number,
            hash = %head_hash,
            "vm head updated"
        );
        Ok(())
    }

    /// Replay `[first, last]` on a shallow VM copy for tracing; persists
    /// nothing and leaves normal execution undisturbed.
    pub async fn execute_blocks(
        &self,
        first: u64,
        last: u64,
        txs: &ReplayTxs,
    ) -> Result<ReplaySummary, ExecutionError> {
        if first == 0 || first > last {
            return Err(ExecutionError::InvalidRange { first, last });
        }
        info!(first, last, "replaying blocks on a copied vm");

        let (mut vm, mut fork) = {
            let inner = self.gate.acquire().await;
            (inner.vm.shallow_copy(false), inner.hardfork)
        };

        let mut summary = ReplaySummary::default();
        for number in first..=last {
            let block = self
                .store
                .get_block_by_number(number)
                .await
                .map_err(ExecutionError::Store)?
                .ok_or(ExecutionError::UnknownBlock { number })?;
            let parent = self
                .store
                .get_block_by_hash(&block.header.parent_hash)
                .await
                .map_err(ExecutionError::Store)?
                .ok_or(ExecutionError::UnknownParent {
                    hash: block.header.parent_hash,
                })?;
            let root = parent.header.state_root;

            let td = self
                .store
                .get_total_difficulty(&block.header.parent_hash)
                .await
                .map_err(ExecutionError::Store)?;
            let next_fork = self.chain.hardfork_for(number, td, block.header.timestamp);
            if next_fork != fork {
                fork = next_fork;
                vm.set_hardfork(fork);
            }

            match txs {
                ReplayTxs::FullBlocks => {
                    let outcome = vm
                        .run_block(RunBlockOpts {
                            block: &block,
                            root,
                            clear_cache: true,
                            skip_block_validation: true,
                            skip_header_validation: true,
                        })
                        .await?;
                    summary.blocks += 1;
                    summary.txs += block.body.transactions.len();
                    summary.gas_used += outcome.gas_used;
                }
                ReplayTxs::All | ReplayTxs::Hashes(_) => {
                    for (index, tx) in block.body.transactions.iter().enumerate() {
                        if let ReplayTxs::Hashes(hashes) = txs {
                            if !hashes.contains(tx.tx_hash()) {
                                continue;
                            }
                        }
                        let outcome = vm.run_tx(&block, root, index).await?;
                        summary.txs += 1;
                        summary.gas_used += outcome.gas_used;
                    }
                    summary.blocks += 1;
                }
            }
        }

        Ok(summary)
    }

    fn spawn_stats_task(&self) {
        let mut slot = self.stats_task.lock().unwrap();
        if slot.is_some() {
            return;
        }

        let metrics = self.metrics.clone();
        let period = self.config.stats_report_interval;
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last = metrics.snapshot();
            loop {
                interval.tick().await;
                let current = metrics.snapshot();
                info!(
                    blocks = current.blocks_executed,
                    new_blocks = current.blocks_executed - last.blocks_executed,
                    txs = current.txs_executed,
                    gas = current.gas_processed,
                    reorgs = current.reorgs_handled,
                    backsteps = current.backsteps,
                    slow_blocks = current.slow_blocks,
                    cache_clears = current.cache_clears,
                    "execution statistics"
                );
                last = current;
            }
        }));
    }

    fn emit(&self, event: ExecutionEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }
}

/// Initial account state derived from the chain's genesis allocation.
pub fn genesis_state(chain: &ChainSpec) -> StateSnapshot {
    chain
        .genesis
        .alloc
        .iter()
        .map(|(address, account)| {
            (
                *address,
                AccountState {
                    nonce: account.nonce,
                    balance: account.balance,
                },
            )
        })
        .collect()
}

/// Per-block callback state for one `iterate` pass.
struct RunHandler<'a, V> {
    vm: &'a mut V,
    hardfork: &'a mut Hardfork,
    chain: &'a ChainSpec,
    store: &'a BlockStore,
    receipts: &'a ReceiptsManager,
    metrics: &'a ExecutionMetrics,
    started: &'a AtomicBool,
    shutdown: &'a AtomicBool,
    max_tolerated_block_time: Duration,

    /// Parent of the next expected block; `None` until the first delivery.
    head_block: Option<Block>,
    parent_state: B256,
    /// The block whose execution failed, if any.
    error_block: Option<Block>,
}

impl<V: BlockRunner> BlockHandler for RunHandler<'_, V> {
    type Error = ExecutionError;

    async fn handle(&mut self, block: Block, reorg: bool) -> Result<(), ExecutionError> {
        let number = block.header.number;
        let hash = block_hash(&block);

        // parent state selection: on the first delivery or after a reorg the
        // per-block caches are stale and execution re-anchors on the stored
        // parent
        let clear_cache = if self.head_block.is_none() || reorg {
            let parent = self
                .store
                .get_block_by_hash(&block.header.parent_hash)
                .await
                .map_err(ExecutionError::Store)?
                .ok_or(ExecutionError::UnknownParent {
                    hash: block.header.parent_hash,
                })?;
            self.parent_state = parent.header.state_root;
            self.head_block = Some(parent);
            if reorg {
                self.metrics.reorgs_handled.inc();
            }
            true
        } else {
            self.vm.state().state_root() != self.parent_state
        };
        if clear_cache {
            self.metrics.cache_clears.inc();
        }

        // hardfork transition must happen before the block runs
        let td = self
            .store
            .get_total_difficulty(&block.header.parent_hash)
            .await
            .map_err(ExecutionError::Store)?;
        let fork = self.chain.hardfork_for(number, td, block.header.timestamp);
        if fork != *self.hardfork {
            info!(number, from = %self.hardfork, to = %fork, "hardfork transition");
            *self.hardfork = fork;
            self.vm.set_hardfork(fork);
        }

        if !self.started.load(Ordering::SeqCst) || self.shutdown.load(Ordering::SeqCst) {
            return Err(ExecutionError::Stopped);
        }

        let started_at = Instant::now();
        let result = self
            .vm
            .run_block(RunBlockOpts {
                block: &block,
                root: self.parent_state,
                clear_cache,
                // headers come from the validated store; block validation is
                // additionally skipped under proof-of-authority, where signer
                // checks already ran upstream
                skip_block_validation: self.chain.is_proof_of_authority(),
                skip_header_validation: true,
            })
            .await;
        let elapsed = started_at.elapsed();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.error_block = Some(block);
                return Err(e.into());
            }
        };

        if elapsed > self.max_tolerated_block_time {
            warn!(
                number,
                %hash,
                txs = block.body.transactions.len(),
                gas_used = outcome.gas_used,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow block execution"
            );
            self.metrics.slow_blocks.inc();
        }

        // receipts must be durable before the cursor advances past the block
        self.receipts
            .save_receipts(&block, &outcome.receipts)
            .await
            .map_err(ExecutionError::Store)?;

        self.metrics.blocks_executed.inc();
        self.metrics
            .txs_executed
            .add(block.body.transactions.len() as u64);
        self.metrics.gas_processed.add(outcome.gas_used);

        self.parent_state = block.header.state_root;
        self.head_block = Some(block);
        Ok(())
    }
}
