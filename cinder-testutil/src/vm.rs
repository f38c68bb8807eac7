use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use alloy_primitives::{B256, U256};
use cinder_chain_config::Hardfork;
use cinder_execution::{BlockRunner, RunBlockOpts, RunBlockOutcome, TxReplayOutcome, VmError};
use cinder_state_backend::{AccountState, InMemoryTrie, StateBackend};
use cinder_types::{block_hash, Block, BlockReceipts};

use crate::{derived_state_root, mock_receipt};

const CACHE_LIMIT: usize = 128;

/// One `run_block` invocation as the mock VM saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub number: u64,
    pub hash: B256,
    pub clear_cache: bool,
    pub hardfork: Hardfork,
    pub skip_block_validation: bool,
}

#[derive(Default)]
struct MockVmShared {
    runs: Vec<RunRecord>,
    fail_at: Option<u64>,
    delay: Option<Duration>,
    in_flight: u32,
    max_in_flight: u32,
}

/// Deterministic VM over [`InMemoryTrie`]: charges a flat gas fee per
/// transaction, credits the beneficiary, and seals the post-state under the
/// header's root after recomputing it from the parent root.
///
/// Shared observation state (run records, failure injection, concurrency
/// highwater) stays connected to every [`MockVmProbe`] and shallow copy.
pub struct MockVm {
    state: InMemoryTrie,
    shared: Arc<Mutex<MockVmShared>>,
    hardfork: Hardfork,
    cache: Vec<B256>,
}

impl MockVm {
    pub fn new(hardfork: Hardfork) -> Self {
        Self {
            state: InMemoryTrie::new(),
            shared: Arc::new(Mutex::new(MockVmShared::default())),
            hardfork,
            cache: Vec::new(),
        }
    }

    pub fn probe(&self) -> MockVmProbe {
        MockVmProbe {
            shared: Arc::clone(&self.shared),
            state: self.state.clone(),
        }
    }

    fn execute(&mut self, opts: &RunBlockOpts<'_>) -> Result<RunBlockOutcome, VmError> {
        let block = opts.block;
        let number = block.header.number;
        let hash = block_hash(block);

        if opts.clear_cache {
            self.cache.clear();
        }

        if !self.state.has_state_root(&opts.root) {
            return Err(VmError::MissingStateRoot(opts.root));
        }
        self.state
            .set_state_root(opts.root)
            .map_err(|_| VmError::MissingStateRoot(opts.root))?;

        let computed = derived_state_root(opts.root, number, &block.header.extra_data);
        if !opts.skip_block_validation && computed != block.header.state_root {
            return Err(VmError::Execution(format!(
                "invalid state root for block {number}: expected {}, computed {computed}",
                block.header.state_root
            )));
        }

        let tx_gas = self.hardfork.params().tx_gas;
        let mut cumulative = 0u64;
        let receipts: BlockReceipts = block
            .body
            .transactions
            .iter()
            .map(|_| {
                cumulative += tx_gas;
                mock_receipt(cumulative)
            })
            .collect();

        self.state.checkpoint();
        let beneficiary = block.header.beneficiary;
        let account = self.state.account(&beneficiary).unwrap_or_default();
        self.state.set_account(
            beneficiary,
            AccountState {
                nonce: account.nonce + 1,
                balance: account.balance + U256::from(cumulative),
            },
        );

        let injected = self.shared.lock().unwrap().fail_at == Some(number);
        if injected {
            // roll the partial state back before surfacing the failure
            self.state
                .revert()
                .map_err(|e| VmError::Execution(e.to_string()))?;
            return Err(VmError::Execution(format!(
                "injected failure at block {number}"
            )));
        }
        self.state
            .commit()
            .map_err(|e| VmError::Execution(e.to_string()))?;
        self.state.seal_state(block.header.state_root);

        self.cache.push(hash);
        if self.cache.len() > CACHE_LIMIT {
            self.cache.remove(0);
        }

        self.shared.lock().unwrap().runs.push(RunRecord {
            number,
            hash,
            clear_cache: opts.clear_cache,
            hardfork: self.hardfork,
            skip_block_validation: opts.skip_block_validation,
        });

        Ok(RunBlockOutcome {
            gas_used: cumulative,
            receipts,
            state_root: block.header.state_root,
        })
    }
}

impl BlockRunner for MockVm {
    type State = InMemoryTrie;

    fn init(&mut self) -> Result<(), VmError> {
        Ok(())
    }

    fn state(&self) -> &InMemoryTrie {
        &self.state
    }

    fn state_mut(&mut self) -> &mut InMemoryTrie {
        &mut self.state
    }

    fn set_hardfork(&mut self, fork: Hardfork) {
        self.hardfork = fork;
    }

    async fn run_block(&mut self, opts: RunBlockOpts<'_>) -> Result<RunBlockOutcome, VmError> {
        let delay = {
            let mut shared = self.shared.lock().unwrap();
            shared.in_flight += 1;
            shared.max_in_flight = shared.max_in_flight.max(shared.in_flight);
            shared.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = self.execute(&opts);
        self.shared.lock().unwrap().in_flight -= 1;
        result
    }

    async fn run_tx(
        &mut self,
        block: &Block,
        root: B256,
        tx_index: usize,
    ) -> Result<TxReplayOutcome, VmError> {
        if !self.state.has_state_root(&root) {
            return Err(VmError::MissingStateRoot(root));
        }
        if block.body.transactions.get(tx_index).is_none() {
            return Err(VmError::Execution(format!(
                "block {} has no transaction at index {tx_index}",
                block.header.number
            )));
        }
        let tx_gas = self.hardfork.params().tx_gas;
        Ok(TxReplayOutcome {
            gas_used: tx_gas,
            receipt: mock_receipt(tx_gas * (tx_index as u64 + 1)),
        })
    }

    fn shallow_copy(&self, preserve_caches: bool) -> Self {
        Self {
            state: self.state.clone(),
            shared: Arc::clone(&self.shared),
            hardfork: self.hardfork,
            cache: if preserve_caches {
                self.cache.clone()
            } else {
                Vec::new()
            },
        }
    }
}

/// Test-side window into a [`MockVm`] that has been moved into the engine.
#[derive(Clone)]
pub struct MockVmProbe {
    shared: Arc<Mutex<MockVmShared>>,
    /// Shares the VM's materialized roots; lets tests drop state roots out
    /// from under the engine.
    pub state: InMemoryTrie,
}

impl MockVmProbe {
    pub fn runs(&self) -> Vec<RunRecord> {
        self.shared.lock().unwrap().runs.clone()
    }

    pub fn clear_runs(&self) {
        self.shared.lock().unwrap().runs.clear();
    }

    pub fn set_fail_at(&self, number: Option<u64>) {
        self.shared.lock().unwrap().fail_at = number;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        self.shared.lock().unwrap().delay = delay;
    }

    /// Highest number of concurrently executing `run_block` calls observed.
    pub fn max_in_flight(&self) -> u32 {
        self.shared.lock().unwrap().max_in_flight
    }
}
