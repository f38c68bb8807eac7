//! Block-execution engine: advances a `vm` cursor along the canonical
//! chain, re-executing each block on the state backend and persisting
//! receipts, while reconciling with fork-choice updates from a consensus
//! client.

pub mod engine;
pub mod errors;
pub mod gate;
pub mod metrics;
pub mod vm;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use crate::{
    engine::{genesis_state, ExecutionEvent, OpenResult, ReplaySummary, VmExecution},
    errors::ExecutionError,
    gate::ExecutionGate,
    metrics::{ExecutionMetrics, MetricsSnapshot},
    vm::{BlockRunner, ReplayTxs, RunBlockOpts, RunBlockOutcome, TxReplayOutcome, VmError},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Batch size of one iterator pass; `run` refreshes its view of the
    /// chain between batches.
    pub num_blocks_per_iteration: usize,
    /// Executions slower than this get a warning log.
    pub max_tolerated_block_time: Duration,
    pub stats_report_interval: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            num_blocks_per_iteration: 50,
            max_tolerated_block_time: Duration::from_secs(12),
            stats_report_interval: Duration::from_secs(90),
        }
    }
}
