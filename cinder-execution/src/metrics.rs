use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

#[derive(Clone, Default, Debug)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, val: u64) {
        self.value.fetch_add(val, Ordering::Release);
    }

    pub fn read(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }
}

/// Throughput and cache counters for the execution engine. Cheap to clone;
/// clones observe the same underlying values.
#[derive(Clone, Default, Debug)]
pub struct ExecutionMetrics {
    pub blocks_executed: Counter,
    pub txs_executed: Counter,
    pub gas_processed: Counter,
    pub reorgs_handled: Counter,
    pub backsteps: Counter,
    pub slow_blocks: Counter,
    pub cache_clears: Counter,
}

impl ExecutionMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            blocks_executed: self.blocks_executed.read(),
            txs_executed: self.txs_executed.read(),
            gas_processed: self.gas_processed.read(),
            reorgs_handled: self.reorgs_handled.read(),
            backsteps: self.backsteps.read(),
            slow_blocks: self.slow_blocks.read(),
            cache_clears: self.cache_clears.read(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub blocks_executed: u64,
    pub txs_executed: u64,
    pub gas_processed: u64,
    pub reorgs_handled: u64,
    pub backsteps: u64,
    pub slow_blocks: u64,
    pub cache_clears: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_across_clones() {
        let metrics = ExecutionMetrics::default();
        let clone = metrics.clone();

        metrics.blocks_executed.inc();
        clone.blocks_executed.inc();
        clone.gas_processed.add(21_000);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.blocks_executed, 2);
        assert_eq!(snapshot.gas_processed, 21_000);
        assert_eq!(snapshot.backsteps, 0);
    }
}
