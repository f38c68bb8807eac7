use std::{sync::Arc, time::Duration};

use cinder_chain_config::{ChainSpec, ConsensusType, ForkCondition, GenesisSpec, Hardfork};
use cinder_execution::{
    ExecutionConfig, ExecutionError, ExecutionEvent, OpenResult, ReplayTxs, VmExecution,
};
use cinder_testutil::{
    build_fork, expected_receipts, setup_chain, MockVm, MockVmProbe, TestChain, MAIN_TAG,
};
use cinder_state_backend::StateBackend;
use cinder_types::{block_hash, CursorKind};

const TX_GAS: u64 = 21_000;

fn pow_spec() -> ChainSpec {
    ChainSpec::dev(ConsensusType::ProofOfWork, Hardfork::Berlin)
}

fn pos_spec() -> ChainSpec {
    ChainSpec::dev(ConsensusType::ProofOfStake, Hardfork::Shanghai)
}

fn batched_config(num_blocks_per_iteration: usize) -> ExecutionConfig {
    ExecutionConfig {
        num_blocks_per_iteration,
        ..Default::default()
    }
}

fn engine_for(
    chain: &TestChain,
    config: ExecutionConfig,
) -> (Arc<VmExecution<MockVm>>, MockVmProbe) {
    let vm = MockVm::new(Hardfork::Frontier);
    let probe = vm.probe();
    let engine = Arc::new(VmExecution::new(
        vm,
        Arc::clone(&chain.spec),
        chain.store.clone(),
        chain.receipts.clone(),
        config,
    ));
    (engine, probe)
}

async fn vm_cursor_number(chain: &TestChain) -> u64 {
    chain
        .store
        .iterator_head(CursorKind::Vm)
        .await
        .unwrap()
        .header
        .number
}

#[tokio::test]
async fn linear_sync_executes_to_the_tip() {
    let chain = setup_chain(pow_spec(), 10, 2).await;
    let (engine, _probe) = engine_for(&chain, ExecutionConfig::default());

    assert_eq!(engine.open().await.unwrap(), OpenResult::Opened);
    let executed = engine.run(true, false).await.unwrap();
    assert_eq!(executed, 10);

    let cursor = chain.store.iterator_head(CursorKind::Vm).await.unwrap();
    assert_eq!(block_hash(&cursor), block_hash(&chain.blocks[10]));

    // every executed block has durable receipts matching re-derivation
    for block in &chain.blocks[1..] {
        let receipts = chain
            .receipts
            .get_receipts(&block_hash(block))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(receipts, expected_receipts(block, TX_GAS));
    }

    // and the tx index resolves positions
    let tx = &chain.blocks[7].body.transactions[1];
    let entry = chain
        .receipts
        .get_tx_receipt(tx.tx_hash())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.block_hash, block_hash(&chain.blocks[7]));
    assert_eq!(entry.tx_index, 1);

    assert_eq!(engine.metrics().blocks_executed, 10);
    assert_eq!(engine.metrics().txs_executed, 20);
}

#[tokio::test]
async fn batched_runs_advance_in_iteration_sized_steps() {
    let chain = setup_chain(pow_spec(), 10, 1).await;
    let (engine, _probe) = engine_for(&chain, batched_config(4));
    engine.open().await.unwrap();

    assert_eq!(engine.run(false, false).await.unwrap(), 4);
    assert_eq!(vm_cursor_number(&chain).await, 4);

    assert_eq!(engine.run(false, false).await.unwrap(), 4);
    assert_eq!(vm_cursor_number(&chain).await, 8);

    assert_eq!(engine.run(false, false).await.unwrap(), 2);
    assert_eq!(vm_cursor_number(&chain).await, 10);

    // cursor never went backwards and is now caught up
    assert_eq!(engine.run(true, false).await.unwrap(), 0);
}

#[tokio::test]
async fn only_batched_skips_small_gaps() {
    let chain = setup_chain(pow_spec(), 3, 1).await;
    let (engine, _probe) = engine_for(&chain, batched_config(50));
    engine.open().await.unwrap();

    assert_eq!(engine.run(true, true).await.unwrap(), 0);
    assert_eq!(vm_cursor_number(&chain).await, 0);

    assert_eq!(engine.run(true, false).await.unwrap(), 3);
    assert_eq!(vm_cursor_number(&chain).await, 3);
}

#[tokio::test]
async fn hardfork_switches_before_the_transition_block_runs() {
    let spec = ChainSpec {
        name: "forked-dev".into(),
        consensus: ConsensusType::ProofOfWork,
        genesis: GenesisSpec::default(),
        schedule: vec![
            (Hardfork::Berlin, ForkCondition::Block(0)),
            (Hardfork::London, ForkCondition::Block(5)),
        ],
    };
    let chain = setup_chain(spec, 10, 1).await;
    let (engine, probe) = engine_for(&chain, ExecutionConfig::default());

    engine.open().await.unwrap();
    assert_eq!(engine.hardfork().await, Hardfork::Berlin);

    assert_eq!(engine.run(true, false).await.unwrap(), 10);
    assert_eq!(engine.hardfork().await, Hardfork::London);

    let runs = probe.runs();
    assert_eq!(runs.len(), 10);
    for record in &runs {
        let expected = if record.number >= 5 {
            Hardfork::London
        } else {
            Hardfork::Berlin
        };
        assert_eq!(record.hardfork, expected, "block {}", record.number);
    }
}

#[tokio::test]
async fn reorg_reanchors_on_the_new_branch_with_cleared_caches() {
    let chain = setup_chain(pow_spec(), 10, 1).await;
    let (engine, probe) = engine_for(&chain, batched_config(8));
    engine.open().await.unwrap();

    assert_eq!(engine.run(false, false).await.unwrap(), 8);
    assert_eq!(vm_cursor_number(&chain).await, 8);

    // the canonical chain swaps to a branch diverging after block 5
    let fork = build_fork(&chain.spec, &chain.blocks[5], 4, b"fork-b", 1);
    chain.store.put_blocks(&fork, true, true).await.unwrap();

    probe.clear_runs();
    assert_eq!(engine.run(true, false).await.unwrap(), 4);

    let runs = probe.runs();
    assert_eq!(runs[0].number, 6);
    assert!(runs[0].clear_cache, "first block after a reorg must clear caches");
    assert_eq!(
        runs.iter().map(|r| r.number).collect::<Vec<_>>(),
        vec![6, 7, 8, 9]
    );

    let cursor = chain.store.iterator_head(CursorKind::Vm).await.unwrap();
    assert_eq!(block_hash(&cursor), block_hash(fork.last().unwrap()));
    assert_eq!(engine.metrics().reorgs_handled, 1);
}

#[tokio::test]
async fn missing_state_root_backsteps_and_recovers() {
    let chain = setup_chain(pow_spec(), 10, 1).await;
    let (engine, probe) = engine_for(&chain, batched_config(5));
    engine.open().await.unwrap();

    assert_eq!(engine.run(false, false).await.unwrap(), 5);
    assert_eq!(vm_cursor_number(&chain).await, 5);

    // the state of block 5 disappears out from under the engine
    let missing_root = chain.blocks[5].header.state_root;
    assert!(probe.state.delete_state_root(&missing_root));

    let mut events = engine.subscribe();
    assert_eq!(engine.run(true, false).await.unwrap(), 0);

    // rewound to block 3 so that block 4 is re-delivered next
    let cursor = chain.store.iterator_head(CursorKind::Vm).await.unwrap();
    assert_eq!(block_hash(&cursor), block_hash(&chain.blocks[3]));
    assert_eq!(engine.metrics().backsteps, 1);

    match events.try_recv().unwrap() {
        ExecutionEvent::VmError { number, hash, message } => {
            assert_eq!(number, 6);
            assert_eq!(hash, block_hash(&chain.blocks[6]));
            assert!(message.contains("does not contain state root"));
        }
    }

    // re-running from the rewound cursor re-materializes the missing root
    // and reaches the tip
    assert_eq!(engine.run(true, false).await.unwrap(), 7);
    assert_eq!(vm_cursor_number(&chain).await, 10);
    assert!(probe.state.has_state_root(&missing_root));
}

#[tokio::test]
async fn engine_api_flow_stages_then_promotes() {
    let chain = setup_chain(pos_spec(), 10, 2).await;
    let (engine, _probe) = engine_for(&chain, ExecutionConfig::default());
    engine.open().await.unwrap();
    assert_eq!(engine.run(true, false).await.unwrap(), 10);

    let b11 = build_fork(&chain.spec, &chain.blocks[10], 1, MAIN_TAG, 2)
        .pop()
        .unwrap();
    let b11_hash = block_hash(&b11);

    assert!(engine
        .run_without_set_head(&b11, None, true, false)
        .await
        .unwrap());
    assert_eq!(engine.pending_receipt_count().await, 1);

    // staged but not canonical: visible by hash, invisible by number
    assert!(chain.store.get_block_by_number(11).await.unwrap().is_none());
    assert!(chain
        .store
        .get_block_by_hash(&b11_hash)
        .await
        .unwrap()
        .is_some());
    assert!(chain
        .receipts
        .get_receipts(&b11_hash)
        .await
        .unwrap()
        .is_none());

    let mut chain_events = chain.store.subscribe();
    engine
        .set_head(std::slice::from_ref(&b11), None, Some(&chain.blocks[10]))
        .await
        .unwrap();

    let cursor = chain.store.iterator_head(CursorKind::Vm).await.unwrap();
    assert_eq!(block_hash(&cursor), b11_hash);
    let finalized = chain
        .store
        .iterator_head(CursorKind::Finalized)
        .await
        .unwrap();
    assert_eq!(block_hash(&finalized), block_hash(&chain.blocks[10]));

    // pending receipts drained into the canonical index
    assert_eq!(engine.pending_receipt_count().await, 0);
    let receipts = chain
        .receipts
        .get_receipts(&b11_hash)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(receipts, expected_receipts(&b11, TX_GAS));

    // chain-updated fires exactly once
    assert!(chain_events.try_recv().is_ok());
    assert!(chain_events.try_recv().is_err());
}

#[tokio::test]
async fn run_without_set_head_can_skip_blockchain_writes() {
    let chain = setup_chain(pos_spec(), 5, 1).await;
    let (engine, _probe) = engine_for(&chain, ExecutionConfig::default());
    engine.open().await.unwrap();
    engine.run(true, false).await.unwrap();

    let b6 = build_fork(&chain.spec, &chain.blocks[5], 1, MAIN_TAG, 1)
        .pop()
        .unwrap();
    assert!(engine
        .run_without_set_head(&b6, None, true, true)
        .await
        .unwrap());

    assert_eq!(engine.pending_receipt_count().await, 1);
    assert!(chain
        .store
        .get_block_by_hash(&block_hash(&b6))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn set_head_rejects_unmaterialized_head_state() {
    let chain = setup_chain(pos_spec(), 5, 1).await;
    let (engine, _probe) = engine_for(&chain, ExecutionConfig::default());
    engine.open().await.unwrap();
    engine.run(true, false).await.unwrap();

    // never executed, so its post-state does not exist locally
    let b6 = build_fork(&chain.spec, &chain.blocks[5], 1, MAIN_TAG, 1)
        .pop()
        .unwrap();
    let err = engine
        .set_head(std::slice::from_ref(&b6), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::HeadStateMissing { number: 6, .. }));
}

#[tokio::test]
async fn set_head_rejects_non_canonical_pointers() {
    let chain = setup_chain(pos_spec(), 10, 1).await;
    let (engine, _probe) = engine_for(&chain, ExecutionConfig::default());
    engine.open().await.unwrap();
    engine.run(true, false).await.unwrap();

    let b11 = build_fork(&chain.spec, &chain.blocks[10], 1, MAIN_TAG, 1)
        .pop()
        .unwrap();
    engine
        .run_without_set_head(&b11, None, true, false)
        .await
        .unwrap();

    // a finalized pointer from a branch that never became canonical
    let stray = build_fork(&chain.spec, &chain.blocks[9], 1, b"stray", 1)
        .pop()
        .unwrap();
    let err = engine
        .set_head(std::slice::from_ref(&b11), None, Some(&stray))
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::NonCanonical { number: 10, .. }));

    // the vm cursor did not move
    assert_eq!(vm_cursor_number(&chain).await, 10);
}

#[tokio::test]
async fn set_head_with_no_blocks_fails() {
    let chain = setup_chain(pos_spec(), 2, 1).await;
    let (engine, _probe) = engine_for(&chain, ExecutionConfig::default());
    engine.open().await.unwrap();

    let err = engine.set_head(&[], None, None).await.unwrap_err();
    assert!(matches!(err, ExecutionError::EmptyHeadUpdate));
}

#[tokio::test]
async fn mutators_are_mutually_exclusive() {
    let chain = setup_chain(pow_spec(), 30, 1).await;
    let (engine, probe) = engine_for(&chain, ExecutionConfig::default());
    probe.set_delay(Some(Duration::from_millis(5)));
    engine.open().await.unwrap();

    let b31 = build_fork(&chain.spec, &chain.blocks[30], 1, MAIN_TAG, 1)
        .pop()
        .unwrap();

    let run_engine = Arc::clone(&engine);
    let run_task = tokio::spawn(async move { run_engine.run(true, false).await });

    while !engine.running() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // a non-blocking caller observes the run and bows out
    assert!(!engine
        .run_without_set_head(&b31, None, false, false)
        .await
        .unwrap());

    // a blocking caller queues behind the run
    let blocking_engine = Arc::clone(&engine);
    let staged = b31.clone();
    let blocking = tokio::spawn(async move {
        blocking_engine
            .run_without_set_head(&staged, None, true, false)
            .await
    });

    assert_eq!(run_task.await.unwrap().unwrap(), 30);
    assert!(blocking.await.unwrap().unwrap());

    // at no point did two block executions overlap
    assert_eq!(probe.max_in_flight(), 1);
}

#[tokio::test]
async fn open_is_single_shot() {
    let chain = setup_chain(pow_spec(), 2, 1).await;
    let (engine, _probe) = engine_for(&chain, ExecutionConfig::default());

    assert_eq!(engine.open().await.unwrap(), OpenResult::Opened);
    assert_eq!(engine.open().await.unwrap(), OpenResult::AlreadyOpen);
}

#[tokio::test]
async fn start_spawns_catchup_and_stop_interrupts_it() {
    let chain = setup_chain(pow_spec(), 50, 1).await;
    let (engine, probe) = engine_for(&chain, ExecutionConfig::default());
    probe.set_delay(Some(Duration::from_millis(5)));

    engine.open().await.unwrap();
    assert!(engine.start().await.unwrap());

    tokio::time::sleep(Duration::from_millis(30)).await;
    engine.stop().await.unwrap();

    assert!(!engine.started());
    assert!(vm_cursor_number(&chain).await < 50);

    // a stopped engine refuses further runs
    assert_eq!(engine.run(true, false).await.unwrap(), 0);
}

#[tokio::test]
async fn post_merge_start_spawns_no_autonomous_run() {
    let chain = setup_chain(pos_spec(), 10, 1).await;
    let (engine, _probe) = engine_for(&chain, ExecutionConfig::default());

    engine.open().await.unwrap();
    assert!(!engine.start().await.unwrap());
    assert_eq!(vm_cursor_number(&chain).await, 0);
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn debug_replay_runs_on_a_copy() {
    let chain = setup_chain(pow_spec(), 10, 2).await;
    let (engine, probe) = engine_for(&chain, ExecutionConfig::default());
    engine.open().await.unwrap();
    assert_eq!(engine.run(true, false).await.unwrap(), 10);

    probe.clear_runs();
    let summary = engine
        .execute_blocks(2, 5, &ReplayTxs::FullBlocks)
        .await
        .unwrap();
    assert_eq!(summary.blocks, 4);
    assert_eq!(summary.txs, 8);
    assert_eq!(summary.gas_used, 8 * TX_GAS);

    // the replay ran on a copy: the vm cursor is untouched and a normal run
    // still reports a caught-up chain
    assert_eq!(vm_cursor_number(&chain).await, 10);
    assert_eq!(engine.run(true, false).await.unwrap(), 0);

    // selected-transaction replay
    let tx = &chain.blocks[3].body.transactions[1];
    let summary = engine
        .execute_blocks(3, 3, &ReplayTxs::Hashes(vec![*tx.tx_hash()]))
        .await
        .unwrap();
    assert_eq!(summary.blocks, 1);
    assert_eq!(summary.txs, 1);

    // per-transaction replay of every transaction
    let summary = engine.execute_blocks(2, 4, &ReplayTxs::All).await.unwrap();
    assert_eq!(summary.txs, 6);

    let err = engine
        .execute_blocks(0, 5, &ReplayTxs::FullBlocks)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::InvalidRange { .. }));
}

#[tokio::test]
async fn vm_failure_stops_the_run_and_keeps_the_cursor() {
    let chain = setup_chain(pow_spec(), 10, 1).await;
    let (engine, probe) = engine_for(&chain, ExecutionConfig::default());
    engine.open().await.unwrap();

    probe.set_fail_at(Some(7));
    let mut events = engine.subscribe();

    assert_eq!(engine.run(true, false).await.unwrap(), 6);
    assert_eq!(vm_cursor_number(&chain).await, 6);
    assert!(matches!(
        events.try_recv().unwrap(),
        ExecutionEvent::VmError { number: 7, .. }
    ));
    // no backstep for generic execution failures
    assert_eq!(engine.metrics().backsteps, 0);

    // the failed block is preserved in the store for debugging
    assert!(chain.store.get_block_by_number(7).await.unwrap().is_some());

    // once the fault clears, execution resumes where it stopped
    probe.set_fail_at(None);
    assert_eq!(engine.run(true, false).await.unwrap(), 4);
    assert_eq!(vm_cursor_number(&chain).await, 10);
}
