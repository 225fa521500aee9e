//! Ledger Coordination Tests
//!
//! Drives [`CoordinatedBatcher`] against the in-memory ledger:
//! - Concurrent callers share one batch and one create
//! - Race rejections are retried from a fresh read, up to the limit
//! - A batch is executed once, with the ledger batch id, after finalization
//! - Only the coordinator authority records the results hash
//! - Failures after commit reject the waiters and leave the ledger as is
//! - Nothing new is sent for a query once teardown has rejected it

use serde_json::json;
use std::sync::Arc;

use lib_batcher::testing::{MemoryLedger, ScriptedExecutor};
use std::time::Duration;

use lib_batcher::{
    AccountAddress, BatchError, BatcherConfig, CoordinatedBatcher, DriverPhase, ErrorClass,
    LedgerClient, LedgerError, LedgerInstruction, LedgerRejection,
};
use lib_coordinator::{
    results_hash, BatchStatus, CoordinatorErrorCode, CoordinatorInstruction, Pubkey, QueryHash,
    QueryResult, RpcMethod,
};

// ============================================================================
// Test Helpers
// ============================================================================

async fn batcher(ledger: &MemoryLedger, executor: &Arc<ScriptedExecutor>) -> CoordinatedBatcher {
    CoordinatedBatcher::connect(
        BatcherConfig::for_testing(),
        Arc::new(ledger.clone()),
        executor.clone(),
    )
    .await
    .unwrap()
}

async fn wait_for_phase(batcher: &CoordinatedBatcher, phase: DriverPhase) {
    for _ in 0..10_000 {
        if batcher.phase().await == phase {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("driver never reached phase {}", phase);
}

async fn wait_until_idle(batcher: &CoordinatedBatcher) {
    for _ in 0..10_000 {
        if !batcher.is_polling().await {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("poller never went idle");
}

fn is_complete(ix: &CoordinatorInstruction) -> bool {
    matches!(ix, CoordinatorInstruction::CompleteBatch { .. })
}

fn is_finalize(ix: &CoordinatorInstruction) -> bool {
    matches!(ix, CoordinatorInstruction::FinalizeBatch { .. })
}

// ============================================================================
// Batch Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_threshold_batch_executes_once_and_completes() {
    let ledger = MemoryLedger::new(3, 5);
    let executor = Arc::new(ScriptedExecutor::new());
    let batcher = batcher(&ledger, &executor).await;

    let (a, b, c) = tokio::join!(
        batcher.add_query(RpcMethod::GetBalance, "alice", None),
        batcher.add_query(RpcMethod::GetBalance, "bob", None),
        batcher.add_query(RpcMethod::GetAccountInfo, "carol", None),
    );
    assert_eq!(a.unwrap()["target"], "alice");
    assert_eq!(b.unwrap()["target"], "bob");
    assert_eq!(c.unwrap()["method"], "getAccountInfo");

    // One create, one batch, one execution carrying the ledger batch id
    assert_eq!(ledger.create_attempts(), 1);
    assert_eq!(executor.call_count(), 1);
    let requests = executor.requests();
    assert_eq!(requests[0].len(), 3);
    assert_eq!(requests[0].batch_id.as_deref(), Some("0"));
    assert!(requests[0].verify_hash());

    let batch = ledger.batch(0).unwrap();
    assert_eq!(batch.status, BatchStatus::Executed);
    assert_eq!(batch.fingerprint_count, 3);

    // The recorded hash covers the results the executor returned
    let results: Vec<QueryResult> = requests[0]
        .queries
        .iter()
        .map(|q| {
            QueryResult::success(
                q.id.clone(),
                json!({ "method": q.method.as_str(), "target": q.target }),
            )
        })
        .collect();
    assert_eq!(batch.results_hash, Some(results_hash(&results)));
    assert_eq!(ledger.landed_count(is_complete), 1);

    wait_until_idle(&batcher).await;
    assert_eq!(batcher.phase().await, DriverPhase::NoActiveBatch);
    assert_eq!(batcher.active_batch_id().await, None);
    assert_eq!(batcher.pending_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_waits_below_threshold() {
    let ledger = MemoryLedger::new(3, 5);
    let executor = Arc::new(ScriptedExecutor::new());
    let batcher = batcher(&ledger, &executor).await;

    let waiter = {
        let batcher = batcher.clone();
        tokio::spawn(async move { batcher.add_query(RpcMethod::GetBalance, "alice", None).await })
    };
    wait_for_phase(&batcher, DriverPhase::AwaitingThreshold).await;

    assert_eq!(batcher.active_batch_id().await, Some(0));
    assert_eq!(batcher.pending_count().await, 1);
    assert_eq!(ledger.batch(0).unwrap().status, BatchStatus::Open);
    assert_eq!(executor.call_count(), 0);

    batcher.shutdown().await;
    assert!(waiter.await.unwrap().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_same_fingerprint_joins_open_batch() {
    let ledger = MemoryLedger::new(2, 5);
    let executor = Arc::new(ScriptedExecutor::new());
    let batcher = batcher(&ledger, &executor).await;

    let (first, second, other) = tokio::join!(
        batcher.add_query(RpcMethod::GetBalance, "alice", None),
        batcher.add_query(RpcMethod::GetBalance, "alice", None),
        batcher.add_query(RpcMethod::GetBalance, "bob", None),
    );
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert!(other.is_ok());

    // Two distinct fingerprints on the ledger, three queries executed together
    assert_eq!(ledger.batch(0).unwrap().fingerprint_count, 2);
    assert_eq!(executor.call_count(), 1);
    assert_eq!(executor.requests()[0].len(), 3);
}

// ============================================================================
// Races And Retries
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_first_queries_create_one_batch() {
    let ledger = MemoryLedger::new(2, 5);
    let executor = Arc::new(ScriptedExecutor::new());
    let batcher = batcher(&ledger, &executor).await;

    let (a, b) = tokio::join!(
        batcher.add_query(RpcMethod::GetBalance, "alice", None),
        batcher.add_query(RpcMethod::GetBalance, "bob", None),
    );
    assert!(a.is_ok());
    assert!(b.is_ok());

    assert_eq!(ledger.create_attempts(), 1);
    assert_eq!(ledger.config().unwrap().next_batch_id, 1);
    assert_eq!(ledger.batch(0).unwrap().fingerprint_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_race_rejections_are_retried_from_fresh_read() {
    let ledger = MemoryLedger::new(1, 5);
    let executor = Arc::new(ScriptedExecutor::new());
    let batcher = batcher(&ledger, &executor).await;
    let reads_after_connect = ledger.coordinator_reads();

    ledger.fail_next_sends(2, LedgerError::Rejected(LedgerRejection::SeedsMismatch));
    let result = batcher.add_query(RpcMethod::GetBalance, "alice", None).await;

    assert!(result.is_ok());
    assert_eq!(ledger.create_attempts(), 3);
    assert!(ledger.coordinator_reads() - reads_after_connect >= 3);
    assert_eq!(ledger.batch(0).unwrap().fingerprint_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_drops_query() {
    let ledger = MemoryLedger::new(1, 5);
    let executor = Arc::new(ScriptedExecutor::new());
    let batcher = batcher(&ledger, &executor).await;
    let max_retries = BatcherConfig::for_testing().retry.max_retries;

    ledger.fail_next_sends(
        max_retries as usize + 1,
        LedgerError::Rejected(LedgerRejection::AccountInUse(AccountAddress::Batch(0))),
    );
    let err = batcher
        .add_query(RpcMethod::GetBalance, "alice", None)
        .await
        .unwrap_err();

    match &err {
        BatchError::RetriesExhausted { attempts, .. } => assert_eq!(*attempts, max_retries + 1),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.class(), ErrorClass::Race);
    assert_eq!(batcher.pending_count().await, 0);
    assert!(ledger.batch(0).is_none());
    assert_eq!(executor.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_lost_create_race_joins_winning_batch() {
    let ledger = MemoryLedger::new(2, 5);
    let executor = Arc::new(ScriptedExecutor::new());
    let batcher = batcher(&ledger, &executor).await;

    // Another participant creates batch 0 between our read and our send
    let rival = Pubkey([7; 32]);
    ledger.land_before_next_send(
        rival,
        vec![
            LedgerInstruction::create_batch(0),
            LedgerInstruction::submit_query(0, QueryHash([9; 32])),
        ],
    );

    let result = batcher.add_query(RpcMethod::GetBalance, "alice", None).await;
    assert!(result.is_ok());

    assert_eq!(ledger.create_attempts(), 1);
    assert_eq!(ledger.config().unwrap().next_batch_id, 1);
    let batch = ledger.batch(0).unwrap();
    assert_eq!(batch.fingerprint_count, 2);
    assert_eq!(batch.submitters[0], rival);
    assert_eq!(batch.submitters[1], MemoryLedger::AUTHORITY);

    // Only our own query goes to the executor
    assert_eq!(executor.requests()[0].len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_race_rejection_is_not_retried() {
    let ledger = MemoryLedger::new(1, 5);
    let executor = Arc::new(ScriptedExecutor::new());
    let batcher = batcher(&ledger, &executor).await;

    ledger.fail_next_sends(1, LedgerError::Transport("connection refused".into()));
    let err = batcher
        .add_query(RpcMethod::GetBalance, "alice", None)
        .await
        .unwrap_err();

    assert_eq!(err.class(), ErrorClass::Transport);
    assert_eq!(ledger.create_attempts(), 1);
    assert_eq!(batcher.pending_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_finalize_race_waits_before_rereading() {
    let ledger = MemoryLedger::new(2, 5);
    let executor = Arc::new(ScriptedExecutor::new());
    let batcher = batcher(&ledger, &executor).await;
    let poll_interval = BatcherConfig::for_testing().poll_interval();

    let waiter = {
        let batcher = batcher.clone();
        tokio::spawn(async move { batcher.add_query(RpcMethod::GetBalance, "alice", None).await })
    };
    wait_for_phase(&batcher, DriverPhase::AwaitingThreshold).await;

    // A rival brings the batch to K, then finalize keeps losing races
    ledger
        .participant(Pubkey([7; 32]))
        .send_transaction(vec![LedgerInstruction::submit_query(0, QueryHash([9; 32]))])
        .await
        .unwrap();
    let started = tokio::time::Instant::now();
    ledger.fail_next_sends(
        3,
        LedgerError::Rejected(LedgerRejection::Program(CoordinatorErrorCode::BatchNotPending)),
    );

    assert!(waiter.await.unwrap().is_ok());
    assert!(started.elapsed() >= poll_interval * 3);
    assert_eq!(ledger.landed_count(is_finalize), 1);
    assert_eq!(ledger.batch(0).unwrap().status, BatchStatus::Executed);
}

// ============================================================================
// Multiple Participants
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_two_participants_share_batch_and_authority_completes() {
    let ledger = MemoryLedger::new(2, 5);
    let participant = ledger.participant(Pubkey([7; 32]));
    let authority_exec = Arc::new(ScriptedExecutor::new());
    let participant_exec = Arc::new(ScriptedExecutor::new());
    let authority = batcher(&ledger, &authority_exec).await;
    let other = batcher(&participant, &participant_exec).await;

    let (a, b) = tokio::join!(
        authority.add_query(RpcMethod::GetBalance, "alice", None),
        other.add_query(RpcMethod::GetBalance, "bob", None),
    );
    assert_eq!(a.unwrap()["target"], "alice");
    assert_eq!(b.unwrap()["target"], "bob");

    // Each participant executes only its own queries, under the shared id
    for executor in [&authority_exec, &participant_exec] {
        let requests = executor.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].len(), 1);
        assert_eq!(requests[0].batch_id.as_deref(), Some("0"));
    }

    // Both may have tried to create; only one batch exists
    assert_eq!(ledger.config().unwrap().next_batch_id, 1);
    assert_eq!(ledger.batch(0).unwrap().fingerprint_count, 2);
    assert_eq!(ledger.landed_count(is_finalize), 1);
    assert_eq!(ledger.landed_count(is_complete), 1);
    let (signer, _) = ledger
        .landed()
        .into_iter()
        .find(|(_, ix)| is_complete(ix))
        .unwrap();
    assert_eq!(signer, MemoryLedger::AUTHORITY);
    assert_eq!(ledger.batch(0).unwrap().status, BatchStatus::Executed);
}

#[tokio::test(start_paused = true)]
async fn test_batch_already_executed_is_not_completed_again() {
    let ledger = MemoryLedger::new(2, 5);
    let first_exec = Arc::new(ScriptedExecutor::new());
    let second_exec = Arc::new(ScriptedExecutor::new());
    let first = batcher(&ledger, &first_exec).await;
    let second = batcher(&ledger, &second_exec).await;

    // The second instance opens the batch and goes to sleep below K
    let waiter = {
        let second = second.clone();
        tokio::spawn(async move { second.add_query(RpcMethod::GetBalance, "bob", None).await })
    };
    wait_for_phase(&second, DriverPhase::AwaitingThreshold).await;

    // The first reaches K and runs the batch to completion before it wakes
    let alice = first.add_query(RpcMethod::GetBalance, "alice", None).await;
    assert_eq!(alice.unwrap()["target"], "alice");
    assert_eq!(ledger.batch(0).unwrap().status, BatchStatus::Executed);

    let bob = waiter.await.unwrap();
    assert_eq!(bob.unwrap()["target"], "bob");

    assert_eq!(ledger.landed_count(is_complete), 1);
    assert_eq!(first_exec.requests()[0].batch_id.as_deref(), Some("0"));
    assert_eq!(second_exec.requests()[0].batch_id.as_deref(), Some("0"));
    assert_eq!(second_exec.requests()[0].len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_completion_landed_elsewhere_counts_as_done() {
    let ledger = MemoryLedger::new(1, 5);
    let executor = Arc::new(ScriptedExecutor::new().with_delay(Duration::from_millis(100)));
    let batcher = batcher(&ledger, &executor).await;

    let waiter = {
        let batcher = batcher.clone();
        tokio::spawn(async move { batcher.add_query(RpcMethod::GetBalance, "alice", None).await })
    };
    wait_for_phase(&batcher, DriverPhase::Executing).await;

    // Another authority process records the results while we execute
    let theirs = QueryHash([7; 32]);
    ledger.land_before_next_send(
        MemoryLedger::AUTHORITY,
        vec![LedgerInstruction::complete_batch(0, theirs)],
    );

    let result = waiter.await.unwrap();
    assert_eq!(result.unwrap()["target"], "alice");

    let batch = ledger.batch(0).unwrap();
    assert_eq!(batch.status, BatchStatus::Executed);
    assert_eq!(batch.results_hash, Some(theirs));
    assert_eq!(ledger.landed_count(is_complete), 1);

    wait_until_idle(&batcher).await;
    assert_eq!(batcher.pending_count().await, 0);
}

// ============================================================================
// Failures After Commit
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_execution_failure_leaves_batch_finalized() {
    let ledger = MemoryLedger::new(1, 5);
    let executor = Arc::new(ScriptedExecutor::new().failing("backend down"));
    let batcher = batcher(&ledger, &executor).await;

    let err = batcher
        .add_query(RpcMethod::GetBalance, "alice", None)
        .await
        .unwrap_err();
    assert!(matches!(&err, BatchError::Execution(msg) if msg == "backend down"));

    let batch = ledger.batch(0).unwrap();
    assert_eq!(batch.status, BatchStatus::Finalized);
    assert_eq!(batch.results_hash, None);
    assert_eq!(ledger.landed_count(is_complete), 0);

    wait_until_idle(&batcher).await;
    assert_eq!(batcher.pending_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_poll_read_failure_rejects_waiters() {
    let ledger = MemoryLedger::new(2, 5);
    let executor = Arc::new(ScriptedExecutor::new());
    let batcher = batcher(&ledger, &executor).await;

    let waiter = {
        let batcher = batcher.clone();
        tokio::spawn(async move { batcher.add_query(RpcMethod::GetBalance, "alice", None).await })
    };
    wait_for_phase(&batcher, DriverPhase::AwaitingThreshold).await;

    ledger.fail_next_reads(1, LedgerError::Transport("connection reset".into()));
    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(&err, BatchError::Ledger(LedgerError::Transport(_))));
    assert_eq!(err.class(), ErrorClass::Transport);

    wait_until_idle(&batcher).await;
    assert_eq!(batcher.pending_count().await, 0);
    assert_eq!(executor.call_count(), 0);
    // The fingerprint stays committed
    assert_eq!(ledger.batch(0).unwrap().fingerprint_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_corrupt_batch_account_is_decode_failure() {
    let ledger = MemoryLedger::new(2, 5);
    let executor = Arc::new(ScriptedExecutor::new());
    let batcher = batcher(&ledger, &executor).await;

    let waiter = {
        let batcher = batcher.clone();
        tokio::spawn(async move { batcher.add_query(RpcMethod::GetBalance, "alice", None).await })
    };
    wait_for_phase(&batcher, DriverPhase::AwaitingThreshold).await;

    ledger.corrupt_account(AccountAddress::Batch(0), 12);
    let err = waiter.await.unwrap().unwrap_err();
    assert_eq!(err.class(), ErrorClass::Decode);
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_commits_not_yet_sent() {
    let ledger = MemoryLedger::new(1, 5);
    let executor = Arc::new(ScriptedExecutor::new());
    let batcher = batcher(&ledger, &executor).await;

    // First send races, so one caller sits in backoff and the other on the lock
    ledger.fail_next_sends(1, LedgerError::Rejected(LedgerRejection::SeedsMismatch));
    let spawn_query = |target: &'static str| {
        let batcher = batcher.clone();
        tokio::spawn(async move { batcher.add_query(RpcMethod::GetBalance, target, None).await })
    };
    let in_backoff = spawn_query("alice");
    let on_lock = spawn_query("bob");
    for _ in 0..10_000 {
        if ledger.create_attempts() == 1 && batcher.pending_count().await == 2 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(ledger.create_attempts(), 1);

    batcher.shutdown().await;
    for handle in [in_backoff, on_lock] {
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.class(), ErrorClass::Shutdown);
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(ledger.create_attempts(), 1);
    assert!(ledger.batch(0).is_none());
    assert!(ledger.landed().is_empty());
    assert_eq!(executor.call_count(), 0);
}
