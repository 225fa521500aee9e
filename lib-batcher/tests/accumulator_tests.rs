//! Local Accumulator Tests
//!
//! Flush triggers, settlement and teardown of the size/time batcher:
//! - Size trigger executes exactly the full batch, timer never fires
//! - Time trigger executes the partial batch after `max_wait`
//! - Whole-call failures reject every query; per-result failures reject one
//! - Destroy rejects everything queued with a shutdown error

use std::sync::Arc;
use std::time::Duration;

use lib_batcher::testing::ScriptedExecutor;
use lib_batcher::{BatchAccumulator, BatchError, BatcherConfig, ErrorClass};
use lib_coordinator::{batch_fingerprint, CommitmentLevel, Query, RpcMethod};

// ============================================================================
// Test Helpers
// ============================================================================

fn accumulator(batch_size: usize, executor: &Arc<ScriptedExecutor>) -> BatchAccumulator {
    let config = BatcherConfig {
        batch_size,
        max_wait_ms: 100,
        ..BatcherConfig::for_testing()
    };
    BatchAccumulator::new(config, executor.clone()).unwrap()
}

async fn wait_for_pending(acc: &BatchAccumulator, count: usize) {
    for _ in 0..1_000 {
        if acc.pending_count().await == count {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("pending count never reached {}", count);
}

// ============================================================================
// Flush Triggers
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_size_trigger_executes_exactly_one_full_batch() {
    let executor = Arc::new(ScriptedExecutor::new());
    let acc = accumulator(3, &executor);
    let started = tokio::time::Instant::now();

    let (a, b, c) = tokio::join!(
        acc.add_query(RpcMethod::GetBalance, "A", None),
        acc.add_query(RpcMethod::GetBalance, "B", None),
        acc.add_query(RpcMethod::GetBalance, "C", None),
    );
    assert_eq!(a.unwrap()["target"], "A");
    assert_eq!(b.unwrap()["target"], "B");
    assert_eq!(c.unwrap()["target"], "C");

    // Settled without waiting for the timer
    assert!(started.elapsed() < Duration::from_millis(100));

    // Letting the wait window pass must not produce a second call
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(executor.call_count(), 1);

    let requests = executor.requests();
    let targets: Vec<&str> = requests[0].queries.iter().map(|q| q.target.as_str()).collect();
    assert_eq!(targets, vec!["A", "B", "C"]);
    assert_eq!(acc.pending_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_time_trigger_flushes_partial_batch() {
    let executor = Arc::new(ScriptedExecutor::new());
    let acc = accumulator(5, &executor);
    let started = tokio::time::Instant::now();

    let (a, b) = tokio::join!(
        acc.add_query(RpcMethod::GetBalance, "A", None),
        acc.add_query(RpcMethod::GetAccountInfo, "B", Some(CommitmentLevel::Finalized)),
    );
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert!(started.elapsed() >= Duration::from_millis(100));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(executor.call_count(), 1);
    let requests = executor.requests();
    assert_eq!(requests[0].len(), 2);
    assert_eq!(requests[0].queries[1].consistency, Some(CommitmentLevel::Finalized));
}

#[tokio::test(start_paused = true)]
async fn test_canonical_hash_matches_batch_fingerprint() {
    let executor = Arc::new(ScriptedExecutor::new());
    let acc = accumulator(3, &executor);

    let _ = tokio::join!(
        acc.add_query(RpcMethod::GetBalance, "C", None),
        acc.add_query(RpcMethod::GetBalance, "A", None),
        acc.add_query(RpcMethod::GetBalance, "B", None),
    );

    let expected = batch_fingerprint(&[
        Query::new("x", RpcMethod::GetBalance, "A"),
        Query::new("y", RpcMethod::GetBalance, "B"),
        Query::new("z", RpcMethod::GetBalance, "C"),
    ]);
    assert_eq!(executor.requests()[0].canonical_hash, expected.to_hex());
}

#[tokio::test(start_paused = true)]
async fn test_next_batch_starts_a_fresh_timer() {
    let executor = Arc::new(ScriptedExecutor::new());
    let acc = accumulator(2, &executor);

    let _ = tokio::join!(
        acc.add_query(RpcMethod::GetBalance, "A", None),
        acc.add_query(RpcMethod::GetBalance, "B", None),
    );
    let lone = acc.add_query(RpcMethod::GetBalance, "C", None).await;

    assert!(lone.is_ok());
    assert_eq!(executor.call_count(), 2);
    assert_eq!(executor.requests()[1].len(), 1);
}

// ============================================================================
// Settlement
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_call_failure_rejects_every_query_with_same_error() {
    let executor = Arc::new(ScriptedExecutor::new().failing("backend unavailable"));
    let acc = accumulator(2, &executor);

    let (a, b) = tokio::join!(
        acc.add_query(RpcMethod::GetBalance, "A", None),
        acc.add_query(RpcMethod::GetBalance, "B", None),
    );

    for result in [a, b] {
        let err = result.unwrap_err();
        assert!(matches!(&err, BatchError::Execution(msg) if msg == "backend unavailable"));
        assert_eq!(err.class(), ErrorClass::Transport);
    }
    assert_eq!(executor.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_single_result_failure_rejects_only_that_query() {
    let executor = Arc::new(ScriptedExecutor::new().fail_target("B", "account not found"));
    let acc = accumulator(3, &executor);

    let (a, b, c) = tokio::join!(
        acc.add_query(RpcMethod::GetBalance, "A", None),
        acc.add_query(RpcMethod::GetBalance, "B", None),
        acc.add_query(RpcMethod::GetBalance, "C", None),
    );

    assert!(a.is_ok());
    assert!(c.is_ok());
    let err = b.unwrap_err();
    assert!(matches!(&err, BatchError::QueryFailed { message, .. } if message == "account not found"));
    assert_eq!(err.class(), ErrorClass::Semantic);
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_destroy_rejects_pending_and_clears_queue() {
    let executor = Arc::new(ScriptedExecutor::new());
    let acc = accumulator(5, &executor);

    let first = {
        let acc = acc.clone();
        tokio::spawn(async move { acc.add_query(RpcMethod::GetBalance, "A", None).await })
    };
    let second = {
        let acc = acc.clone();
        tokio::spawn(async move { acc.add_query(RpcMethod::GetBalance, "B", None).await })
    };
    wait_for_pending(&acc, 2).await;

    acc.destroy().await;

    for handle in [first, second] {
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.class(), ErrorClass::Shutdown);
    }
    assert_eq!(acc.pending_count().await, 0);

    // The cancelled timer never flushes
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(executor.call_count(), 0);

    // Second destroy is a no-op
    acc.destroy().await;
    assert_eq!(acc.pending_count().await, 0);
}
