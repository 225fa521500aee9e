//! Poll loop
//!
//! Works through the queued batches oldest first. For each one it re-reads
//! the ledger until the batch is finalized, executes the queries committed
//! to it, records the results hash and settles the callers. The loop exits
//! when no queued query is tagged with a batch.

use std::sync::Arc;
use tracing::{debug, error, info};

use lib_coordinator::{BatchStatus, CoordinatorErrorCode, LedgerBatch, QueryHash};

use super::{DriverInner, DriverPhase};
use crate::accumulator::{reject, settle};
use crate::error::Result;
use crate::ledger::LedgerInstruction;

pub(super) async fn run(inner: Arc<DriverInner>) {
    loop {
        let batch_id = {
            let mut state = inner.state.lock().await;
            match inner.accumulator.oldest_tagged_batch().await {
                Some(batch_id) => {
                    state.active_batch = Some(batch_id);
                    batch_id
                }
                None => {
                    state.active_batch = None;
                    state.phase = DriverPhase::NoActiveBatch;
                    state.poller = None;
                    info!("No batches left to drive, poller exiting");
                    return;
                }
            }
        };

        if let Err(e) = drive_batch(&inner, batch_id).await {
            error!(batch_id, error = %e, "Batch cycle failed");
            let rejected = inner.accumulator.reject_all(&e).await;
            if rejected > 0 {
                info!(batch_id, rejected, "Rejected queued queries after failure");
            }
        }
    }
}

/// Take one batch from its current status through to settlement
async fn drive_batch(inner: &DriverInner, batch_id: u64) -> Result<()> {
    loop {
        let config = inner.reader.coordinator_config().await?;
        let batch = inner.reader.require_batch(batch_id).await?;

        match batch.status {
            BatchStatus::Open if batch.can_finalize(config.min_batch_size) => {
                inner.set_phase(DriverPhase::Finalizing).await;
                match inner
                    .ledger
                    .send_transaction(vec![LedgerInstruction::finalize_batch(batch_id)])
                    .await
                {
                    Ok(signature) => info!(
                        batch_id,
                        count = batch.fingerprint_count,
                        signature = %signature,
                        "Batch finalized"
                    ),
                    // Someone else finalized first; a later read shows it
                    Err(e) if e.is_race() => {
                        debug!(batch_id, error = %e, "Finalize raced");
                        tokio::time::sleep(inner.config.poll_interval()).await;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            BatchStatus::Open => {
                inner.set_phase(DriverPhase::AwaitingThreshold).await;
                debug!(
                    batch_id,
                    count = batch.fingerprint_count,
                    k = config.min_batch_size,
                    "Waiting for threshold"
                );
                tokio::time::sleep(inner.config.poll_interval()).await;
            }
            BatchStatus::Finalized | BatchStatus::Executed => {
                return execute_and_complete(inner, &batch, config.authority == inner.ledger.payer())
                    .await;
            }
        }
    }
}

async fn execute_and_complete(inner: &DriverInner, batch: &LedgerBatch, is_authority: bool) -> Result<()> {
    inner.set_phase(DriverPhase::Executing).await;
    let pending = {
        // Let an in-flight commit into this batch finish tagging first
        let _guard = inner.submit_lock.lock().await;
        inner.accumulator.detach_batch(batch.id).await
    };
    if pending.is_empty() {
        return Ok(());
    }

    let response = match inner.accumulator.execute(&pending, Some(batch.id)).await {
        Ok(response) => response,
        Err(e) => {
            reject(pending, &e);
            return Err(e);
        }
    };

    inner.set_phase(DriverPhase::Completing).await;
    let results_hash = response.results_hash();
    if batch.status == BatchStatus::Executed {
        debug!(batch_id = batch.id, "Batch already completed by another participant");
    } else if !is_authority {
        debug!(batch_id = batch.id, "Not the coordinator authority, leaving completion to it");
    } else if let Err(e) = complete(inner, batch.id, results_hash).await {
        reject(pending, &e);
        return Err(e);
    }

    info!(
        batch_id = batch.id,
        query_count = pending.len(),
        succeeded = response.succeeded_count,
        failed = response.failed_count,
        "Batch settled"
    );
    settle(pending, &response);
    Ok(())
}

/// Record the results hash; a batch that is already executed counts as done
async fn complete(inner: &DriverInner, batch_id: u64, results_hash: QueryHash) -> Result<()> {
    match inner
        .ledger
        .send_transaction(vec![LedgerInstruction::complete_batch(batch_id, results_hash)])
        .await
    {
        Ok(signature) => {
            info!(batch_id, results_hash = %results_hash, signature = %signature, "Batch completed");
            Ok(())
        }
        Err(e) if e.program_code() == Some(CoordinatorErrorCode::BatchNotFinalized) => {
            let current = inner.reader.require_batch(batch_id).await?;
            if current.status == BatchStatus::Executed {
                debug!(batch_id, "Completion landed from another participant");
                Ok(())
            } else {
                Err(e.into())
            }
        }
        Err(e) => Err(e.into()),
    }
}
