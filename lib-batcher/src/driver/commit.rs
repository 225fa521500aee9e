//! Committing a fingerprint to a ledger batch
//!
//! Each attempt starts from a fresh read of the coordinator:
//!
//! 1. Scan back from `next_batch_id` for the newest batch still taking
//!    submissions
//! 2. Join it if it already holds this fingerprint, otherwise submit to it
//! 3. With no open batch, create one and submit in a single transaction so no
//!    participant ever sees an empty batch
//!
//! Race rejections send the loop back to step 1 after a backoff. Any other
//! failure is returned immediately. A query that left the local queue while
//! waiting (shutdown, or a poll loop failure) is never sent.

use tracing::{debug, info, warn};

use lib_coordinator::QueryHash;

use super::DriverInner;
use crate::error::{BatchError, Result};
use crate::ledger::LedgerInstruction;

/// Commit the fingerprint of queued query `id`, returning the id of the
/// batch that now holds it
pub(super) async fn commit_fingerprint(
    inner: &DriverInner,
    id: &str,
    fingerprint: QueryHash,
) -> Result<u64> {
    let retry = &inner.config.retry;
    let mut attempt: u32 = 0;

    loop {
        if !inner.accumulator.is_queued(id).await {
            debug!(id, attempt, "Query no longer queued, skipping commit");
            return Err(BatchError::Shutdown);
        }
        match try_commit(inner, fingerprint).await {
            Ok(batch_id) => return Ok(batch_id),
            Err(BatchError::Ledger(e)) if e.is_race() => {
                if attempt >= retry.max_retries {
                    warn!(
                        fingerprint = ?fingerprint,
                        attempts = attempt + 1,
                        error = %e,
                        "Commit retries exhausted"
                    );
                    return Err(BatchError::RetriesExhausted {
                        attempts: attempt + 1,
                        last: e,
                    });
                }
                let delay = retry.backoff(attempt);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Commit raced with another participant, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn try_commit(inner: &DriverInner, fingerprint: QueryHash) -> Result<u64> {
    let config = inner.reader.coordinator_config().await?;
    let open = inner
        .reader
        .find_open_batch(&config, inner.config.open_batch_search_depth)
        .await?;

    match open {
        Some(batch) if batch.contains(&fingerprint) => {
            debug!(batch_id = batch.id, "Fingerprint already in open batch, joining");
            Ok(batch.id)
        }
        Some(batch) => {
            let signature = inner
                .ledger
                .send_transaction(vec![LedgerInstruction::submit_query(batch.id, fingerprint)])
                .await?;
            debug!(
                batch_id = batch.id,
                count = batch.fingerprint_count + 1,
                signature = %signature,
                "Fingerprint submitted"
            );
            Ok(batch.id)
        }
        None => {
            let batch_id = config.next_batch_id;
            let signature = inner
                .ledger
                .send_transaction(vec![
                    LedgerInstruction::create_batch(batch_id),
                    LedgerInstruction::submit_query(batch_id, fingerprint),
                ])
                .await?;
            info!(batch_id, signature = %signature, "Created batch with first fingerprint");
            Ok(batch_id)
        }
    }
}
