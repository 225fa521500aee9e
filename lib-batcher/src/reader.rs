//! Typed reads of coordinator state
//!
//! Every call goes back to the ledger; nothing is cached, since another
//! participant may have moved a batch since the last read.

use std::sync::Arc;
use tracing::{debug, warn};

use lib_coordinator::{AccountRecord, BatchStatus, CodecError, CoordinatorConfig, LedgerBatch};

use crate::error::{BatchError, Result};
use crate::ledger::{AccountAddress, LedgerClient};

#[derive(Clone)]
pub struct CoordinatorReader {
    ledger: Arc<dyn LedgerClient>,
}

impl CoordinatorReader {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    /// Current coordinator config
    ///
    /// A missing account or a config that breaks `0 < K <= max` is a
    /// configuration error.
    pub async fn coordinator_config(&self) -> Result<CoordinatorConfig> {
        let data = self
            .ledger
            .get_account_data(AccountAddress::Coordinator)
            .await?
            .ok_or(BatchError::CoordinatorMissing)?;
        let config = CoordinatorConfig::decode(&data)?;
        config
            .validate()
            .map_err(|e| BatchError::InvalidCoordinator(e.to_string()))?;
        Ok(config)
    }

    /// Id the next created batch will receive
    pub async fn batch_counter(&self) -> Result<u64> {
        Ok(self.coordinator_config().await?.next_batch_id)
    }

    pub async fn get_batch(&self, batch_id: u64) -> Result<Option<LedgerBatch>> {
        let Some(data) = self
            .ledger
            .get_account_data(AccountAddress::Batch(batch_id))
            .await?
        else {
            return Ok(None);
        };

        let batch = LedgerBatch::decode(&data)?;
        if batch.id != batch_id {
            return Err(CodecError::Malformed(format!(
                "account for batch {} holds batch {}",
                batch_id, batch.id
            ))
            .into());
        }
        Ok(Some(batch))
    }

    /// Batch record that must exist
    pub async fn require_batch(&self, batch_id: u64) -> Result<LedgerBatch> {
        self.get_batch(batch_id)
            .await?
            .ok_or(BatchError::BatchNotFound(batch_id))
    }

    /// Newest batch, within `depth` of the counter, that still takes
    /// submissions
    pub async fn find_open_batch(
        &self,
        config: &CoordinatorConfig,
        depth: u64,
    ) -> Result<Option<LedgerBatch>> {
        for batch_id in config.batch_ids_newest_first().take(depth as usize) {
            match self.get_batch(batch_id).await? {
                Some(batch) if batch.accepts_submissions(config.max_batch_size) => {
                    debug!(batch_id, count = batch.fingerprint_count, "Found open batch");
                    return Ok(Some(batch));
                }
                Some(_) => {}
                None => warn!(batch_id, "Batch below counter has no account"),
            }
        }
        Ok(None)
    }

    /// Finalized batches among the newest `depth`, oldest first
    pub async fn find_finalized_batches(&self, depth: u64) -> Result<Vec<LedgerBatch>> {
        let config = self.coordinator_config().await?;
        let mut finalized = Vec::new();
        for batch_id in config.batch_ids_newest_first().take(depth as usize) {
            if let Some(batch) = self.get_batch(batch_id).await? {
                if batch.status == BatchStatus::Finalized {
                    finalized.push(batch);
                }
            }
        }
        finalized.reverse();
        debug!(count = finalized.len(), "Found finalized batches");
        Ok(finalized)
    }

    pub async fn is_batch_finalized(&self, batch_id: u64) -> Result<bool> {
        Ok(matches!(
            self.get_batch(batch_id).await?,
            Some(batch) if batch.status == BatchStatus::Finalized
        ))
    }
}
