//! Ledger-Coordinated Batch Driver
//!
//! Instead of flushing on size or time, the driver commits each query's
//! fingerprint to a shared batch on the ledger and executes only once the
//! ledger says the batch has reached K members. Independent participants
//! racing on the same ledger all converge on the same batch membership.
//!
//! ## Lifecycle per batch
//!
//! ```text
//! NoActiveBatch ─► AwaitingThreshold ─► Finalizing ─► Executing ─► Completing ─► NoActiveBatch
//! ```
//!
//! ## Moving parts
//! - **Submission lock**: FIFO lock serializing commit attempts from this
//!   instance ([`commit`])
//! - **Poller**: one background task per instance, started lazily and exiting
//!   once nothing is queued ([`poller`])
//!
//! Fingerprints already on the ledger are never rolled back. A query that
//! fails after its commit still leaves its fingerprint recorded.

mod commit;
mod poller;

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lib_coordinator::{CommitmentLevel, RpcMethod};

use crate::accumulator::BatchAccumulator;
use crate::config::BatcherConfig;
use crate::error::{BatchError, Result};
use crate::executor::BatchExecutor;
use crate::ledger::LedgerClient;
use crate::reader::CoordinatorReader;

/// Where the driver is in the current batch cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DriverPhase {
    #[default]
    NoActiveBatch,
    AwaitingThreshold,
    Finalizing,
    Executing,
    Completing,
}

impl fmt::Display for DriverPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriverPhase::NoActiveBatch => "no-active-batch",
            DriverPhase::AwaitingThreshold => "awaiting-threshold",
            DriverPhase::Finalizing => "finalizing",
            DriverPhase::Executing => "executing",
            DriverPhase::Completing => "completing",
        };
        f.write_str(s)
    }
}

#[derive(Default)]
struct DriverState {
    active_batch: Option<u64>,
    phase: DriverPhase,
    poller: Option<JoinHandle<()>>,
    shut_down: bool,
}

pub(crate) struct DriverInner {
    config: BatcherConfig,
    accumulator: BatchAccumulator,
    ledger: Arc<dyn LedgerClient>,
    reader: CoordinatorReader,
    /// Serializes commit attempts; tokio's mutex grants it in FIFO order.
    /// Lock order: `submit_lock`, then `state`, then the accumulator queue
    submit_lock: Mutex<()>,
    state: Mutex<DriverState>,
}

impl DriverInner {
    async fn set_phase(&self, phase: DriverPhase) {
        let mut state = self.state.lock().await;
        if state.phase != phase {
            debug!(from = %state.phase, to = %phase, batch_id = ?state.active_batch, "Driver phase");
            state.phase = phase;
        }
    }
}

/// Batcher whose flush timing is driven by the shared ledger
#[derive(Clone)]
pub struct CoordinatedBatcher {
    inner: Arc<DriverInner>,
}

impl CoordinatedBatcher {
    pub fn new(
        config: BatcherConfig,
        ledger: Arc<dyn LedgerClient>,
        executor: Arc<dyn BatchExecutor>,
    ) -> Result<Self> {
        let accumulator = BatchAccumulator::new(config.clone(), executor)?;
        Ok(Self {
            inner: Arc::new(DriverInner {
                config,
                accumulator,
                reader: CoordinatorReader::new(ledger.clone()),
                ledger,
                submit_lock: Mutex::new(()),
                state: Mutex::new(DriverState::default()),
            }),
        })
    }

    /// Build and check that the coordinator exists on the ledger
    pub async fn connect(
        config: BatcherConfig,
        ledger: Arc<dyn LedgerClient>,
        executor: Arc<dyn BatchExecutor>,
    ) -> Result<Self> {
        let batcher = Self::new(config, ledger, executor)?;
        let coordinator = batcher.inner.reader.coordinator_config().await?;
        info!(
            k = coordinator.min_batch_size,
            max = coordinator.max_batch_size,
            next_batch_id = coordinator.next_batch_id,
            "Connected to coordinator"
        );
        Ok(batcher)
    }

    /// Commit a query to a ledger batch and wait for its result
    pub async fn add_query(
        &self,
        method: RpcMethod,
        target: impl Into<String>,
        consistency: Option<CommitmentLevel>,
    ) -> Result<Value> {
        let accumulator = &self.inner.accumulator;
        let (pending, rx) = accumulator.new_pending(method, target.into(), consistency);
        let id = pending.query.id.clone();
        let fingerprint = pending.fingerprint;
        accumulator.enqueue(pending, false).await?;

        {
            let _guard = self.inner.submit_lock.lock().await;
            match commit::commit_fingerprint(&self.inner, &id, fingerprint).await {
                Ok(batch_id) => {
                    // Tagged before the lock drops so the poller never
                    // detaches a batch with a landed but untagged query
                    let mut state = self.inner.state.lock().await;
                    if accumulator.tag(&id, batch_id).await {
                        self.ensure_poller(&mut state);
                    }
                }
                Err(e) => {
                    if accumulator.remove(&id).await.is_none() {
                        // Already settled by teardown or a poll loop failure
                        return rx.await.unwrap_or(Err(e));
                    }
                    warn!(id = %id, error = %e, "Commit failed, dropping query");
                    return Err(e);
                }
            }
        }

        rx.await.unwrap_or(Err(BatchError::Shutdown))
    }

    /// Start the poller unless one is already running
    fn ensure_poller(&self, state: &mut DriverState) {
        if state.shut_down {
            return;
        }
        if let Some(handle) = &state.poller {
            if !handle.is_finished() {
                return;
            }
        }
        let inner = self.inner.clone();
        state.poller = Some(tokio::spawn(poller::run(inner)));
        info!("Batch poller started");
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.accumulator.pending_count().await
    }

    pub async fn active_batch_id(&self) -> Option<u64> {
        self.inner.state.lock().await.active_batch
    }

    pub async fn phase(&self) -> DriverPhase {
        self.inner.state.lock().await.phase
    }

    pub async fn is_polling(&self) -> bool {
        matches!(&self.inner.state.lock().await.poller, Some(h) if !h.is_finished())
    }

    /// Stop polling and reject everything still queued
    ///
    /// Transactions already sent cannot be recalled.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        state.shut_down = true;
        if let Some(handle) = state.poller.take() {
            handle.abort();
            info!("Batch poller stopped");
        }
        state.active_batch = None;
        state.phase = DriverPhase::NoActiveBatch;
        self.inner.accumulator.destroy().await;
    }
}
