//! Local Batch Accumulator
//!
//! Collects queries in memory and flushes them to the execution collaborator
//! as one batch when either trigger fires:
//!
//! - **Size**: the queue reaches `batch_size`; flushed immediately
//! - **Time**: `max_wait` has passed since the first query was queued
//!
//! Every caller gets a oneshot receiver that settles exactly once. A query
//! leaves the queue at the moment a flush captures it.
//!
//! ```text
//! add_query ──► queue ──(size | timer)──► detach ──► execute ──► settle by id
//! ```
//!
//! The coordinated driver shares this queue but never arms the timer; it
//! decides when to execute from ledger state instead.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lib_coordinator::{fingerprint, BatchRequest, BatchResponse, CommitmentLevel, Query, QueryHash, RpcMethod};

use crate::config::BatcherConfig;
use crate::error::{BatchError, Result};
use crate::executor::{execute_checked, BatchExecutor};

/// A queued query awaiting its result
pub(crate) struct PendingQuery {
    pub query: Query,
    pub fingerprint: QueryHash,
    /// Ledger batch the fingerprint was committed to
    pub batch_id: Option<u64>,
    responder: oneshot::Sender<Result<Value>>,
}

impl PendingQuery {
    fn resolve(self, outcome: Result<Value>) {
        // Receiver gone means the caller stopped waiting
        let _ = self.responder.send(outcome);
    }
}

struct QueueState {
    pending: Vec<PendingQuery>,
    timer: Option<JoinHandle<()>>,
    destroyed: bool,
}

struct Inner {
    config: BatcherConfig,
    executor: Arc<dyn BatchExecutor>,
    queue: Mutex<QueueState>,
    next_id: AtomicU64,
}

/// Size- and time-triggered query batcher
#[derive(Clone)]
pub struct BatchAccumulator {
    inner: Arc<Inner>,
}

impl BatchAccumulator {
    pub fn new(config: BatcherConfig, executor: Arc<dyn BatchExecutor>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                executor,
                queue: Mutex::new(QueueState {
                    pending: Vec::new(),
                    timer: None,
                    destroyed: false,
                }),
                next_id: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.inner.config
    }

    /// Queue a query and wait for its result
    pub async fn add_query(
        &self,
        method: RpcMethod,
        target: impl Into<String>,
        consistency: Option<CommitmentLevel>,
    ) -> Result<Value> {
        let (pending, rx) = self.new_pending(method, target.into(), consistency);
        self.enqueue(pending, true).await?;
        rx.await.unwrap_or(Err(BatchError::Shutdown))
    }

    /// Execute whatever is queued now
    ///
    /// A no-op on an empty queue. Errors are delivered to the flushed
    /// queries, not returned here.
    pub async fn flush(&self) {
        let detached = {
            let mut queue = self.inner.queue.lock().await;
            if let Some(timer) = queue.timer.take() {
                timer.abort();
            }
            std::mem::take(&mut queue.pending)
        };
        self.execute_and_settle(detached).await;
    }

    /// Reject everything queued and refuse new queries; idempotent
    pub async fn destroy(&self) {
        let rejected = {
            let mut queue = self.inner.queue.lock().await;
            if queue.destroyed {
                return;
            }
            queue.destroyed = true;
            if let Some(timer) = queue.timer.take() {
                timer.abort();
            }
            std::mem::take(&mut queue.pending)
        };
        if !rejected.is_empty() {
            info!(rejected = rejected.len(), "Accumulator destroyed with queued queries");
        }
        for pending in rejected {
            pending.resolve(Err(BatchError::Shutdown));
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.queue.lock().await.pending.len()
    }

    pub async fn is_destroyed(&self) -> bool {
        self.inner.queue.lock().await.destroyed
    }

    // ===== Queue plumbing shared with the coordinated driver =====

    pub(crate) fn new_pending(
        &self,
        method: RpcMethod,
        target: String,
        consistency: Option<CommitmentLevel>,
    ) -> (PendingQuery, oneshot::Receiver<Result<Value>>) {
        let seq = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut query = Query::new(format!("q{}", seq), method, target);
        query.consistency = consistency;
        let (tx, rx) = oneshot::channel();
        let pending = PendingQuery {
            fingerprint: fingerprint(&query),
            query,
            batch_id: None,
            responder: tx,
        };
        (pending, rx)
    }

    /// Append to the queue, optionally driving the size and time triggers
    pub(crate) async fn enqueue(&self, pending: PendingQuery, with_triggers: bool) -> Result<()> {
        let full_batch = {
            let mut queue = self.inner.queue.lock().await;
            if queue.destroyed {
                return Err(BatchError::Shutdown);
            }
            debug!(id = %pending.query.id, method = %pending.query.method, "Query queued");
            queue.pending.push(pending);

            if !with_triggers {
                return Ok(());
            }
            if queue.pending.len() >= self.inner.config.batch_size {
                if let Some(timer) = queue.timer.take() {
                    timer.abort();
                }
                Some(std::mem::take(&mut queue.pending))
            } else {
                if queue.timer.is_none() {
                    queue.timer = Some(self.arm_timer());
                }
                None
            }
        };

        if let Some(batch) = full_batch {
            debug!(query_count = batch.len(), "Batch size reached, flushing");
            let this = self.clone();
            tokio::spawn(async move { this.execute_and_settle(batch).await });
        }
        Ok(())
    }

    fn arm_timer(&self) -> JoinHandle<()> {
        let this = self.clone();
        let wait = self.inner.config.max_wait();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let detached = {
                let mut queue = this.inner.queue.lock().await;
                // Clear our own handle without aborting this task
                queue.timer = None;
                std::mem::take(&mut queue.pending)
            };
            if !detached.is_empty() {
                debug!(query_count = detached.len(), "Max wait elapsed, flushing partial batch");
            }
            this.execute_and_settle(detached).await;
        })
    }

    pub(crate) async fn remove(&self, id: &str) -> Option<PendingQuery> {
        let mut queue = self.inner.queue.lock().await;
        let index = queue.pending.iter().position(|p| p.query.id == id)?;
        Some(queue.pending.remove(index))
    }

    /// Whether the query is still waiting in the queue
    pub(crate) async fn is_queued(&self, id: &str) -> bool {
        let queue = self.inner.queue.lock().await;
        queue.pending.iter().any(|p| p.query.id == id)
    }

    /// Record which ledger batch a queued query was committed to
    pub(crate) async fn tag(&self, id: &str, batch_id: u64) -> bool {
        let mut queue = self.inner.queue.lock().await;
        match queue.pending.iter_mut().find(|p| p.query.id == id) {
            Some(pending) => {
                pending.batch_id = Some(batch_id);
                true
            }
            None => false,
        }
    }

    /// Lowest ledger batch id among queued queries
    pub(crate) async fn oldest_tagged_batch(&self) -> Option<u64> {
        let queue = self.inner.queue.lock().await;
        queue.pending.iter().filter_map(|p| p.batch_id).min()
    }

    /// Detach the queries committed to `batch_id`
    pub(crate) async fn detach_batch(&self, batch_id: u64) -> Vec<PendingQuery> {
        let mut queue = self.inner.queue.lock().await;
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut queue.pending)
            .into_iter()
            .partition(|p| p.batch_id == Some(batch_id));
        queue.pending = kept;
        taken
    }

    /// Reject and drop every queued query
    pub(crate) async fn reject_all(&self, error: &BatchError) -> usize {
        let rejected = std::mem::take(&mut self.inner.queue.lock().await.pending);
        let count = rejected.len();
        reject(rejected, error);
        count
    }

    /// Run one batch through the executor without settling it
    pub(crate) async fn execute(
        &self,
        batch: &[PendingQuery],
        batch_id: Option<u64>,
    ) -> Result<BatchResponse> {
        let queries = batch.iter().map(|p| p.query.clone()).collect();
        let mut request = BatchRequest::new(queries);
        if let Some(id) = batch_id {
            request = request.with_batch_id(id);
        }
        execute_checked(&self.inner.executor, request, self.inner.config.execution_timeout()).await
    }

    async fn execute_and_settle(&self, batch: Vec<PendingQuery>) {
        if batch.is_empty() {
            return;
        }
        match self.execute(&batch, None).await {
            Ok(response) => settle(batch, &response),
            Err(e) => {
                warn!(query_count = batch.len(), error = %e, "Batch execution failed");
                reject(batch, &e);
            }
        }
    }
}

/// Resolve each query from its matching result
pub(crate) fn settle(batch: Vec<PendingQuery>, response: &BatchResponse) {
    for pending in batch {
        let outcome = match response.result_for(&pending.query.id) {
            None => Err(BatchError::MissingResult(pending.query.id.clone())),
            Some(result) if !result.success => Err(BatchError::QueryFailed {
                id: pending.query.id.clone(),
                message: result
                    .error
                    .clone()
                    .unwrap_or_else(|| "query failed".to_string()),
            }),
            Some(result) => Ok(result.data.clone().unwrap_or(Value::Null)),
        };
        pending.resolve(outcome);
    }
}

/// Reject every query with the same error
pub(crate) fn reject(batch: Vec<PendingQuery>, error: &BatchError) {
    for pending in batch {
        pending.resolve(Err(error.clone()));
    }
}
