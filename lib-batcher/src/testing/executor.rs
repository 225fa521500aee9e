use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lib_coordinator::{BatchRequest, BatchResponse, QueryResult};

use crate::error::{BatchError, Result};
use crate::executor::BatchExecutor;

/// Executor that answers from a script and records every request
///
/// By default each query succeeds with `{"method": .., "target": ..}`.
#[derive(Default)]
pub struct ScriptedExecutor {
    requests: Mutex<Vec<BatchRequest>>,
    call_failure: Option<String>,
    failing_targets: HashMap<String, String>,
    omitted_targets: HashSet<String>,
    delay: Option<Duration>,
    wrong_hash: bool,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call as a whole
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.call_failure = Some(message.into());
        self
    }

    /// Report a per-query failure for queries on `target`
    pub fn fail_target(mut self, target: impl Into<String>, message: impl Into<String>) -> Self {
        self.failing_targets.insert(target.into(), message.into());
        self
    }

    /// Leave queries on `target` out of the response
    pub fn omit_target(mut self, target: impl Into<String>) -> Self {
        self.omitted_targets.insert(target.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Echo a canonical hash that does not match the request
    pub fn with_wrong_hash(mut self) -> Self {
        self.wrong_hash = true;
        self
    }

    fn recorded(&self) -> MutexGuard<'_, Vec<BatchRequest>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn requests(&self) -> Vec<BatchRequest> {
        self.recorded().clone()
    }

    pub fn call_count(&self) -> usize {
        self.recorded().len()
    }
}

#[async_trait]
impl BatchExecutor for ScriptedExecutor {
    async fn execute_batch(&self, request: BatchRequest) -> Result<BatchResponse> {
        self.recorded().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.call_failure {
            return Err(BatchError::Execution(message.clone()));
        }

        let results = request
            .queries
            .iter()
            .filter(|q| !self.omitted_targets.contains(&q.target))
            .map(|q| match self.failing_targets.get(&q.target) {
                Some(message) => QueryResult::failure(q.id.clone(), message.clone()),
                None => QueryResult::success(
                    q.id.clone(),
                    json!({ "method": q.method.as_str(), "target": q.target }),
                ),
            })
            .collect();

        let canonical_hash = if self.wrong_hash {
            "00".repeat(32)
        } else {
            request.canonical_hash
        };
        Ok(BatchResponse::from_results(results, canonical_hash, 1))
    }
}
