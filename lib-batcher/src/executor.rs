//! Execution collaborator interface

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use lib_coordinator::{BatchRequest, BatchResponse};

use crate::error::{BatchError, Result};

/// Runs a batch of queries against the backend
///
/// Returning `Err` means the call as a whole failed; per-query failures are
/// reported inside the response.
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    async fn execute_batch(&self, request: BatchRequest) -> Result<BatchResponse>;
}

/// Validate, execute under a deadline and check the echoed hash
pub(crate) async fn execute_checked(
    executor: &Arc<dyn BatchExecutor>,
    request: BatchRequest,
    timeout: Duration,
) -> Result<BatchResponse> {
    request.validate()?;
    let expected = request.canonical_hash.clone();
    let query_count = request.len();

    let response = match tokio::time::timeout(timeout, executor.execute_batch(request)).await {
        Ok(result) => result?,
        Err(_) => {
            warn!(query_count, timeout_ms = timeout.as_millis() as u64, "Batch execution timed out");
            return Err(BatchError::ExecutionTimeout(timeout.as_millis() as u64));
        }
    };

    if response.canonical_hash != expected {
        return Err(BatchError::ResponseHashMismatch {
            expected,
            actual: response.canonical_hash,
        });
    }

    debug!(
        query_count,
        succeeded = response.succeeded_count,
        failed = response.failed_count,
        execution_time_ms = response.execution_time_ms,
        "Batch executed"
    );
    Ok(response)
}
