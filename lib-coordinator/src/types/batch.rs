//! Batch execution request/response types
//!
//! These are the shapes exchanged with the execution collaborator. Field names
//! are camelCase on the wire.

use serde::{Deserialize, Serialize};

use super::Query;
use crate::errors::{CoordinatorError, Result};
use crate::hashing::{self, QueryHash};

/// Largest batch the execution side accepts
pub const MAX_BATCH_SIZE: usize = 100;

/// Outcome of one query inside an executed batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Id of the query this result belongs to
    pub id: String,

    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    pub fn success(id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Request handed to the execution collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub queries: Vec<Query>,

    /// Hex of the canonical batch fingerprint
    pub canonical_hash: String,

    /// Ledger batch id, for ledger-coordinated batches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

impl BatchRequest {
    /// Build a request and stamp it with the canonical batch fingerprint
    pub fn new(queries: Vec<Query>) -> Self {
        let canonical_hash = hashing::batch_fingerprint(&queries).to_hex();
        Self {
            queries,
            canonical_hash,
            batch_id: None,
        }
    }

    /// Attach the ledger batch id
    pub fn with_batch_id(mut self, batch_id: u64) -> Self {
        self.batch_id = Some(batch_id.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Ledger batch id parsed back to its numeric form
    pub fn ledger_batch_id(&self) -> Result<Option<u64>> {
        self.batch_id
            .as_deref()
            .map(|raw| {
                raw.parse::<u64>()
                    .map_err(|_| CoordinatorError::InvalidBatchId(raw.to_string()))
            })
            .transpose()
    }

    /// Whether `canonical_hash` still matches the queries carried
    pub fn verify_hash(&self) -> bool {
        match QueryHash::from_hex(&self.canonical_hash) {
            Ok(expected) => hashing::verify(&self.queries, &expected),
            Err(_) => false,
        }
    }

    /// Checks an executor runs before touching the backend
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(CoordinatorError::EmptyBatch);
        }
        if self.len() > MAX_BATCH_SIZE {
            return Err(CoordinatorError::BatchTooLarge {
                actual: self.len(),
                max: MAX_BATCH_SIZE,
            });
        }
        if !self.verify_hash() {
            return Err(CoordinatorError::HashMismatch {
                expected: self.canonical_hash.clone(),
                actual: hashing::batch_fingerprint(&self.queries).to_hex(),
            });
        }
        Ok(())
    }
}

/// Response from the execution collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub results: Vec<QueryResult>,

    /// Echo of the request's canonical hash
    pub canonical_hash: String,

    pub succeeded_count: usize,

    pub failed_count: usize,

    pub execution_time_ms: u64,
}

impl BatchResponse {
    /// Assemble a response, deriving the success/failure counts
    pub fn from_results(
        results: Vec<QueryResult>,
        canonical_hash: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        let succeeded_count = results.iter().filter(|r| r.success).count();
        let failed_count = results.len() - succeeded_count;

        Self {
            results,
            canonical_hash: canonical_hash.into(),
            succeeded_count,
            failed_count,
            execution_time_ms,
        }
    }

    /// Result reported for a query id
    pub fn result_for(&self, id: &str) -> Option<&QueryResult> {
        self.results.iter().find(|r| r.id == id)
    }

    /// Digest committed to the ledger when the batch completes
    pub fn results_hash(&self) -> QueryHash {
        hashing::results_hash(&self.results)
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_count == 0
    }
}
