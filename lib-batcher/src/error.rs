//! Error types for the batching engine
//!
//! Every rejection a caller sees is a [`BatchError`], and every
//! [`BatchError`] names the category it belongs to through
//! [`BatchError::class`].

use thiserror::Error;

use lib_coordinator::{CodecError, CoordinatorError};

use crate::ledger::LedgerError;

/// Category of a failure as seen by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Invalid settings or ledger setup; fatal at construction
    Configuration,
    /// The execution or ledger call itself failed
    Transport,
    /// Another participant mutated the ledger first and retries ran out
    Race,
    /// A single query failed; siblings are unaffected
    Semantic,
    /// Account bytes could not be decoded
    Decode,
    /// The batcher was torn down before the query settled
    Shutdown,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorClass::Configuration => "configuration",
            ErrorClass::Transport => "transport",
            ErrorClass::Race => "race",
            ErrorClass::Semantic => "semantic",
            ErrorClass::Decode => "decode",
            ErrorClass::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Invalid batcher settings
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("batch_size must be between 1 and {max}, got {actual}")]
    InvalidBatchSize { actual: usize, max: usize },

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("retry.initial_backoff_ms ({initial}) exceeds retry.max_backoff_ms ({max})")]
    InvalidBackoff { initial: u64, max: u64 },

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

/// Batching engine error type
#[derive(Debug, Error, Clone)]
pub enum BatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Coordinator is not initialized on the ledger")]
    CoordinatorMissing,

    #[error("Ledger coordinator rejected its own config: {0}")]
    InvalidCoordinator(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Execution timed out after {0}ms")]
    ExecutionTimeout(u64),

    #[error("Response hash {actual} does not match request hash {expected}")]
    ResponseHashMismatch { expected: String, actual: String },

    #[error("Invalid batch request: {0}")]
    Request(#[from] CoordinatorError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Batch {0} not found on the ledger")]
    BatchNotFound(u64),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: LedgerError },

    #[error("Query {id} failed: {message}")]
    QueryFailed { id: String, message: String },

    #[error("No result returned for query {0}")]
    MissingResult(String),

    #[error("Decode error: {0}")]
    Decode(#[from] CodecError),

    #[error("Batcher shut down")]
    Shutdown,
}

impl BatchError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BatchError::Config(_)
            | BatchError::CoordinatorMissing
            | BatchError::InvalidCoordinator(_) => ErrorClass::Configuration,
            BatchError::Execution(_)
            | BatchError::ExecutionTimeout(_)
            | BatchError::ResponseHashMismatch { .. }
            | BatchError::Request(_)
            | BatchError::BatchNotFound(_) => ErrorClass::Transport,
            BatchError::Ledger(e) if e.is_race() => ErrorClass::Race,
            BatchError::Ledger(_) => ErrorClass::Transport,
            BatchError::RetriesExhausted { last, .. } if last.is_race() => ErrorClass::Race,
            BatchError::RetriesExhausted { .. } => ErrorClass::Transport,
            BatchError::QueryFailed { .. } | BatchError::MissingResult(_) => ErrorClass::Semantic,
            BatchError::Decode(_) => ErrorClass::Decode,
            BatchError::Shutdown => ErrorClass::Shutdown,
        }
    }

    /// Whether a commit attempt hitting this error should re-read and retry
    pub fn is_race(&self) -> bool {
        matches!(self, BatchError::Ledger(e) if e.is_race())
    }
}

/// Result type alias for batching operations
pub type Result<T> = std::result::Result<T, BatchError>;
