//! Coordinator errors
//!
//! [`CoordinatorErrorCode`] mirrors the rejection codes the on-ledger
//! coordinator program reports. [`CoordinatorError`] covers failures raised
//! locally by this crate.

use thiserror::Error;

use crate::codec::CodecError;

/// Offset at which the coordinator program numbers its custom errors
pub const PROGRAM_ERROR_OFFSET: u32 = 6000;

/// Rejections raised by the coordinator program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinatorErrorCode {
    /// Batch already holds `max_batch_size` fingerprints
    BatchFull,
    /// Batch has fewer than K fingerprints
    InsufficientQueries,
    /// Batch is no longer open
    BatchNotPending,
    /// Batch has not been finalized
    BatchNotFinalized,
    /// Fingerprint already present in the batch
    DuplicateQuery,
    /// `0 < min <= max` violated
    InvalidBatchSize,
    /// Signer is not the coordinator authority
    Unauthorized,
}

impl CoordinatorErrorCode {
    pub fn code(&self) -> u32 {
        PROGRAM_ERROR_OFFSET
            + match self {
                CoordinatorErrorCode::BatchFull => 0,
                CoordinatorErrorCode::InsufficientQueries => 1,
                CoordinatorErrorCode::BatchNotPending => 2,
                CoordinatorErrorCode::BatchNotFinalized => 3,
                CoordinatorErrorCode::DuplicateQuery => 4,
                CoordinatorErrorCode::InvalidBatchSize => 5,
                CoordinatorErrorCode::Unauthorized => 6,
            }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code.checked_sub(PROGRAM_ERROR_OFFSET)? {
            0 => Some(CoordinatorErrorCode::BatchFull),
            1 => Some(CoordinatorErrorCode::InsufficientQueries),
            2 => Some(CoordinatorErrorCode::BatchNotPending),
            3 => Some(CoordinatorErrorCode::BatchNotFinalized),
            4 => Some(CoordinatorErrorCode::DuplicateQuery),
            5 => Some(CoordinatorErrorCode::InvalidBatchSize),
            6 => Some(CoordinatorErrorCode::Unauthorized),
            _ => None,
        }
    }

    /// Whether the rejection means another writer moved the batch first
    pub fn is_race(&self) -> bool {
        matches!(
            self,
            CoordinatorErrorCode::BatchFull
                | CoordinatorErrorCode::BatchNotPending
                | CoordinatorErrorCode::BatchNotFinalized
                | CoordinatorErrorCode::DuplicateQuery
        )
    }

    pub fn message(&self) -> &'static str {
        match self {
            CoordinatorErrorCode::BatchFull => "Batch is already full",
            CoordinatorErrorCode::InsufficientQueries => {
                "Batch does not have enough queries to finalize"
            }
            CoordinatorErrorCode::BatchNotPending => "Batch is not in pending status",
            CoordinatorErrorCode::BatchNotFinalized => "Batch is not finalized",
            CoordinatorErrorCode::DuplicateQuery => "Query hash already exists in batch",
            CoordinatorErrorCode::InvalidBatchSize => "Invalid batch size parameters",
            CoordinatorErrorCode::Unauthorized => "Unauthorized",
        }
    }
}

impl std::fmt::Display for CoordinatorErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// Errors raised by this crate
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoordinatorError {
    #[error("Batch cannot be empty")]
    EmptyBatch,

    #[error("Batch size {actual} exceeds maximum of {max}")]
    BatchTooLarge { actual: usize, max: usize },

    #[error("Invalid batch size parameters: min {min}, max {max}")]
    InvalidBatchSize { min: u8, max: u8 },

    #[error("Canonical hash mismatch: expected {expected}, computed {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Invalid batch id: {0}")]
    InvalidBatchId(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;
