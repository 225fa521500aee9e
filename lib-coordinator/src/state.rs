//! Ledger-resident records
//!
//! [`CoordinatorConfig`] and [`LedgerBatch`] are the two records the
//! coordinator program keeps on the ledger. The transition methods on
//! [`LedgerBatch`] apply the program's rules, so every participant (and the
//! in-memory ledger used in tests) moves a batch forward the same way.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{CoordinatorError, CoordinatorErrorCode, Result};
use crate::hashing::QueryHash;

/// Upper bound on fingerprints a batch account is allocated for
pub const MAX_FINGERPRINTS: usize = 20;

/// 32-byte ledger identity
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Pubkey(pub [u8; 32]);

impl Pubkey {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pubkey({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Lifecycle of a ledger batch; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum BatchStatus {
    /// Accepting fingerprints
    #[default]
    Open,
    /// Membership frozen, ready for execution
    Finalized,
    /// Results hash recorded
    Executed,
}

impl BatchStatus {
    pub fn tag(&self) -> u8 {
        match self {
            BatchStatus::Open => 0,
            BatchStatus::Finalized => 1,
            BatchStatus::Executed => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(BatchStatus::Open),
            1 => Some(BatchStatus::Finalized),
            2 => Some(BatchStatus::Executed),
            _ => None,
        }
    }

    /// Whether `next` is the single forward step from `self`
    pub fn can_advance_to(&self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (BatchStatus::Open, BatchStatus::Finalized)
                | (BatchStatus::Finalized, BatchStatus::Executed)
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchStatus::Open => "open",
            BatchStatus::Finalized => "finalized",
            BatchStatus::Executed => "executed",
        };
        f.write_str(s)
    }
}

/// Global coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Identity allowed to complete batches
    pub authority: Pubkey,
    /// K: fingerprints required before a batch may finalize
    pub min_batch_size: u8,
    /// Fingerprints a batch may hold
    pub max_batch_size: u8,
    /// Id the next created batch will receive
    pub next_batch_id: u64,
}

impl CoordinatorConfig {
    /// Encoded size: discriminator + authority + min + max + counter
    pub const ENCODED_SIZE: usize = 8 + 32 + 1 + 1 + 8;

    /// Allocated account size (one trailing byte reserved by the program)
    pub const ACCOUNT_SIZE: usize = Self::ENCODED_SIZE + 1;

    pub fn new(authority: Pubkey, min_batch_size: u8, max_batch_size: u8) -> Result<Self> {
        let config = Self {
            authority,
            min_batch_size,
            max_batch_size,
            next_batch_id: 0,
        };
        config.validate()?;
        Ok(config)
    }

    /// `0 < K <= max`
    pub fn validate(&self) -> Result<()> {
        if self.min_batch_size == 0 || self.min_batch_size > self.max_batch_size {
            return Err(CoordinatorError::InvalidBatchSize {
                min: self.min_batch_size,
                max: self.max_batch_size,
            });
        }
        Ok(())
    }

    /// Ids of batches created so far, newest first
    pub fn batch_ids_newest_first(&self) -> impl Iterator<Item = u64> {
        (0..self.next_batch_id).rev()
    }
}

/// Per-batch ledger record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBatch {
    pub id: u64,
    pub status: BatchStatus,
    pub fingerprint_count: u8,
    pub fingerprints: Vec<QueryHash>,
    /// Parallel to `fingerprints`
    pub submitters: Vec<Pubkey>,
    pub created_at: i64,
    pub finalized_at: Option<i64>,
    pub results_hash: Option<QueryHash>,
}

impl LedgerBatch {
    /// Allocated account size for a batch holding up to `max_fingerprints`
    pub fn account_size(max_fingerprints: usize) -> usize {
        8 +                             // discriminator
        8 +                             // id
        1 +                             // status
        1 +                             // fingerprint_count
        4 + (32 * max_fingerprints) +   // fingerprints
        4 + (32 * max_fingerprints) +   // submitters
        8 +                             // created_at
        1 + 8 +                         // finalized_at
        1 + 32 +                        // results_hash
        1 // reserved
    }

    /// A freshly created, empty batch
    pub fn open(id: u64, created_at: i64) -> Self {
        Self {
            id,
            status: BatchStatus::Open,
            fingerprint_count: 0,
            fingerprints: Vec::new(),
            submitters: Vec::new(),
            created_at,
            finalized_at: None,
            results_hash: None,
        }
    }

    pub fn contains(&self, fingerprint: &QueryHash) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    pub fn is_full(&self, max_batch_size: u8) -> bool {
        self.fingerprint_count >= max_batch_size
    }

    /// Whether an open batch has reached K
    pub fn can_finalize(&self, min_batch_size: u8) -> bool {
        self.status == BatchStatus::Open && self.fingerprint_count >= min_batch_size
    }

    /// Whether a new fingerprint could still join
    pub fn accepts_submissions(&self, max_batch_size: u8) -> bool {
        self.status == BatchStatus::Open && !self.is_full(max_batch_size)
    }

    /// Record invariants that hold for every well-formed batch
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let count = self.fingerprint_count as usize;
        if count != self.fingerprints.len() || count != self.submitters.len() {
            return Err(format!(
                "fingerprint_count {} disagrees with {} fingerprints / {} submitters",
                count,
                self.fingerprints.len(),
                self.submitters.len()
            ));
        }
        for (i, fp) in self.fingerprints.iter().enumerate() {
            if self.fingerprints[..i].contains(fp) {
                return Err(format!("duplicate fingerprint {}", fp));
            }
        }
        Ok(())
    }

    /// Append a fingerprint under the program's submit rules
    pub fn submit(
        &mut self,
        fingerprint: QueryHash,
        submitter: Pubkey,
        max_batch_size: u8,
    ) -> std::result::Result<(), CoordinatorErrorCode> {
        if self.status != BatchStatus::Open {
            return Err(CoordinatorErrorCode::BatchNotPending);
        }
        if self.is_full(max_batch_size) {
            return Err(CoordinatorErrorCode::BatchFull);
        }
        if self.contains(&fingerprint) {
            return Err(CoordinatorErrorCode::DuplicateQuery);
        }
        self.fingerprints.push(fingerprint);
        self.submitters.push(submitter);
        self.fingerprint_count += 1;
        Ok(())
    }

    /// Freeze membership once K is reached
    pub fn finalize(
        &mut self,
        min_batch_size: u8,
        now: i64,
    ) -> std::result::Result<(), CoordinatorErrorCode> {
        if self.status != BatchStatus::Open {
            return Err(CoordinatorErrorCode::BatchNotPending);
        }
        if !self.can_finalize(min_batch_size) {
            return Err(CoordinatorErrorCode::InsufficientQueries);
        }
        self.status = BatchStatus::Finalized;
        self.finalized_at = Some(now);
        Ok(())
    }

    /// Record the results hash of an executed batch
    pub fn complete(&mut self, results_hash: QueryHash) -> std::result::Result<(), CoordinatorErrorCode> {
        if self.status != BatchStatus::Finalized {
            return Err(CoordinatorErrorCode::BatchNotFinalized);
        }
        self.status = BatchStatus::Executed;
        self.results_hash = Some(results_hash);
        Ok(())
    }
}
