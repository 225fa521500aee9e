//! Canonical hash protocol
//!
//! Every participant must derive the same fingerprint for the same query, so
//! the byte layout hashed here is part of the protocol:
//!
//! ```text
//! query fingerprint = SHA-256( lp(method) || lp(target) || lp(consistency) )
//! batch fingerprint = SHA-256( sort(fp_1..fp_n) joined by BATCH_HASH_SEPARATOR )
//! ```
//!
//! `lp(x)` is `x` prefixed with its length as a 4-byte little-endian integer.
//! An absent consistency level hashes as [`DEFAULT_COMMITMENT`], and the
//! caller-local query id is never hashed.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::errors::{CoordinatorError, Result};
use crate::types::{Query, QueryResult};

/// Separator placed between sorted fingerprints in the batch hash
pub const BATCH_HASH_SEPARATOR: &[u8] = b"|";

/// 32-byte SHA-256 digest
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct QueryHash(pub [u8; 32]);

impl QueryHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| CoordinatorError::InvalidHash(e.to_string()))?;
        let array: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            CoordinatorError::InvalidHash(format!("expected 32 bytes, got {}", b.len()))
        })?;
        Ok(Self(array))
    }
}

impl fmt::Debug for QueryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryHash({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for QueryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<[u8; 32]> for QueryHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

fn update_length_prefixed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u32).to_le_bytes());
    hasher.update(bytes);
}

/// Fingerprint of a query's semantic content
pub fn fingerprint(query: &Query) -> QueryHash {
    let mut hasher = Sha256::new();
    update_length_prefixed(&mut hasher, query.method.as_str().as_bytes());
    update_length_prefixed(&mut hasher, query.target.as_bytes());
    update_length_prefixed(&mut hasher, query.effective_consistency().as_str().as_bytes());
    QueryHash(hasher.finalize().into())
}

/// Order-independent fingerprint of a whole batch
pub fn batch_fingerprint(queries: &[Query]) -> QueryHash {
    let mut digests: Vec<QueryHash> = queries.iter().map(fingerprint).collect();
    digests.sort_unstable();
    batch_fingerprint_from_digests(&digests)
}

/// Batch fingerprint over already sorted digests
fn batch_fingerprint_from_digests(sorted: &[QueryHash]) -> QueryHash {
    let mut hasher = Sha256::new();
    for (i, digest) in sorted.iter().enumerate() {
        if i > 0 {
            hasher.update(BATCH_HASH_SEPARATOR);
        }
        hasher.update(digest.as_bytes());
    }
    QueryHash(hasher.finalize().into())
}

/// Recompute the batch fingerprint and compare it with `expected`
pub fn verify(queries: &[Query], expected: &QueryHash) -> bool {
    batch_fingerprint(queries) == *expected
}

/// Digest over executed results, in response order
pub fn results_hash(results: &[QueryResult]) -> QueryHash {
    let mut hasher = Sha256::new();
    for result in results {
        hasher.update(result.id.as_bytes());
        hasher.update(if result.success { b"1" } else { b"0" });
        if let Some(data) = &result.data {
            hasher.update(data.to_string().as_bytes());
        }
    }
    QueryHash(hasher.finalize().into())
}
