//! Batch Coordinator Protocol
//!
//! Shared, synchronous layer of the k-anonymous batching engine. Everything
//! here is deterministic and free of I/O so independent participants derive
//! byte-identical results.
//!
//! # Components
//!
//! 1. **Types** ([`types`]): queries, RPC methods, consistency levels and the
//!    request/response shapes exchanged with the execution backend
//! 2. **Hashing** ([`hashing`]): per-query fingerprints and the
//!    order-independent batch fingerprint
//! 3. **State** ([`state`]): the coordinator config and batch records kept on
//!    the ledger, with the program's transition rules
//! 4. **Codec** ([`codec`]): bit-exact account and instruction encoding
//!
//! # Usage
//!
//! ```ignore
//! use lib_coordinator::{fingerprint, AccountRecord, LedgerBatch, Query, RpcMethod};
//!
//! let query = Query::new("q-1", RpcMethod::GetBalance, "Acct111");
//! let fp = fingerprint(&query);
//!
//! let batch = LedgerBatch::decode(&account_bytes)?;
//! if batch.contains(&fp) { /* already committed */ }
//! ```

pub mod codec;
pub mod errors;
pub mod hashing;
pub mod state;
pub mod types;

pub use codec::{discriminators, AccountRecord, ByteReader, CodecError, CoordinatorInstruction};
pub use errors::{CoordinatorError, CoordinatorErrorCode, Result};
pub use hashing::{
    batch_fingerprint, fingerprint, results_hash, verify, QueryHash, BATCH_HASH_SEPARATOR,
};
pub use state::{BatchStatus, CoordinatorConfig, LedgerBatch, Pubkey, MAX_FINGERPRINTS};
pub use types::{
    BatchRequest, BatchResponse, CommitmentLevel, Query, QueryResult, RpcMethod,
    DEFAULT_COMMITMENT, MAX_BATCH_SIZE,
};
