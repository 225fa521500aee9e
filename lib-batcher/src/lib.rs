//! K-Anonymous Query Batching
//!
//! Groups queries from many participants into shared batches so the backend
//! only ever sees a query as one of at least K.
//!
//! # Two ways to batch
//!
//! 1. **Local** ([`BatchAccumulator`]): flush on `batch_size` or after
//!    `max_wait`, whichever comes first. No ledger involved.
//! 2. **Ledger-coordinated** ([`CoordinatedBatcher`]): commit each query's
//!    fingerprint to a batch on a shared ledger and execute once the batch
//!    is finalized with at least K members.
//!
//! Collaborators are injected through [`LedgerClient`] and
//! [`BatchExecutor`]; this crate does no network I/O or signing itself.
//!
//! # Usage
//!
//! ```ignore
//! use lib_batcher::{BatcherConfig, CoordinatedBatcher};
//! use lib_coordinator::RpcMethod;
//!
//! let batcher = CoordinatedBatcher::connect(BatcherConfig::default(), ledger, executor).await?;
//! let balance = batcher.add_query(RpcMethod::GetBalance, "Acct111", None).await?;
//! ```

pub mod accumulator;
pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod reader;
pub mod testing;

pub use accumulator::BatchAccumulator;
pub use config::{BatcherConfig, RetryConfig};
pub use driver::{CoordinatedBatcher, DriverPhase};
pub use error::{BatchError, ConfigError, ErrorClass, Result};
pub use executor::BatchExecutor;
pub use ledger::{
    AccountAddress, LedgerClient, LedgerError, LedgerInstruction, LedgerRejection, TxSignature,
};
pub use reader::CoordinatorReader;
