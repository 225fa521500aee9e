//! Query and batch exchange types

mod batch;
mod query;

pub use batch::{BatchRequest, BatchResponse, QueryResult, MAX_BATCH_SIZE};
pub use query::{CommitmentLevel, Query, RpcMethod, DEFAULT_COMMITMENT};
