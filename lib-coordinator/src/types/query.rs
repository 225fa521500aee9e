//! Query types
//!
//! A [`Query`] is the unit a caller hands to the batcher. Only its semantic
//! content (`method`, `target`, `consistency`) is ever hashed; the `id` exists
//! so results can be routed back to the caller that asked.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Read methods that may be mixed into a batch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum RpcMethod {
    /// Account balance
    GetBalance,
    /// Full account information
    GetAccountInfo,
    /// Transaction by signature
    GetTransaction,
    /// Token account balance
    GetTokenAccountBalance,
    /// Current block height
    GetBlockHeight,
    /// Several accounts in one call
    GetMultipleAccounts,
}

impl RpcMethod {
    /// Wire name of the method
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcMethod::GetBalance => "getBalance",
            RpcMethod::GetAccountInfo => "getAccountInfo",
            RpcMethod::GetTransaction => "getTransaction",
            RpcMethod::GetTokenAccountBalance => "getTokenAccountBalance",
            RpcMethod::GetBlockHeight => "getBlockHeight",
            RpcMethod::GetMultipleAccounts => "getMultipleAccounts",
        }
    }

    /// Every supported method
    pub fn all() -> &'static [RpcMethod] {
        &[
            RpcMethod::GetBalance,
            RpcMethod::GetAccountInfo,
            RpcMethod::GetTransaction,
            RpcMethod::GetTokenAccountBalance,
            RpcMethod::GetBlockHeight,
            RpcMethod::GetMultipleAccounts,
        ]
    }

    /// Parse a wire name
    pub fn parse(s: &str) -> Option<RpcMethod> {
        Self::all().iter().copied().find(|m| m.as_str() == s)
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consistency level a read is served at
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentLevel {
    /// Most recent block seen by the node
    Processed,
    /// Block voted on by a supermajority
    #[default]
    Confirmed,
    /// Block rooted by a supermajority
    Finalized,
}

/// Level assumed when a query does not name one
pub const DEFAULT_COMMITMENT: CommitmentLevel = CommitmentLevel::Confirmed;

impl CommitmentLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitmentLevel::Processed => "processed",
            CommitmentLevel::Confirmed => "confirmed",
            CommitmentLevel::Finalized => "finalized",
        }
    }

    pub fn parse(s: &str) -> Option<CommitmentLevel> {
        match s {
            "processed" => Some(CommitmentLevel::Processed),
            "confirmed" => Some(CommitmentLevel::Confirmed),
            "finalized" => Some(CommitmentLevel::Finalized),
            _ => None,
        }
    }
}

impl fmt::Display for CommitmentLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single read request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Caller-local identifier used to route the result back
    pub id: String,

    /// The read method
    pub method: RpcMethod,

    /// What is being read (account, signature, ...)
    pub target: String,

    /// Optional consistency level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency: Option<CommitmentLevel>,
}

impl Query {
    pub fn new(id: impl Into<String>, method: RpcMethod, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method,
            target: target.into(),
            consistency: None,
        }
    }

    /// Set the consistency level
    pub fn with_consistency(mut self, consistency: CommitmentLevel) -> Self {
        self.consistency = Some(consistency);
        self
    }

    /// Consistency level after applying the default
    pub fn effective_consistency(&self) -> CommitmentLevel {
        self.consistency.unwrap_or(DEFAULT_COMMITMENT)
    }
}
