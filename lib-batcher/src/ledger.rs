//! Ledger collaborator interface
//!
//! The engine never signs or submits transactions itself. It builds
//! [`LedgerInstruction`]s from the coordinator codec and hands them to a
//! [`LedgerClient`], which owns keys, addressing and transport. Reads come
//! back as raw account bytes and are decoded by [`crate::reader`].

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use lib_coordinator::{CoordinatorErrorCode, CoordinatorInstruction, Pubkey, QueryHash};

/// Logical address of a coordinator-owned account
///
/// Resolving these to concrete ledger addresses (e.g. program-derived
/// addresses) is the client's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccountAddress {
    /// The singleton coordinator config
    Coordinator,
    /// The batch record with the given id
    Batch(u64),
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountAddress::Coordinator => f.write_str("coordinator"),
            AccountAddress::Batch(id) => write!(f, "batch/{}", id),
        }
    }
}

/// One encoded instruction plus the accounts it touches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerInstruction {
    pub accounts: Vec<AccountAddress>,
    pub data: Vec<u8>,
}

impl LedgerInstruction {
    fn new(instruction: CoordinatorInstruction, accounts: Vec<AccountAddress>) -> Self {
        Self {
            accounts,
            data: instruction.encode(),
        }
    }

    pub fn initialize(min_batch_size: u8, max_batch_size: u8) -> Self {
        Self::new(
            CoordinatorInstruction::Initialize {
                min_batch_size,
                max_batch_size,
            },
            vec![AccountAddress::Coordinator],
        )
    }

    /// Create the batch at `next_batch_id`; the account must match the
    /// coordinator's counter when the transaction lands
    pub fn create_batch(next_batch_id: u64) -> Self {
        Self::new(
            CoordinatorInstruction::CreateBatch,
            vec![AccountAddress::Coordinator, AccountAddress::Batch(next_batch_id)],
        )
    }

    pub fn submit_query(batch_id: u64, fingerprint: QueryHash) -> Self {
        Self::new(
            CoordinatorInstruction::SubmitQuery {
                batch_id,
                fingerprint,
            },
            vec![AccountAddress::Coordinator, AccountAddress::Batch(batch_id)],
        )
    }

    pub fn finalize_batch(batch_id: u64) -> Self {
        Self::new(
            CoordinatorInstruction::FinalizeBatch { batch_id },
            vec![AccountAddress::Coordinator, AccountAddress::Batch(batch_id)],
        )
    }

    pub fn complete_batch(batch_id: u64, results_hash: QueryHash) -> Self {
        Self::new(
            CoordinatorInstruction::CompleteBatch {
                batch_id,
                results_hash,
            },
            vec![AccountAddress::Coordinator, AccountAddress::Batch(batch_id)],
        )
    }
}

/// Signature of a landed transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxSignature(pub String);

impl fmt::Display for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why the ledger refused a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerRejection {
    /// The coordinator program raised one of its own errors
    Program(CoordinatorErrorCode),
    /// The account a create targeted already exists
    AccountInUse(AccountAddress),
    /// The account a create targeted is not the one the counter derives
    SeedsMismatch,
    Other(String),
}

impl fmt::Display for LedgerRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerRejection::Program(code) => write!(f, "{}", code),
            LedgerRejection::AccountInUse(addr) => write!(f, "account {} already in use", addr),
            LedgerRejection::SeedsMismatch => f.write_str("account seeds mismatch"),
            LedgerRejection::Other(msg) => f.write_str(msg),
        }
    }
}

/// Ledger collaborator errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    /// The call never reached a verdict (network, RPC, timeout)
    #[error("Ledger transport error: {0}")]
    Transport(String),

    /// The ledger evaluated and refused the transaction
    #[error("Transaction rejected: {0}")]
    Rejected(LedgerRejection),
}

impl LedgerError {
    /// Whether the rejection means a concurrent writer got there first
    ///
    /// Race rejections are safe to retry after a fresh read.
    pub fn is_race(&self) -> bool {
        match self {
            LedgerError::Rejected(LedgerRejection::Program(code)) => code.is_race(),
            LedgerError::Rejected(LedgerRejection::AccountInUse(_))
            | LedgerError::Rejected(LedgerRejection::SeedsMismatch) => true,
            _ => false,
        }
    }

    pub fn program_code(&self) -> Option<CoordinatorErrorCode> {
        match self {
            LedgerError::Rejected(LedgerRejection::Program(code)) => Some(*code),
            _ => None,
        }
    }
}

/// Access to the shared ledger
///
/// `send_transaction` must apply all instructions atomically: either every
/// instruction lands or none does.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Identity that signs and pays for transactions
    fn payer(&self) -> Pubkey;

    /// Raw bytes of an account, or `None` if it does not exist
    async fn get_account_data(
        &self,
        address: AccountAddress,
    ) -> std::result::Result<Option<Vec<u8>>, LedgerError>;

    async fn send_transaction(
        &self,
        instructions: Vec<LedgerInstruction>,
    ) -> std::result::Result<TxSignature, LedgerError>;
}
