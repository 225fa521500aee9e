//! In-memory coordinator ledger
//!
//! Decodes every instruction with the real codec and applies the coordinator
//! program's rules to a staged copy of the accounts. A transaction lands
//! only if every instruction in it succeeds.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lib_coordinator::{
    AccountRecord, BatchStatus, CoordinatorConfig, CoordinatorErrorCode, CoordinatorInstruction, LedgerBatch,
    Pubkey, QueryHash,
};

use crate::ledger::{
    AccountAddress, LedgerClient, LedgerError, LedgerInstruction, LedgerRejection, TxSignature,
};

#[derive(Debug, Clone, Default)]
struct Accounts {
    config: Option<CoordinatorConfig>,
    batches: BTreeMap<u64, LedgerBatch>,
}

#[derive(Default)]
struct LedgerState {
    accounts: Accounts,
    clock: i64,
    tx_count: u64,
    create_attempts: usize,
    coordinator_reads: usize,
    landed: Vec<(Pubkey, CoordinatorInstruction)>,
    send_failures: VecDeque<LedgerError>,
    read_failures: VecDeque<LedgerError>,
    concurrent: VecDeque<(Pubkey, Vec<LedgerInstruction>)>,
    overrides: HashMap<AccountAddress, Vec<u8>>,
}

/// Shared in-memory ledger
///
/// Clones made through [`MemoryLedger::participant`] see the same accounts
/// but sign with their own identity.
#[derive(Clone)]
pub struct MemoryLedger {
    payer: Pubkey,
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    /// Default signing identity, also the coordinator authority
    pub const AUTHORITY: Pubkey = Pubkey([0xa1; 32]);

    /// Ledger with an initialized coordinator whose authority is the payer
    pub fn new(min_batch_size: u8, max_batch_size: u8) -> Self {
        let ledger = Self::uninitialized(Self::AUTHORITY);
        ledger.state().accounts.config = Some(CoordinatorConfig {
            authority: Self::AUTHORITY,
            min_batch_size,
            max_batch_size,
            next_batch_id: 0,
        });
        ledger
    }

    /// Ledger with no coordinator account
    pub fn uninitialized(payer: Pubkey) -> Self {
        Self {
            payer,
            state: Arc::new(Mutex::new(LedgerState::default())),
        }
    }

    /// Another signer on the same ledger
    pub fn participant(&self, payer: Pubkey) -> Self {
        Self {
            payer,
            state: self.state.clone(),
        }
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ===== Seeding and inspection =====

    /// Create a batch holding `fingerprints`, bypassing transactions
    ///
    /// # Panics
    ///
    /// Panics if the coordinator account has not been initialized.
    pub fn seed_batch(&self, fingerprints: &[QueryHash]) -> u64 {
        let mut state = self.state();
        let clock = state.clock;
        let Some(config) = state.accounts.config.as_mut() else {
            panic!("seed_batch on an uninitialized ledger");
        };
        let id = config.next_batch_id;
        config.next_batch_id += 1;

        let mut batch = LedgerBatch::open(id, clock);
        for (i, fp) in fingerprints.iter().enumerate() {
            batch.fingerprints.push(*fp);
            batch.submitters.push(Pubkey([i as u8; 32]));
        }
        batch.fingerprint_count = fingerprints.len() as u8;
        state.accounts.batches.insert(id, batch);
        id
    }

    /// Mark a batch finalized, bypassing the threshold check
    pub fn force_finalize(&self, batch_id: u64) {
        let mut state = self.state();
        let clock = state.clock;
        if let Some(batch) = state.accounts.batches.get_mut(&batch_id) {
            batch.status = BatchStatus::Finalized;
            batch.finalized_at = Some(clock);
        }
    }

    /// Serve `bytes` of the real encoding, truncated to `len`
    pub fn corrupt_account(&self, address: AccountAddress, len: usize) {
        let mut state = self.state();
        let mut bytes = match address {
            AccountAddress::Coordinator => state.accounts.config.as_ref().map(|c| c.encode()),
            AccountAddress::Batch(id) => state.accounts.batches.get(&id).map(|b| b.encode()),
        }
        .unwrap_or_default();
        bytes.truncate(len);
        state.overrides.insert(address, bytes);
    }

    pub fn config(&self) -> Option<CoordinatorConfig> {
        self.state().accounts.config.clone()
    }

    pub fn batch(&self, batch_id: u64) -> Option<LedgerBatch> {
        self.state().accounts.batches.get(&batch_id).cloned()
    }

    /// Transactions sent that contained a create, landed or not
    pub fn create_attempts(&self) -> usize {
        self.state().create_attempts
    }

    /// Reads of the coordinator account served so far
    pub fn coordinator_reads(&self) -> usize {
        self.state().coordinator_reads
    }

    /// Landed instructions with their signer, in order
    pub fn landed(&self) -> Vec<(Pubkey, CoordinatorInstruction)> {
        self.state().landed.clone()
    }

    pub fn landed_count(&self, matches: impl Fn(&CoordinatorInstruction) -> bool) -> usize {
        self.state().landed.iter().filter(|(_, ix)| matches(ix)).count()
    }

    // ===== Fault injection =====

    /// Fail the next `n` sends with `error`
    pub fn fail_next_sends(&self, n: usize, error: LedgerError) {
        let mut state = self.state();
        for _ in 0..n {
            state.send_failures.push_back(error.clone());
        }
    }

    /// Fail the next `n` reads with `error`
    pub fn fail_next_reads(&self, n: usize, error: LedgerError) {
        let mut state = self.state();
        for _ in 0..n {
            state.read_failures.push_back(error.clone());
        }
    }

    /// Land `instructions` from `payer` just before the next send is applied
    pub fn land_before_next_send(&self, payer: Pubkey, instructions: Vec<LedgerInstruction>) {
        self.state().concurrent.push_back((payer, instructions));
    }

    // ===== Program rules =====

    fn apply_transaction(
        state: &mut LedgerState,
        payer: Pubkey,
        instructions: &[LedgerInstruction],
    ) -> Result<TxSignature, LedgerError> {
        let mut staged = state.accounts.clone();
        let now = state.clock;
        let mut decoded = Vec::with_capacity(instructions.len());

        for ix in instructions {
            let instruction = CoordinatorInstruction::decode(&ix.data)
                .map_err(|e| LedgerError::Rejected(LedgerRejection::Other(e.to_string())))?;
            Self::apply(&mut staged, payer, now, ix, &instruction).map_err(LedgerError::Rejected)?;
            decoded.push(instruction);
        }

        state.accounts = staged;
        state.clock += 1;
        state.tx_count += 1;
        state.landed.extend(decoded.into_iter().map(|ix| (payer, ix)));
        Ok(TxSignature(format!("memtx-{}", state.tx_count)))
    }

    fn apply(
        accounts: &mut Accounts,
        payer: Pubkey,
        now: i64,
        ix: &LedgerInstruction,
        instruction: &CoordinatorInstruction,
    ) -> Result<(), LedgerRejection> {
        let program = LedgerRejection::Program;

        if let CoordinatorInstruction::Initialize {
            min_batch_size,
            max_batch_size,
        } = *instruction
        {
            if accounts.config.is_some() {
                return Err(LedgerRejection::AccountInUse(AccountAddress::Coordinator));
            }
            let config = CoordinatorConfig {
                authority: payer,
                min_batch_size,
                max_batch_size,
                next_batch_id: 0,
            };
            config
                .validate()
                .map_err(|_| program(CoordinatorErrorCode::InvalidBatchSize))?;
            accounts.config = Some(config);
            return Ok(());
        }

        let config = accounts
            .config
            .as_mut()
            .ok_or_else(|| LedgerRejection::Other("coordinator account not initialized".into()))?;

        match *instruction {
            CoordinatorInstruction::Initialize { .. } => Ok(()),
            CoordinatorInstruction::CreateBatch => {
                let id = config.next_batch_id;
                if ix.accounts.get(1) != Some(&AccountAddress::Batch(id)) {
                    return Err(LedgerRejection::SeedsMismatch);
                }
                if accounts.batches.contains_key(&id) {
                    return Err(LedgerRejection::AccountInUse(AccountAddress::Batch(id)));
                }
                config.next_batch_id += 1;
                accounts.batches.insert(id, LedgerBatch::open(id, now));
                Ok(())
            }
            CoordinatorInstruction::SubmitQuery {
                batch_id,
                fingerprint,
            } => {
                let max = config.max_batch_size;
                Self::batch_mut(&mut accounts.batches, batch_id)?
                    .submit(fingerprint, payer, max)
                    .map_err(program)
            }
            CoordinatorInstruction::FinalizeBatch { batch_id } => {
                let min = config.min_batch_size;
                Self::batch_mut(&mut accounts.batches, batch_id)?
                    .finalize(min, now)
                    .map_err(program)
            }
            CoordinatorInstruction::CompleteBatch {
                batch_id,
                results_hash,
            } => {
                if payer != config.authority {
                    return Err(program(CoordinatorErrorCode::Unauthorized));
                }
                Self::batch_mut(&mut accounts.batches, batch_id)?
                    .complete(results_hash)
                    .map_err(program)
            }
        }
    }

    fn batch_mut(
        batches: &mut BTreeMap<u64, LedgerBatch>,
        batch_id: u64,
    ) -> Result<&mut LedgerBatch, LedgerRejection> {
        batches
            .get_mut(&batch_id)
            .ok_or_else(|| LedgerRejection::Other(format!("batch account {} not found", batch_id)))
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    fn payer(&self) -> Pubkey {
        self.payer
    }

    async fn get_account_data(
        &self,
        address: AccountAddress,
    ) -> Result<Option<Vec<u8>>, LedgerError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        if address == AccountAddress::Coordinator {
            state.coordinator_reads += 1;
        }
        if let Some(error) = state.read_failures.pop_front() {
            return Err(error);
        }
        if let Some(bytes) = state.overrides.get(&address) {
            return Ok(Some(bytes.clone()));
        }

        Ok(match address {
            AccountAddress::Coordinator => state.accounts.config.as_ref().map(|c| {
                let mut bytes = c.encode();
                bytes.resize(CoordinatorConfig::ACCOUNT_SIZE, 0);
                bytes
            }),
            AccountAddress::Batch(id) => {
                let max = state
                    .accounts
                    .config
                    .as_ref()
                    .map(|c| c.max_batch_size as usize)
                    .unwrap_or(lib_coordinator::MAX_FINGERPRINTS);
                state.accounts.batches.get(&id).map(|b| {
                    let mut bytes = b.encode();
                    let size = LedgerBatch::account_size(max).max(bytes.len());
                    bytes.resize(size, 0);
                    bytes
                })
            }
        })
    }

    async fn send_transaction(
        &self,
        instructions: Vec<LedgerInstruction>,
    ) -> Result<TxSignature, LedgerError> {
        tokio::task::yield_now().await;
        let mut state = self.state();

        while let Some((payer, other)) = state.concurrent.pop_front() {
            // Concurrent writers may lose races of their own; that is fine
            let _ = Self::apply_transaction(&mut state, payer, &other);
        }

        let creates = instructions
            .iter()
            .any(|ix| ix.data.starts_with(&lib_coordinator::discriminators::CREATE_BATCH));
        if creates {
            state.create_attempts += 1;
        }
        if let Some(error) = state.send_failures.pop_front() {
            return Err(error);
        }
        Self::apply_transaction(&mut state, self.payer, &instructions)
    }
}
