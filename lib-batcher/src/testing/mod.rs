//! Testing utilities for lib-batcher
//!
//! In-memory stand-ins for the two collaborators, used by the unit tests
//! and by the integration tests under `tests/`.

mod executor;
mod memory_ledger;

pub use executor::ScriptedExecutor;
pub use memory_ledger::MemoryLedger;
