//! Balance ledger storage.
//!
//! A [`LedgerStore`] owns the singleton balance and the append-only
//! transaction table. Every mutation runs inside [`LedgerStore::transact`]:
//! the closure sees a [`LedgerTxn`] and either all of its writes land or none
//! do.
//!
//! Two backends:
//! - [`MemoryLedger`]: mutex-guarded state with a write overlay.
//! - [`SledLedger`]: sled trees mutated through a multi-tree transaction.

mod memory;
mod sled_store;

use std::path::Path;

pub use memory::MemoryLedger;
pub use sled_store::SledLedger;

use crate::error::LedgerError;
use crate::types::{Transaction, TransactionId};

/// Balance, issued total and every row, read at one instant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerState {
    pub available: u64,
    pub issued_total: u64,
    /// Ordered by insertion sequence.
    pub rows: Vec<Transaction>,
}

/// One atomic unit of work over the ledger.
pub trait LedgerTxn {
    fn get_available(&self) -> Result<u64, LedgerError>;

    fn set_available(&mut self, value: u64) -> Result<(), LedgerError>;

    fn issued_total(&self) -> Result<u64, LedgerError>;

    fn set_issued_total(&mut self, value: u64) -> Result<(), LedgerError>;

    /// Whether an opening balance has been set, even a zero one.
    fn is_seeded(&self) -> Result<bool, LedgerError>;

    fn mark_seeded(&mut self) -> Result<(), LedgerError>;

    /// Number of rows ever appended.
    fn sequence(&self) -> Result<u64, LedgerError>;

    /// Reserve the next insertion sequence number.
    fn next_sequence(&mut self) -> Result<u64, LedgerError>;

    fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, LedgerError>;

    /// Insert a new row; fails if the id is taken.
    fn append_transaction(&mut self, tx: Transaction) -> Result<(), LedgerError>;

    /// Replace an existing row.
    fn update_transaction(&mut self, tx: Transaction) -> Result<(), LedgerError>;
}

/// Durable home of the balance and the transaction log.
pub trait LedgerStore: Send + Sync {
    /// Run `f` atomically. `f` may be invoked more than once when the backend
    /// retries on conflict, so it must not have side effects outside the
    /// transaction.
    fn transact<R, F>(&self, f: F) -> Result<R, LedgerError>
    where
        F: Fn(&mut dyn LedgerTxn) -> Result<R, LedgerError>;

    fn get_available(&self) -> Result<u64, LedgerError>;

    fn issued_total(&self) -> Result<u64, LedgerError>;

    fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, LedgerError>;

    /// All rows ordered by insertion sequence.
    fn list_transactions(&self) -> Result<Vec<Transaction>, LedgerError>;

    /// Consistent view of the whole ledger; no unit of work is half visible.
    fn read_state(&self) -> Result<LedgerState, LedgerError>;
}

/// Concrete backend chosen at startup.
pub enum LedgerBackend {
    Memory(MemoryLedger),
    Sled(SledLedger),
}

impl LedgerBackend {
    pub fn in_memory() -> Self {
        LedgerBackend::Memory(MemoryLedger::new())
    }

    pub fn persistent(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        Ok(LedgerBackend::Sled(SledLedger::open(path)?))
    }
}

impl LedgerStore for LedgerBackend {
    fn transact<R, F>(&self, f: F) -> Result<R, LedgerError>
    where
        F: Fn(&mut dyn LedgerTxn) -> Result<R, LedgerError>,
    {
        match self {
            LedgerBackend::Memory(store) => store.transact(f),
            LedgerBackend::Sled(store) => store.transact(f),
        }
    }

    fn get_available(&self) -> Result<u64, LedgerError> {
        match self {
            LedgerBackend::Memory(store) => store.get_available(),
            LedgerBackend::Sled(store) => store.get_available(),
        }
    }

    fn issued_total(&self) -> Result<u64, LedgerError> {
        match self {
            LedgerBackend::Memory(store) => store.issued_total(),
            LedgerBackend::Sled(store) => store.issued_total(),
        }
    }

    fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, LedgerError> {
        match self {
            LedgerBackend::Memory(store) => store.get_transaction(id),
            LedgerBackend::Sled(store) => store.get_transaction(id),
        }
    }

    fn list_transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        match self {
            LedgerBackend::Memory(store) => store.list_transactions(),
            LedgerBackend::Sled(store) => store.list_transactions(),
        }
    }

    fn read_state(&self) -> Result<LedgerState, LedgerError> {
        match self {
            LedgerBackend::Memory(store) => store.read_state(),
            LedgerBackend::Sled(store) => store.read_state(),
        }
    }
}

impl From<MemoryLedger> for LedgerBackend {
    fn from(store: MemoryLedger) -> Self {
        LedgerBackend::Memory(store)
    }
}

impl From<SledLedger> for LedgerBackend {
    fn from(store: SledLedger) -> Self {
        LedgerBackend::Sled(store)
    }
}
