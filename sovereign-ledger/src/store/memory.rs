use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{LedgerState, LedgerStore, LedgerTxn};
use crate::error::LedgerError;
use crate::types::{Transaction, TransactionId};

#[derive(Default)]
struct MemoryState {
    available: u64,
    issued_total: u64,
    seeded: bool,
    sequence: u64,
    transactions: HashMap<TransactionId, Transaction>,
}

/// In-process ledger. All units of work are serialized on one mutex.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, LedgerError> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Storage("ledger lock poisoned".into()))
    }
}

/// Pending writes of a unit of work, applied only if it returns `Ok`.
#[derive(Default)]
struct Overlay {
    available: Option<u64>,
    issued_total: Option<u64>,
    seeded: bool,
    sequence: Option<u64>,
    writes: HashMap<TransactionId, Transaction>,
}

struct MemoryTxn<'a> {
    base: &'a MemoryState,
    overlay: Overlay,
}

impl LedgerTxn for MemoryTxn<'_> {
    fn get_available(&self) -> Result<u64, LedgerError> {
        Ok(self.overlay.available.unwrap_or(self.base.available))
    }

    fn set_available(&mut self, value: u64) -> Result<(), LedgerError> {
        self.overlay.available = Some(value);
        Ok(())
    }

    fn issued_total(&self) -> Result<u64, LedgerError> {
        Ok(self.overlay.issued_total.unwrap_or(self.base.issued_total))
    }

    fn set_issued_total(&mut self, value: u64) -> Result<(), LedgerError> {
        self.overlay.issued_total = Some(value);
        Ok(())
    }

    fn is_seeded(&self) -> Result<bool, LedgerError> {
        Ok(self.overlay.seeded || self.base.seeded)
    }

    fn mark_seeded(&mut self) -> Result<(), LedgerError> {
        self.overlay.seeded = true;
        Ok(())
    }

    fn sequence(&self) -> Result<u64, LedgerError> {
        Ok(self.overlay.sequence.unwrap_or(self.base.sequence))
    }

    fn next_sequence(&mut self) -> Result<u64, LedgerError> {
        let next = self.sequence()? + 1;
        self.overlay.sequence = Some(next);
        Ok(next)
    }

    fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, LedgerError> {
        Ok(self
            .overlay
            .writes
            .get(id)
            .or_else(|| self.base.transactions.get(id))
            .cloned())
    }

    fn append_transaction(&mut self, tx: Transaction) -> Result<(), LedgerError> {
        if self.get_transaction(&tx.id)?.is_some() {
            return Err(LedgerError::TransactionExists(tx.id));
        }
        self.overlay.writes.insert(tx.id.clone(), tx);
        Ok(())
    }

    fn update_transaction(&mut self, tx: Transaction) -> Result<(), LedgerError> {
        if self.get_transaction(&tx.id)?.is_none() {
            return Err(LedgerError::UnknownTransaction(tx.id));
        }
        self.overlay.writes.insert(tx.id.clone(), tx);
        Ok(())
    }
}

impl LedgerStore for MemoryLedger {
    fn transact<R, F>(&self, f: F) -> Result<R, LedgerError>
    where
        F: Fn(&mut dyn LedgerTxn) -> Result<R, LedgerError>,
    {
        let mut state = self.lock()?;
        let (value, overlay) = {
            let mut txn = MemoryTxn {
                base: &state,
                overlay: Overlay::default(),
            };
            let value = f(&mut txn)?;
            (value, txn.overlay)
        };

        if let Some(available) = overlay.available {
            state.available = available;
        }
        if let Some(issued) = overlay.issued_total {
            state.issued_total = issued;
        }
        state.seeded |= overlay.seeded;
        if let Some(sequence) = overlay.sequence {
            state.sequence = sequence;
        }
        state.transactions.extend(overlay.writes);
        Ok(value)
    }

    fn get_available(&self) -> Result<u64, LedgerError> {
        Ok(self.lock()?.available)
    }

    fn issued_total(&self) -> Result<u64, LedgerError> {
        Ok(self.lock()?.issued_total)
    }

    fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.lock()?.transactions.get(id).cloned())
    }

    fn list_transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.read_state()?.rows)
    }

    fn read_state(&self) -> Result<LedgerState, LedgerError> {
        let state = self.lock()?;
        let mut rows: Vec<Transaction> = state.transactions.values().cloned().collect();
        rows.sort_by_key(|tx| tx.sequence);
        Ok(LedgerState {
            available: state.available,
            issued_total: state.issued_total,
            rows,
        })
    }
}
