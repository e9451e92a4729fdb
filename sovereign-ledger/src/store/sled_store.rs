use std::cell::RefCell;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree,
    UnabortableTransactionError,
};
use sled::Transactional;

use super::{LedgerState, LedgerStore, LedgerTxn};
use crate::error::LedgerError;
use crate::types::{Transaction, TransactionId};

const META_TREE: &str = "ledger_meta";
const TRANSACTIONS_TREE: &str = "ledger_transactions";

const AVAILABLE_KEY: &[u8] = b"available";
const ISSUED_KEY: &[u8] = b"issued_total";
const SEQUENCE_KEY: &[u8] = b"next_sequence";
const SEEDED_KEY: &[u8] = b"seeded";

/// Ledger persisted in sled.
///
/// Meta values are big-endian `u64`; transaction rows are JSON keyed by id.
#[derive(Clone)]
pub struct SledLedger {
    db: sled::Db,
    meta: sled::Tree,
    transactions: sled::Tree,
}

impl SledLedger {
    /// Open or create the ledger database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            LedgerError::Storage(format!(
                "Failed to open ledger db at {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_db(db)
    }

    /// Use trees inside an already opened database.
    pub fn from_db(db: sled::Db) -> Result<Self, LedgerError> {
        let meta = db
            .open_tree(META_TREE)
            .map_err(|e| LedgerError::Storage(format!("Failed to open meta tree: {}", e)))?;
        let transactions = db.open_tree(TRANSACTIONS_TREE).map_err(|e| {
            LedgerError::Storage(format!("Failed to open transactions tree: {}", e))
        })?;
        Ok(Self {
            db,
            meta,
            transactions,
        })
    }

    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    pub fn flush(&self) -> Result<(), LedgerError> {
        self.db.flush()?;
        Ok(())
    }

    fn read_meta(&self, key: &[u8]) -> Result<u64, LedgerError> {
        match self.meta.get(key)? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(0),
        }
    }
}

fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, LedgerError> {
    Ok(serde_json::to_vec(value)?)
}

fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LedgerError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn decode_u64(bytes: &[u8]) -> Result<u64, LedgerError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| LedgerError::Storage("corrupt ledger meta value".into()))?;
    Ok(u64::from_be_bytes(raw))
}

/// View over both trees inside one sled transaction.
///
/// Sled reports conflicts as `UnabortableTransactionError`. They are kept
/// aside and re-raised so sled retries the closure instead of the caller
/// seeing a storage error.
struct SledTxn<'a> {
    meta: &'a TransactionalTree,
    transactions: &'a TransactionalTree,
    interrupted: RefCell<Option<UnabortableTransactionError>>,
}

impl SledTxn<'_> {
    fn guard<T>(&self, result: Result<T, UnabortableTransactionError>) -> Result<T, LedgerError> {
        result.map_err(|err| {
            *self.interrupted.borrow_mut() = Some(err);
            LedgerError::Storage("ledger transaction interrupted".into())
        })
    }

    fn read_meta(&self, key: &[u8]) -> Result<u64, LedgerError> {
        match self.guard(self.meta.get(key))? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(0),
        }
    }

    fn write_meta(&self, key: &[u8], value: u64) -> Result<(), LedgerError> {
        self.guard(self.meta.insert(key, &value.to_be_bytes()[..]))?;
        Ok(())
    }

    fn write_row(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let bytes = serialize(tx)?;
        self.guard(self.transactions.insert(tx.id.as_bytes(), bytes))?;
        Ok(())
    }
}

impl LedgerTxn for SledTxn<'_> {
    fn get_available(&self) -> Result<u64, LedgerError> {
        self.read_meta(AVAILABLE_KEY)
    }

    fn set_available(&mut self, value: u64) -> Result<(), LedgerError> {
        self.write_meta(AVAILABLE_KEY, value)
    }

    fn issued_total(&self) -> Result<u64, LedgerError> {
        self.read_meta(ISSUED_KEY)
    }

    fn set_issued_total(&mut self, value: u64) -> Result<(), LedgerError> {
        self.write_meta(ISSUED_KEY, value)
    }

    fn is_seeded(&self) -> Result<bool, LedgerError> {
        Ok(self.read_meta(SEEDED_KEY)? != 0)
    }

    fn mark_seeded(&mut self) -> Result<(), LedgerError> {
        self.write_meta(SEEDED_KEY, 1)
    }

    fn sequence(&self) -> Result<u64, LedgerError> {
        self.read_meta(SEQUENCE_KEY)
    }

    fn next_sequence(&mut self) -> Result<u64, LedgerError> {
        let next = self.sequence()? + 1;
        self.write_meta(SEQUENCE_KEY, next)?;
        Ok(next)
    }

    fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, LedgerError> {
        match self.guard(self.transactions.get(id.as_bytes()))? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn append_transaction(&mut self, tx: Transaction) -> Result<(), LedgerError> {
        if self.get_transaction(&tx.id)?.is_some() {
            return Err(LedgerError::TransactionExists(tx.id));
        }
        self.write_row(&tx)
    }

    fn update_transaction(&mut self, tx: Transaction) -> Result<(), LedgerError> {
        if self.get_transaction(&tx.id)?.is_none() {
            return Err(LedgerError::UnknownTransaction(tx.id));
        }
        self.write_row(&tx)
    }
}

impl LedgerStore for SledLedger {
    fn transact<R, F>(&self, f: F) -> Result<R, LedgerError>
    where
        F: Fn(&mut dyn LedgerTxn) -> Result<R, LedgerError>,
    {
        let outcome = (&self.meta, &self.transactions).transaction(|(meta, transactions)| {
            let mut txn = SledTxn {
                meta,
                transactions,
                interrupted: RefCell::new(None),
            };
            let result = f(&mut txn);
            match result {
                Ok(value) => Ok(value),
                Err(err) => match txn.interrupted.into_inner() {
                    Some(interrupted) => Err(interrupted.into()),
                    None => Err(ConflictableTransactionError::Abort(err)),
                },
            }
        });

        match outcome {
            Ok(value) => Ok(value),
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(LedgerError::Storage(err.to_string())),
        }
    }

    fn get_available(&self) -> Result<u64, LedgerError> {
        self.read_meta(AVAILABLE_KEY)
    }

    fn issued_total(&self) -> Result<u64, LedgerError> {
        self.read_meta(ISSUED_KEY)
    }

    fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, LedgerError> {
        match self.transactions.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn list_transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        let mut rows = Vec::new();
        for item in self.transactions.iter() {
            let (_, bytes) = item?;
            rows.push(deserialize::<Transaction>(&bytes)?);
        }
        rows.sort_by_key(|tx| tx.sequence);
        Ok(rows)
    }

    /// Rows are only ever appended, so the id set listed outside the
    /// transaction is complete once its size matches the sequence counter
    /// read inside it. Otherwise a unit of work landed in between; list again.
    fn read_state(&self) -> Result<LedgerState, LedgerError> {
        loop {
            let mut ids = Vec::new();
            for key in self.transactions.iter().keys() {
                let key = key?;
                let id = String::from_utf8(key.to_vec())
                    .map_err(|_| LedgerError::Storage("corrupt transaction key".into()))?;
                ids.push(TransactionId::from(id));
            }

            let state = self.transact(|txn| {
                if txn.sequence()? != ids.len() as u64 {
                    return Ok(None);
                }
                let mut rows = Vec::with_capacity(ids.len());
                for id in &ids {
                    match txn.get_transaction(id)? {
                        Some(tx) => rows.push(tx),
                        None => return Ok(None),
                    }
                }
                rows.sort_by_key(|tx| tx.sequence);
                Ok(Some(LedgerState {
                    available: txn.get_available()?,
                    issued_total: txn.issued_total()?,
                    rows,
                }))
            })?;

            match state {
                Some(state) => return Ok(state),
                None => tracing::trace!("Ledger changed while reading, retrying"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_ledger() -> SledLedger {
        let db = sled::Config::new().temporary(true).open().unwrap();
        SledLedger::from_db(db).unwrap()
    }

    #[test]
    fn aborted_transaction_writes_nothing() {
        let ledger = temp_ledger();
        ledger
            .transact(|txn| {
                txn.set_available(100)?;
                txn.set_issued_total(100)
            })
            .unwrap();

        let result: Result<(), LedgerError> = ledger.transact(|txn| {
            txn.set_available(10)?;
            let seq = txn.next_sequence()?;
            txn.append_transaction(Transaction::outgoing("tx_a".into(), 90, seq))?;
            Err(LedgerError::InvalidAmount)
        });

        assert_eq!(result, Err(LedgerError::InvalidAmount));
        assert_eq!(ledger.get_available().unwrap(), 100);
        assert!(ledger.get_transaction(&"tx_a".into()).unwrap().is_none());
    }

    #[test]
    fn rows_list_in_sequence_order() {
        let ledger = temp_ledger();
        for id in ["tx_z", "tx_a", "tx_m"] {
            ledger
                .transact(|txn| {
                    let seq = txn.next_sequence()?;
                    txn.append_transaction(Transaction::outgoing(id.into(), 1, seq))
                })
                .unwrap();
        }
        let ids: Vec<String> = ledger
            .list_transactions()
            .unwrap()
            .into_iter()
            .map(|tx| tx.id.to_string())
            .collect();
        assert_eq!(ids, vec!["tx_z", "tx_a", "tx_m"]);
    }

    #[test]
    fn duplicate_append_is_rejected() {
        let ledger = temp_ledger();
        let append = || {
            ledger.transact(|txn| {
                let seq = txn.next_sequence()?;
                txn.append_transaction(Transaction::outgoing("tx_dup".into(), 1, seq))
            })
        };
        append().unwrap();
        assert_eq!(
            append(),
            Err(LedgerError::TransactionExists("tx_dup".into()))
        );
        assert_eq!(ledger.list_transactions().unwrap().len(), 1);
    }

    #[test]
    fn read_state_sees_rows_and_balance_together() {
        let ledger = temp_ledger();
        ledger
            .transact(|txn| {
                txn.set_available(10)?;
                txn.set_issued_total(10)?;
                txn.mark_seeded()
            })
            .unwrap();
        ledger
            .transact(|txn| {
                let seq = txn.next_sequence()?;
                txn.set_available(6)?;
                txn.append_transaction(Transaction::outgoing("tx_r".into(), 4, seq))
            })
            .unwrap();

        let state = ledger.read_state().unwrap();
        assert_eq!(state.available, 6);
        assert_eq!(state.issued_total, 10);
        assert_eq!(state.rows.len(), 1);
        assert_eq!(state.rows[0].amount, 4);
        assert!(ledger.transact(|txn| txn.is_seeded()).unwrap());
    }
}
