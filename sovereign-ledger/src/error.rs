//! Error types for the ledger.

use thiserror::Error;

use crate::types::{TransactionId, TransactionStatus};

/// Errors from ledger operations.
///
/// Every variant except [`LedgerError::Storage`] and
/// [`LedgerError::Serialization`] is returned before anything is written:
/// the ledger is unchanged when one of them comes back.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // ═══════════════════════════════════════════════════════════════════════════
    // FUNDS
    // ═══════════════════════════════════════════════════════════════════════════
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: u64, available: u64 },

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Balance overflow")]
    BalanceOverflow,

    #[error("Ledger already seeded")]
    AlreadySeeded,

    // ═══════════════════════════════════════════════════════════════════════════
    // TRANSACTIONS
    // ═══════════════════════════════════════════════════════════════════════════
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(TransactionId),

    #[error("Transaction already exists: {0}")]
    TransactionExists(TransactionId),

    #[error("Lock {id} already exists for amount {existing}, requested {requested}")]
    DuplicateLock {
        id: TransactionId,
        existing: u64,
        requested: u64,
    },

    #[error("Transaction {id} already settled as {status}")]
    AlreadySettled {
        id: TransactionId,
        status: TransactionStatus,
    },

    #[error("Invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Ledger inconsistent: {0}")]
    Inconsistent(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // STORAGE
    // ═══════════════════════════════════════════════════════════════════════════
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}
