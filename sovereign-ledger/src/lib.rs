//! Offline fund-locking ledger.
//!
//! The ledger keeps one authoritative available balance and an append-only
//! log of transactions. [`FundLockManager`] is the only component allowed to
//! move value: it reserves funds atomically before anything leaves the
//! device, so two concurrent spends can never both succeed against the same
//! balance.
//!
//! ```text
//!  lock_funds ──► Locked ──► PendingSync ──► Confirmed
//!                   │             │
//!                   └─────────────┴────────► Failed (amount credited back)
//! ```
//!
//! Reconciliation with the network happens later through [`Reconciler`].

pub mod activity;
pub mod error;
pub mod manager;
pub mod reconcile;
pub mod store;
pub mod types;

pub use activity::{ActivityEntry, ActivityKind, ActivityLog};
pub use error::LedgerError;
pub use manager::{FundLockManager, Receipt};
pub use reconcile::{
    AssumeConfirmed, ReconcileReport, Reconciler, ReconcilerHandle, SettlementOracle,
    SettlementVerdict, MIN_RECONCILE_PERIOD,
};
pub use store::{LedgerBackend, LedgerState, LedgerStore, LedgerTxn, MemoryLedger, SledLedger};
pub use types::{Direction, LedgerSnapshot, Transaction, TransactionId, TransactionStatus};
