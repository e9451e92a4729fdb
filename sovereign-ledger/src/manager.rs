//! Fund Lock Manager: the only mutator of the balance.

use std::path::Path;
use std::sync::Arc;

use crate::activity::{ActivityKind, ActivityLog};
use crate::error::LedgerError;
use crate::store::{LedgerBackend, LedgerStore};
use crate::types::{Direction, LedgerSnapshot, Transaction, TransactionId, TransactionStatus};

/// Result of crediting an incoming transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub id: TransactionId,
    /// `false` when the id had already been credited.
    pub credited: bool,
}

/// Atomic check-and-reserve over a ledger store.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct FundLockManager {
    store: Arc<LedgerBackend>,
    activity: Option<ActivityLog>,
}

impl FundLockManager {
    pub fn new(store: impl Into<LedgerBackend>) -> Self {
        Self {
            store: Arc::new(store.into()),
            activity: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(LedgerBackend::in_memory())
    }

    pub fn persistent(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        Ok(Self::new(LedgerBackend::persistent(path)?))
    }

    /// Record transfers in `log` as they settle.
    pub fn with_activity_log(mut self, log: ActivityLog) -> Self {
        self.activity = Some(log);
        self
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BALANCE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Set the opening balance of an empty ledger. Allowed once.
    pub fn seed_balance(&self, opening: u64) -> Result<(), LedgerError> {
        self.store.transact(|txn| {
            if txn.is_seeded()? || txn.sequence()? > 0 {
                return Err(LedgerError::AlreadySeeded);
            }
            txn.set_available(opening)?;
            txn.set_issued_total(opening)?;
            txn.mark_seeded()
        })?;
        tracing::info!(opening, "Ledger seeded");
        Ok(())
    }

    pub fn available(&self) -> Result<u64, LedgerError> {
        self.store.get_available()
    }

    /// Reserve `amount` under a fresh id.
    pub fn lock_funds(&self, amount: u64) -> Result<TransactionId, LedgerError> {
        self.lock_funds_with_id(TransactionId::generate(), amount)
    }

    /// Reserve `amount` under a caller-chosen id.
    ///
    /// Retrying with the same id and amount returns the existing id without
    /// reserving again. The same id with another amount is a `DuplicateLock`.
    pub fn lock_funds_with_id(
        &self,
        id: TransactionId,
        amount: u64,
    ) -> Result<TransactionId, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let result = self.store.transact(|txn| {
            if let Some(existing) = txn.get_transaction(&id)? {
                if existing.direction == Direction::Outgoing && existing.amount == amount {
                    return Ok(false);
                }
                return Err(LedgerError::DuplicateLock {
                    id: id.clone(),
                    existing: existing.amount,
                    requested: amount,
                });
            }

            let available = txn.get_available()?;
            if available < amount {
                return Err(LedgerError::InsufficientFunds {
                    requested: amount,
                    available,
                });
            }
            txn.set_available(available - amount)?;
            let sequence = txn.next_sequence()?;
            txn.append_transaction(Transaction::outgoing(id.clone(), amount, sequence))?;
            Ok(true)
        });

        match result {
            Ok(true) => {
                tracing::info!(tx_id = %id, amount, "Funds locked");
                Ok(id)
            }
            Ok(false) => {
                tracing::debug!(tx_id = %id, amount, "Lock already held");
                Ok(id)
            }
            Err(err) => {
                tracing::warn!(tx_id = %id, amount, error = %err, "Lock rejected");
                Err(err)
            }
        }
    }

    /// Credit funds received from `source`.
    pub fn receive_funds(&self, amount: u64, source: &str) -> Result<TransactionId, LedgerError> {
        let receipt = self.receive_funds_with_id(TransactionId::generate(), amount, source)?;
        Ok(receipt.id)
    }

    /// Credit funds under a sender-chosen id. A repeated delivery of the same
    /// id and amount is acknowledged without crediting twice.
    pub fn receive_funds_with_id(
        &self,
        id: TransactionId,
        amount: u64,
        source: &str,
    ) -> Result<Receipt, LedgerError> {
        self.receive_funds_with_proof(id, amount, source, None)
    }

    /// [`FundLockManager::receive_funds_with_id`], keeping the sender's proof
    /// on the incoming row.
    pub fn receive_funds_with_proof(
        &self,
        id: TransactionId,
        amount: u64,
        source: &str,
        proof: Option<Vec<u8>>,
    ) -> Result<Receipt, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let credited = self.store.transact(|txn| {
            if let Some(existing) = txn.get_transaction(&id)? {
                if existing.direction == Direction::Incoming && existing.amount == amount {
                    return Ok(false);
                }
                return Err(LedgerError::TransactionExists(id.clone()));
            }

            let available = txn
                .get_available()?
                .checked_add(amount)
                .ok_or(LedgerError::BalanceOverflow)?;
            let issued = txn
                .issued_total()?
                .checked_add(amount)
                .ok_or(LedgerError::BalanceOverflow)?;
            txn.set_available(available)?;
            txn.set_issued_total(issued)?;
            let sequence = txn.next_sequence()?;
            let mut row = Transaction::incoming(id.clone(), amount, source, sequence);
            row.proof = proof.clone();
            txn.append_transaction(row)?;
            Ok(true)
        })?;

        if credited {
            tracing::info!(tx_id = %id, amount, source, "Funds received");
            self.log_transfer(&id);
        } else {
            tracing::debug!(tx_id = %id, "Duplicate receipt ignored");
        }
        Ok(Receipt { id, credited })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STATE MACHINE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Hand a `Locked` transaction to reconciliation.
    pub fn mark_pending_sync(
        &self,
        id: &TransactionId,
        counterparty: Option<String>,
        proof: Option<Vec<u8>>,
    ) -> Result<Transaction, LedgerError> {
        let updated = self.transition(id, TransactionStatus::PendingSync, |tx| {
            if counterparty.is_some() {
                tx.counterparty = counterparty.clone();
            }
            if proof.is_some() {
                tx.proof = proof.clone();
            }
        })?;
        tracing::info!(tx_id = %id, "Transaction pending sync");
        Ok(updated)
    }

    /// Settle a reserved transaction as `Confirmed` or `Failed`.
    ///
    /// `Failed` credits the amount back in the same unit of work.
    pub fn settle(
        &self,
        id: &TransactionId,
        outcome: TransactionStatus,
    ) -> Result<Transaction, LedgerError> {
        let result = if outcome.is_terminal() {
            self.transition(id, outcome, |_| {})
        } else {
            self.store
                .get_transaction(id)?
                .ok_or_else(|| LedgerError::UnknownTransaction(id.clone()))
                .and_then(|tx| {
                    Err(LedgerError::InvalidTransition {
                        id: id.clone(),
                        from: tx.status,
                        to: outcome,
                    })
                })
        };

        match result {
            Ok(updated) => {
                tracing::info!(tx_id = %id, status = %outcome, amount = updated.amount, "Transaction settled");
                if outcome == TransactionStatus::Confirmed {
                    self.log_transfer(id);
                }
                Ok(updated)
            }
            Err(err) => {
                tracing::warn!(tx_id = %id, status = %outcome, error = %err, "Settlement rejected");
                Err(err)
            }
        }
    }

    fn transition<M>(
        &self,
        id: &TransactionId,
        to: TransactionStatus,
        amend: M,
    ) -> Result<Transaction, LedgerError>
    where
        M: Fn(&mut Transaction),
    {
        self.store.transact(|txn| {
            let mut tx = txn
                .get_transaction(id)?
                .ok_or_else(|| LedgerError::UnknownTransaction(id.clone()))?;

            if tx.status.is_terminal() {
                return Err(LedgerError::AlreadySettled {
                    id: id.clone(),
                    status: tx.status,
                });
            }
            if tx.direction != Direction::Outgoing || !tx.status.can_transition_to(to) {
                return Err(LedgerError::InvalidTransition {
                    id: id.clone(),
                    from: tx.status,
                    to,
                });
            }

            if to == TransactionStatus::Failed {
                let restored = txn
                    .get_available()?
                    .checked_add(tx.amount)
                    .ok_or(LedgerError::BalanceOverflow)?;
                txn.set_available(restored)?;
            }

            tx.status = to;
            tx.updated_at = sovereign_common::now();
            amend(&mut tx);
            txn.update_transaction(tx.clone())?;
            Ok(tx)
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, LedgerError> {
        self.store.get_transaction(id)
    }

    /// Every transaction in insertion order.
    pub fn history(&self) -> Result<Vec<Transaction>, LedgerError> {
        self.store.list_transactions()
    }

    pub fn transactions_with_status(
        &self,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self
            .history()?
            .into_iter()
            .filter(|tx| tx.direction == Direction::Outgoing && tx.status == status)
            .collect())
    }

    pub fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        let state = self.store.read_state()?;
        Ok(LedgerSnapshot::from_rows(
            state.available,
            state.issued_total,
            &state.rows,
        ))
    }

    pub fn activity_log(&self) -> Option<&ActivityLog> {
        self.activity.as_ref()
    }

    fn log_transfer(&self, id: &TransactionId) {
        if let Some(log) = &self.activity {
            if let Err(err) = log.record(ActivityKind::Transfer, id.as_str()) {
                tracing::warn!(tx_id = %id, error = %err, "Failed to record transfer activity");
            }
        }
    }
}
