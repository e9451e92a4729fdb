//! Ledger data model.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerError;

/// Unique transaction identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Fresh random id.
    pub fn generate() -> Self {
        Self(format!("tx_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TransactionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle of a transaction record.
///
/// ```text
/// Locked ──► PendingSync ──► Confirmed
///   │             │
///   ├─────────────┴────────► Failed
///   └──────────────────────► Confirmed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Funds reserved, not yet handed to anyone.
    Locked,
    /// Handed to a peer, waiting for network settlement.
    PendingSync,
    /// Settled; funds permanently spent (or received).
    Confirmed,
    /// Abandoned; funds credited back.
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }

    /// Whether funds are held by this status without being spent.
    pub fn is_reserved(self) -> bool {
        matches!(self, Self::Locked | Self::PendingSync)
    }

    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Locked, PendingSync) | (Locked, Confirmed) | (Locked, Failed)
                | (PendingSync, Confirmed)
                | (PendingSync, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Locked => "LOCKED",
            Self::PendingSync => "PENDING_SYNC",
            Self::Confirmed => "CONFIRMED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which way value moved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Reservation made by `lock_funds`.
    Outgoing,
    /// Credit from a peer transfer or an income claim.
    Incoming,
}

/// One ledger row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub amount: u64,
    pub direction: Direction,
    pub status: TransactionStatus,
    pub counterparty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<Vec<u8>>,
    /// Insertion order.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub(crate) fn outgoing(id: TransactionId, amount: u64, sequence: u64) -> Self {
        let now = sovereign_common::now();
        Self {
            id,
            amount,
            direction: Direction::Outgoing,
            status: TransactionStatus::Locked,
            counterparty: None,
            proof: None,
            sequence,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn incoming(id: TransactionId, amount: u64, source: &str, sequence: u64) -> Self {
        let now = sovereign_common::now();
        Self {
            id,
            amount,
            direction: Direction::Incoming,
            status: TransactionStatus::Confirmed,
            counterparty: Some(source.to_string()),
            proof: None,
            sequence,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Point-in-time totals of the ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub available: u64,
    /// Opening balance plus every incoming credit.
    pub issued_total: u64,
    /// Outgoing `Locked` and `PendingSync` amounts.
    pub reserved: u64,
    /// Outgoing `Confirmed` amounts.
    pub spent: u64,
    /// Incoming amounts.
    pub received: u64,
    pub transactions: usize,
}

impl LedgerSnapshot {
    pub(crate) fn from_rows(available: u64, issued_total: u64, rows: &[Transaction]) -> Self {
        let mut snapshot = LedgerSnapshot {
            available,
            issued_total,
            transactions: rows.len(),
            ..Default::default()
        };
        for tx in rows {
            match (tx.direction, tx.status) {
                (Direction::Incoming, _) => snapshot.received += tx.amount,
                (Direction::Outgoing, status) if status.is_reserved() => {
                    snapshot.reserved += tx.amount
                }
                (Direction::Outgoing, TransactionStatus::Confirmed) => snapshot.spent += tx.amount,
                (Direction::Outgoing, _) => {}
            }
        }
        snapshot
    }

    /// Check `available + reserved + spent == issued_total`.
    pub fn verify(&self) -> Result<(), LedgerError> {
        let accounted = self
            .available
            .checked_add(self.reserved)
            .and_then(|sum| sum.checked_add(self.spent))
            .ok_or(LedgerError::BalanceOverflow)?;
        if accounted != self.issued_total {
            return Err(LedgerError::Inconsistent(format!(
                "available {} + reserved {} + spent {} != issued {}",
                self.available, self.reserved, self.spent, self.issued_total
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_one_directional() {
        use TransactionStatus::*;
        assert!(Locked.can_transition_to(PendingSync));
        assert!(Locked.can_transition_to(Confirmed));
        assert!(PendingSync.can_transition_to(Failed));
        assert!(!PendingSync.can_transition_to(Locked));
        assert!(!Confirmed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Confirmed));
        assert!(!Locked.can_transition_to(Locked));
    }

    #[test]
    fn status_serializes_in_upper_snake_case() {
        let json = serde_json::to_string(&TransactionStatus::PendingSync).unwrap();
        assert_eq!(json, "\"PENDING_SYNC\"");
    }

    #[test]
    fn snapshot_verify_detects_leaks() {
        let ok = LedgerSnapshot {
            available: 40,
            issued_total: 100,
            reserved: 50,
            spent: 10,
            ..Default::default()
        };
        assert!(ok.verify().is_ok());

        let leaked = LedgerSnapshot {
            available: 50,
            ..ok
        };
        assert!(matches!(leaked.verify(), Err(LedgerError::Inconsistent(_))));
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(TransactionId::generate(), TransactionId::generate());
        assert!(TransactionId::generate().as_str().starts_with("tx_"));
    }
}
