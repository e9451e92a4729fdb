use sovereign_ledger::{LedgerError, TransactionId};
use thiserror::Error;

/// Errors from a peer transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    #[error("Not connected to {0}")]
    NotConnected(String),

    #[error("Transport closed")]
    Closed,
}

/// Errors from the transfer coordinator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Coordinator busy with another transfer")]
    Busy,

    #[error("Nothing to cancel")]
    NotActive,

    #[error("Transfer {tx_id} cancelled")]
    Cancelled { tx_id: TransactionId },

    #[error("Transfer {tx_id} failed: {reason}")]
    TransferFailed { tx_id: TransactionId, reason: String },

    /// Delivered but never acknowledged; the reservation is left to
    /// reconciliation.
    #[error("Transfer {tx_id} unconfirmed: {reason}")]
    Unconfirmed { tx_id: TransactionId, reason: String },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Coordinator channel closed")]
    ChannelClosed,
}
