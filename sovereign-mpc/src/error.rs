//! Error types for the secure-computation crate.

use serde::{Deserialize, Serialize};
use sovereign_common::AuthError;
use thiserror::Error;

/// Errors that keep a run from starting or finishing.
///
/// Protocol-level failures (oracle refusal, network rejection) are not
/// errors: they end the run in `Failed` and come back as a
/// [`crate::ComputationOutcome`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MpcError {
    #[error("Pipeline busy: another computation is in flight")]
    Busy,

    #[error("Computation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for MpcError {
    fn from(err: serde_json::Error) -> Self {
        MpcError::Serialization(err.to_string())
    }
}

/// Errors from a submission network.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Network timeout")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Server error: HTTP {status}")]
    ServerError { status: u16 },

    #[error("Submission rejected (HTTP {status}): {reason}")]
    Rejected { status: u16, reason: String },
}

impl NetworkError {
    /// Whether the simulated path may stand in for the live network.
    ///
    /// Explicit rejections are final; everything else means the network
    /// could not be reached or was overloaded.
    pub fn allows_fallback(&self) -> bool {
        !matches!(self, NetworkError::Rejected { .. })
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NetworkError::Timeout
        } else {
            NetworkError::Transport(err.to_string())
        }
    }
}

/// Why a run ended in `Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The proof oracle refused or returned garbage.
    Oracle,
    /// The network (live or simulated) rejected the proof.
    NetworkRejected,
    /// The live network was unreachable and fallback was disabled.
    NetworkUnavailable,
    /// A fault inside the pipeline itself.
    Internal,
}

/// Errors from the higher-level flows.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Pipeline(#[from] MpcError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rejections_block_fallback() {
        assert!(NetworkError::Timeout.allows_fallback());
        assert!(NetworkError::RateLimited.allows_fallback());
        assert!(NetworkError::ServerError { status: 503 }.allows_fallback());
        assert!(NetworkError::Transport("refused".into()).allows_fallback());
        assert!(!NetworkError::Rejected {
            status: 400,
            reason: "bad proof".into()
        }
        .allows_fallback());
    }
}
