//! Submission networks.
//!
//! A proof is submitted either to the live secure-computation network over
//! HTTP or to [`SimulatedNetwork`], a local predicate used when running
//! offline or when the live network cannot be reached.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::NetworkError;
use crate::protocol::ActionType;

/// A proof ready for submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub proof: Vec<u8>,
    pub action: ActionType,
    /// Unix time in milliseconds.
    pub timestamp: i64,
    /// What the proof is about (the proposal id for votes).
    pub subject: Option<String>,
}

/// Remote verifier of submitted proofs.
#[async_trait]
pub trait SubmissionNetwork: Send + Sync {
    /// `Ok(())` means the proof was accepted.
    async fn submit(&self, submission: &Submission) -> Result<(), NetworkError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// SIMULATED NETWORK
// ═══════════════════════════════════════════════════════════════════════════════

/// Local stand-in for the live network.
///
/// Vote proofs must start with `mpc_vote_share_for_{proposal_id}`; any other
/// proof must be non-empty.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimulatedNetwork;

impl SimulatedNetwork {
    pub fn accepts(&self, submission: &Submission) -> bool {
        match submission.action {
            ActionType::GenerateMpcVote => match &submission.subject {
                Some(proposal_id) => submission
                    .proof
                    .starts_with(format!("mpc_vote_share_for_{proposal_id}").as_bytes()),
                None => false,
            },
            _ => !submission.proof.is_empty(),
        }
    }
}

#[async_trait]
impl SubmissionNetwork for SimulatedNetwork {
    async fn submit(&self, submission: &Submission) -> Result<(), NetworkError> {
        if self.accepts(submission) {
            Ok(())
        } else {
            Err(NetworkError::Rejected {
                status: 422,
                reason: "invalid proof".into(),
            })
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for the live submission client.
#[derive(Clone, Debug)]
pub struct HttpSubmissionConfig {
    /// Full URL of the submission endpoint.
    pub endpoint: String,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout.
    pub request_timeout: Duration,
}

impl Default for HttpSubmissionConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/submit".to_string(),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Serialize)]
struct SubmissionBody<'a> {
    proof: String,
    action: &'a str,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Live network client. POSTs `{proof, action, timestamp}` as JSON.
pub struct HttpSubmissionClient {
    config: HttpSubmissionConfig,
    http_client: reqwest::Client,
}

impl HttpSubmissionClient {
    pub fn new(config: HttpSubmissionConfig) -> Result<Self, NetworkError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| NetworkError::Transport(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, NetworkError> {
        Self::new(HttpSubmissionConfig {
            endpoint: endpoint.into(),
            ..Default::default()
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

#[async_trait]
impl SubmissionNetwork for HttpSubmissionClient {
    async fn submit(&self, submission: &Submission) -> Result<(), NetworkError> {
        let body = SubmissionBody {
            proof: hex::encode(&submission.proof),
            action: submission.action.as_str(),
            timestamp: submission.timestamp,
        };

        let response = self
            .http_client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(status = status.as_u16(), "Submission accepted");
            return Ok(());
        }
        if status.as_u16() == 429 {
            return Err(NetworkError::RateLimited);
        }
        if status.is_server_error() {
            return Err(NetworkError::ServerError {
                status: status.as_u16(),
            });
        }

        let text = response.text().await.unwrap_or_default();
        let reason = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|body| body.error.or(body.message))
            .unwrap_or_else(|| format!("HTTP {}", status));
        Err(NetworkError::Rejected {
            status: status.as_u16(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(proof: &str, proposal: Option<&str>) -> Submission {
        Submission {
            proof: proof.as_bytes().to_vec(),
            action: ActionType::GenerateMpcVote,
            timestamp: 0,
            subject: proposal.map(str::to_string),
        }
    }

    #[test]
    fn simulated_vote_predicate() {
        let net = SimulatedNetwork;
        assert!(net.accepts(&vote("mpc_vote_share_for_p1:abcd", Some("p1"))));
        assert!(!net.accepts(&vote("mpc_vote_share_for_p2:abcd", Some("p1"))));
        assert!(!net.accepts(&vote("mpc_vote_share_for_p1", None)));
    }

    #[test]
    fn simulated_non_vote_needs_bytes() {
        let net = SimulatedNetwork;
        let mut submission = vote("x", None);
        submission.action = ActionType::VerifyHealthAccess;
        assert!(net.accepts(&submission));
        submission.proof.clear();
        assert!(!net.accepts(&submission));
    }
}
