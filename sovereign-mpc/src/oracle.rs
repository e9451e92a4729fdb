//! Local proof oracle.
//!
//! The oracle is an opaque bytes-in/bytes-out capability (a native enclave
//! in production). [`OracleClient`] drives it off the async runtime and turns
//! every way it can misbehave into a typed [`OracleError`].

use std::sync::Arc;

use thiserror::Error;

use crate::error::FailureKind;
use crate::protocol::{ActionType, OracleRequest, OracleResponse};

/// Bytes-in/bytes-out proof generator.
pub trait ProofOracle: Send + Sync {
    fn process(&self, request: &[u8]) -> Vec<u8>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// The oracle answered `success = false` or with unparseable bytes.
    #[error("{0}")]
    Refused(String),

    #[error("Oracle response for {got} does not match request {expected}")]
    Mismatched { expected: String, got: String },

    /// The oracle faulted (panicked) while processing.
    #[error("Oracle fault: {0}")]
    Fault(String),
}

impl OracleError {
    pub fn kind(&self) -> FailureKind {
        match self {
            OracleError::Refused(_) | OracleError::Mismatched { .. } => FailureKind::Oracle,
            OracleError::Fault(_) => FailureKind::Internal,
        }
    }
}

#[derive(Clone)]
pub struct OracleClient {
    oracle: Arc<dyn ProofOracle>,
}

impl OracleClient {
    pub fn new(oracle: Arc<dyn ProofOracle>) -> Self {
        Self { oracle }
    }

    /// Generate a proof for `request` on the blocking pool.
    pub async fn generate(&self, request: &OracleRequest) -> Result<Vec<u8>, OracleError> {
        let encoded = request
            .encode()
            .map_err(|e| OracleError::Fault(format!("request encoding failed: {e}")))?;
        let oracle = Arc::clone(&self.oracle);
        let raw = tokio::task::spawn_blocking(move || oracle.process(&encoded))
            .await
            .map_err(|err| {
                if err.is_panic() {
                    OracleError::Fault("oracle panicked".into())
                } else {
                    OracleError::Fault(err.to_string())
                }
            })?;

        let response = OracleResponse::decode_lossy(&raw, &request.request_id);
        if !response.success {
            return Err(OracleError::Refused(
                response
                    .error_message
                    .unwrap_or_else(|| "oracle reported failure".into()),
            ));
        }
        if response.request_id != request.request_id {
            return Err(OracleError::Mismatched {
                expected: request.request_id.clone(),
                got: response.request_id,
            });
        }
        Ok(response.proof_data)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MOCK ENCLAVE
// ═══════════════════════════════════════════════════════════════════════════════

/// Deterministic in-process oracle.
///
/// - votes yield `mpc_vote_share_for_{proposal_id}:{digest}`
/// - identity attribute `invalid` is refused with `Invalid attribute`
/// - payload-carrying actions with an empty payload are refused with
///   `Empty payload`
/// - everything else yields the blake3 digest of the request
#[derive(Clone, Copy, Debug, Default)]
pub struct MockEnclave;

impl MockEnclave {
    fn respond(request: &OracleRequest) -> OracleResponse {
        let id = request.request_id.as_str();
        match request.action_type {
            ActionType::GenerateMpcVote => {
                let Some(governance) = &request.governance_fields else {
                    return OracleResponse::failure(id, "Missing governance fields");
                };
                if request.payload.is_empty() {
                    return OracleResponse::failure(id, "Empty payload");
                }
                let digest = blake3::hash(&request.payload).to_hex();
                let share = format!(
                    "mpc_vote_share_for_{}:{}",
                    governance.proposal_id,
                    &digest.as_str()[..16]
                );
                OracleResponse::success(id, share.into_bytes())
            }
            ActionType::GenerateIdentityProof => {
                let Some(identity) = &request.identity_fields else {
                    return OracleResponse::failure(id, "Missing identity fields");
                };
                if identity.attribute_id == "invalid" {
                    return OracleResponse::failure(id, "Invalid attribute");
                }
                Self::digest_proof(request)
            }
            ActionType::VerifyHealthAccess | ActionType::GenerateProof => {
                if request.payload.is_empty() {
                    return OracleResponse::failure(id, "Empty payload");
                }
                Self::digest_proof(request)
            }
            ActionType::GenerateFieldProof => Self::digest_proof(request),
        }
    }

    fn digest_proof(request: &OracleRequest) -> OracleResponse {
        match request.encode() {
            Ok(bytes) => OracleResponse::success(
                request.request_id.as_str(),
                blake3::hash(&bytes).as_bytes().to_vec(),
            ),
            Err(err) => OracleResponse::failure(
                request.request_id.as_str(),
                format!("Encode error: {err}"),
            ),
        }
    }
}

impl ProofOracle for MockEnclave {
    fn process(&self, request: &[u8]) -> Vec<u8> {
        let response = match OracleRequest::decode(request) {
            Ok(request) => Self::respond(&request),
            Err(err) => OracleResponse::failure("", format!("Decode error: {err}")),
        };
        // An empty reply decodes as a malformed-response failure.
        response.encode().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{GovernanceFields, IdentityFields};

    fn vote_request(proposal: &str, payload: &[u8]) -> OracleRequest {
        OracleRequest::new("vote_1", ActionType::GenerateMpcVote, payload.to_vec()).with_governance(
            GovernanceFields {
                proposal_id: proposal.into(),
                vote_choice: "YES".into(),
                identity_signature: vec![1, 2, 3],
            },
        )
    }

    #[tokio::test]
    async fn vote_share_names_the_proposal() {
        let client = OracleClient::new(Arc::new(MockEnclave));
        let proof = client
            .generate(&vote_request("proposal_ubi_001", b"Vote_YES_for_proposal_ubi_001"))
            .await
            .unwrap();
        assert!(String::from_utf8(proof)
            .unwrap()
            .starts_with("mpc_vote_share_for_proposal_ubi_001"));
    }

    #[tokio::test]
    async fn invalid_identity_attribute_is_refused() {
        let client = OracleClient::new(Arc::new(MockEnclave));
        let request = OracleRequest::new("id_1", ActionType::GenerateIdentityProof, Vec::new())
            .with_identity(IdentityFields {
                attribute_id: "invalid".into(),
                encrypted_identity_seed: vec![9; 8],
            });
        assert_eq!(
            client.generate(&request).await,
            Err(OracleError::Refused("Invalid attribute".into()))
        );
    }

    #[tokio::test]
    async fn empty_vote_payload_is_refused() {
        let client = OracleClient::new(Arc::new(MockEnclave));
        assert_eq!(
            client.generate(&vote_request("p", b"")).await,
            Err(OracleError::Refused("Empty payload".into()))
        );
    }

    #[test]
    fn undecodable_request_yields_failure_response() {
        let raw = MockEnclave.process(b"not json");
        let response = OracleResponse::decode_lossy(&raw, "x");
        assert!(!response.success);
        assert!(response.error_message.unwrap().starts_with("Decode error"));
    }

    struct Garbage;
    impl ProofOracle for Garbage {
        fn process(&self, _request: &[u8]) -> Vec<u8> {
            vec![0xDE, 0xAD, 0xBE, 0xEF]
        }
    }

    struct Panics;
    impl ProofOracle for Panics {
        fn process(&self, _request: &[u8]) -> Vec<u8> {
            panic!("enclave crashed")
        }
    }

    #[tokio::test]
    async fn malformed_and_panicking_oracles_are_contained() {
        let request = OracleRequest::new("r", ActionType::GenerateProof, b"x".to_vec());

        let malformed = OracleClient::new(Arc::new(Garbage)).generate(&request).await;
        assert!(matches!(malformed, Err(OracleError::Refused(msg)) if msg.starts_with("Malformed")));

        let fault = OracleClient::new(Arc::new(Panics))
            .generate(&request)
            .await
            .unwrap_err();
        assert_eq!(fault.kind(), FailureKind::Internal);
    }
}
