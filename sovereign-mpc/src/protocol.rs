//! Proof oracle wire protocol.
//!
//! Requests and responses travel as JSON with byte fields in standard
//! base64. The oracle itself only sees bytes.

use serde::{Deserialize, Serialize};

/// Kind of proof requested from the oracle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    GenerateProof,
    GenerateMpcVote,
    GenerateIdentityProof,
    VerifyHealthAccess,
    GenerateFieldProof,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenerateProof => "GENERATE_PROOF",
            Self::GenerateMpcVote => "GENERATE_MPC_VOTE",
            Self::GenerateIdentityProof => "GENERATE_IDENTITY_PROOF",
            Self::VerifyHealthAccess => "VERIFY_HEALTH_ACCESS",
            Self::GenerateFieldProof => "GENERATE_FIELD_PROOF",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceFields {
    pub proposal_id: String,
    pub vote_choice: String,
    #[serde(with = "b64")]
    pub identity_signature: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityFields {
    pub attribute_id: String,
    #[serde(with = "b64")]
    pub encrypted_identity_seed: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthFields {
    pub record_scope: String,
    #[serde(with = "b64")]
    pub access_signature: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub request_id: String,
    pub action_type: ActionType,
    #[serde(with = "b64", default)]
    pub payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance_fields: Option<GovernanceFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_fields: Option<IdentityFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_fields: Option<HealthFields>,
}

impl OracleRequest {
    pub fn new(request_id: impl Into<String>, action_type: ActionType, payload: Vec<u8>) -> Self {
        Self {
            request_id: request_id.into(),
            action_type,
            payload,
            governance_fields: None,
            identity_fields: None,
            health_fields: None,
        }
    }

    pub fn with_governance(mut self, fields: GovernanceFields) -> Self {
        self.governance_fields = Some(fields);
        self
    }

    pub fn with_identity(mut self, fields: IdentityFields) -> Self {
        self.identity_fields = Some(fields);
        self
    }

    pub fn with_health(mut self, fields: HealthFields) -> Self {
        self.health_fields = Some(fields);
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleResponse {
    #[serde(default)]
    pub request_id: String,
    pub success: bool,
    #[serde(with = "b64", default)]
    pub proof_data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl OracleResponse {
    pub fn success(request_id: impl Into<String>, proof_data: Vec<u8>) -> Self {
        Self {
            request_id: request_id.into(),
            success: true,
            proof_data,
            error_message: None,
        }
    }

    pub fn failure(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            proof_data: Vec::new(),
            error_message: Some(message.into()),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse oracle output. Anything unparseable becomes a failed response
    /// carrying a diagnostic, never an error.
    pub fn decode_lossy(bytes: &[u8], request_id: &str) -> Self {
        match serde_json::from_slice::<OracleResponse>(bytes) {
            Ok(response) => response,
            Err(err) => Self::failure(
                request_id,
                format!("Malformed oracle response ({} bytes): {}", bytes.len(), err),
            ),
        }
    }
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_wire_names_and_base64() {
        let request = OracleRequest::new("vote_1", ActionType::GenerateMpcVote, b"hi".to_vec())
            .with_governance(GovernanceFields {
                proposal_id: "proposal_ubi_001".into(),
                vote_choice: "YES".into(),
                identity_signature: vec![0xCA, 0xFE],
            });
        let json: serde_json::Value = serde_json::from_slice(&request.encode().unwrap()).unwrap();

        assert_eq!(json["action_type"], "GENERATE_MPC_VOTE");
        assert_eq!(json["payload"], "aGk=");
        assert_eq!(json["governance_fields"]["identity_signature"], "yv4=");
        assert!(json.get("identity_fields").is_none());
    }

    #[test]
    fn garbage_response_becomes_failure() {
        let response = OracleResponse::decode_lossy(&[0xFF, 0x00, 0x13], "req_9");
        assert!(!response.success);
        assert_eq!(response.request_id, "req_9");
        assert!(response
            .error_message
            .unwrap()
            .starts_with("Malformed oracle response"));
    }

    #[test]
    fn bad_base64_is_malformed() {
        let bytes = br#"{"request_id":"r","success":true,"proof_data":"***"}"#;
        let response = OracleResponse::decode_lossy(bytes, "r");
        assert!(!response.success);
    }
}
