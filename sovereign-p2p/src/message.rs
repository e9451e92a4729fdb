//! Messages exchanged between peers during a transfer.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// Sender to receiver: value reserved under `tx_id`.
    Transfer {
        tx_id: String,
        amount: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        proof: Option<Vec<u8>>,
    },
    /// Receiver to sender: transfer credited.
    Ack { tx_id: String },
    /// Receiver to sender: transfer refused.
    Reject { tx_id: String, reason: String },
}

impl PeerMessage {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn tx_id(&self) -> &str {
        match self {
            PeerMessage::Transfer { tx_id, .. }
            | PeerMessage::Ack { tx_id }
            | PeerMessage::Reject { tx_id, .. } => tx_id,
        }
    }
}
