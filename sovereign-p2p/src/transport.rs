//! Peer transport interface.
//!
//! Discovery and links are platform concerns (Bluetooth, Wi-Fi Direct,
//! ...). A transport exposes imperative calls and reports everything that
//! happens to it as [`TransportEvent`]s on the channel handed out when it is
//! created.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::TransportError;

pub type PeerId = String;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    PeerFound(PeerInfo),
    Connected(PeerId),
    Received { peer: PeerId, bytes: Vec<u8> },
    Disconnected(PeerId),
    Error { peer: Option<PeerId>, message: String },
}

/// Receiving half of a transport's event channel.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Become discoverable by peers.
    async fn advertise(&self) -> Result<(), TransportError>;

    /// Look for advertising peers; results arrive as `PeerFound`.
    async fn discover(&self) -> Result<(), TransportError>;

    /// Open a link; success arrives as `Connected`.
    async fn connect(&self, peer: &PeerId) -> Result<(), TransportError>;

    async fn send(&self, peer: &PeerId, bytes: Vec<u8>) -> Result<(), TransportError>;

    async fn disconnect(&self, peer: &PeerId) -> Result<(), TransportError>;
}
