//! In-process transport connecting exactly two endpoints.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transport::{PeerId, PeerInfo, PeerTransport, TransportEvent, TransportEvents};

#[derive(Default)]
struct Side {
    advertising: bool,
    discovering: bool,
    /// Drop everything this side sends.
    drop_outgoing: bool,
    refuse_connections: bool,
}

#[derive(Default)]
struct Shared {
    sides: [Side; 2],
    connected: bool,
}

/// One end of a [`LoopbackTransport::pair`].
#[derive(Clone)]
pub struct LoopbackTransport {
    index: usize,
    infos: [PeerInfo; 2],
    events: [mpsc::UnboundedSender<TransportEvent>; 2],
    shared: Arc<Mutex<Shared>>,
}

impl LoopbackTransport {
    /// Two linked endpoints and their event streams.
    pub fn pair(
        name_a: &str,
        name_b: &str,
    ) -> ((LoopbackTransport, TransportEvents), (LoopbackTransport, TransportEvents)) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let infos = [
            PeerInfo {
                id: format!("loopback-{name_a}"),
                name: name_a.to_string(),
            },
            PeerInfo {
                id: format!("loopback-{name_b}"),
                name: name_b.to_string(),
            },
        ];
        let shared = Arc::new(Mutex::new(Shared::default()));
        let endpoint = |index| LoopbackTransport {
            index,
            infos: infos.clone(),
            events: [tx_a.clone(), tx_b.clone()],
            shared: Arc::clone(&shared),
        };
        ((endpoint(0), rx_a), (endpoint(1), rx_b))
    }

    pub fn local_id(&self) -> &PeerId {
        &self.infos[self.index].id
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.infos[self.other()].id
    }

    /// Silently lose everything this endpoint sends.
    pub fn set_drop_outgoing(&self, drop: bool) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.sides[self.index].drop_outgoing = drop;
        }
    }

    /// Refuse inbound connections to this endpoint.
    pub fn set_refuse_connections(&self, refuse: bool) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.sides[self.index].refuse_connections = refuse;
        }
    }

    /// Break the link as if the radio dropped.
    pub fn sever(&self) {
        if let Ok(mut shared) = self.shared.lock() {
            if shared.connected {
                shared.connected = false;
                self.emit_local(TransportEvent::Disconnected(self.peer_id().clone()));
                self.emit_remote(TransportEvent::Disconnected(self.local_id().clone()));
            }
        }
    }

    fn other(&self) -> usize {
        1 - self.index
    }

    fn lock(&self) -> Result<MutexGuard<'_, Shared>, TransportError> {
        self.shared.lock().map_err(|_| TransportError::Closed)
    }

    fn emit_local(&self, event: TransportEvent) {
        let _ = self.events[self.index].send(event);
    }

    fn emit_remote(&self, event: TransportEvent) {
        let _ = self.events[self.other()].send(event);
    }

    fn check_peer(&self, peer: &PeerId) -> Result<(), TransportError> {
        if peer != self.peer_id() {
            return Err(TransportError::UnknownPeer(peer.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn advertise(&self) -> Result<(), TransportError> {
        let mut shared = self.lock()?;
        shared.sides[self.index].advertising = true;
        if shared.sides[self.other()].discovering {
            self.emit_remote(TransportEvent::PeerFound(self.infos[self.index].clone()));
        }
        Ok(())
    }

    async fn discover(&self) -> Result<(), TransportError> {
        let mut shared = self.lock()?;
        shared.sides[self.index].discovering = true;
        if shared.sides[self.other()].advertising {
            self.emit_local(TransportEvent::PeerFound(self.infos[self.other()].clone()));
        }
        Ok(())
    }

    async fn connect(&self, peer: &PeerId) -> Result<(), TransportError> {
        self.check_peer(peer)?;
        let mut shared = self.lock()?;
        let remote = &shared.sides[self.other()];
        if !remote.advertising || remote.refuse_connections {
            return Err(TransportError::Unreachable(peer.clone()));
        }
        shared.connected = true;
        self.emit_local(TransportEvent::Connected(peer.clone()));
        self.emit_remote(TransportEvent::Connected(self.local_id().clone()));
        Ok(())
    }

    async fn send(&self, peer: &PeerId, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.check_peer(peer)?;
        let shared = self.lock()?;
        if !shared.connected {
            return Err(TransportError::NotConnected(peer.clone()));
        }
        if !shared.sides[self.index].drop_outgoing {
            self.emit_remote(TransportEvent::Received {
                peer: self.local_id().clone(),
                bytes,
            });
        }
        Ok(())
    }

    async fn disconnect(&self, peer: &PeerId) -> Result<(), TransportError> {
        self.check_peer(peer)?;
        let mut shared = self.lock()?;
        if shared.connected {
            shared.connected = false;
            self.emit_remote(TransportEvent::Disconnected(self.local_id().clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discovery_connect_and_send() {
        let ((a, mut a_events), (b, mut b_events)) = LoopbackTransport::pair("alice", "bob");

        b.advertise().await.unwrap();
        a.discover().await.unwrap();
        let found = a_events.recv().await.unwrap();
        assert_eq!(
            found,
            TransportEvent::PeerFound(PeerInfo {
                id: "loopback-bob".into(),
                name: "bob".into()
            })
        );

        a.connect(a.peer_id()).await.unwrap();
        assert_eq!(
            a_events.recv().await.unwrap(),
            TransportEvent::Connected("loopback-bob".into())
        );
        assert_eq!(
            b_events.recv().await.unwrap(),
            TransportEvent::Connected("loopback-alice".into())
        );

        a.send(a.peer_id(), b"hi".to_vec()).await.unwrap();
        assert_eq!(
            b_events.recv().await.unwrap(),
            TransportEvent::Received {
                peer: "loopback-alice".into(),
                bytes: b"hi".to_vec()
            }
        );
    }

    #[tokio::test]
    async fn connecting_to_silent_peer_fails() {
        let ((a, _), (_b, _)) = LoopbackTransport::pair("alice", "bob");
        assert!(matches!(
            a.connect(&"loopback-bob".to_string()).await,
            Err(TransportError::Unreachable(_))
        ));
        assert!(matches!(
            a.connect(&"somebody".to_string()).await,
            Err(TransportError::UnknownPeer(_))
        ));
    }
}
