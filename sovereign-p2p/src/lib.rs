//! Peer-to-peer value transfer.
//!
//! [`PeerTransferCoordinator`] drives one transfer at a time over a
//! [`PeerTransport`], reserving funds in the sender's ledger before anything
//! is sent and crediting the receiver's ledger when the transfer arrives.
//! [`LoopbackTransport`] links two coordinators in-process.

pub mod coordinator;
pub mod error;
pub mod loopback;
pub mod message;
pub mod transport;

pub use coordinator::{
    CoordinatorConfig, CoordinatorEvent, CoordinatorHandle, P2pStatus, PeerTransferCoordinator,
    TransferOutcome,
};
pub use error::{CoordinatorError, TransportError};
pub use loopback::LoopbackTransport;
pub use message::PeerMessage;
pub use transport::{PeerId, PeerInfo, PeerTransport, TransportEvent, TransportEvents};
