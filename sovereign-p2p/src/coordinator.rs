//! Peer transfer coordinator.
//!
//! A single task owns the transfer state. It consumes commands from
//! [`CoordinatorHandle`]s and events from the transport, and turns them into
//! ledger operations:
//!
//! ```text
//!  send_funds ─► lock_funds ─► discover ─► connect ─► Transfer ─► Ack ─► settle(Confirmed)
//!                                 │            │          │         └──► mark_pending_sync
//!                                 └────────────┴──────────┴─ failure / cancel ─► settle(Failed)
//! ```
//!
//! Once the `Transfer` message is out, the receiver may already have credited
//! it. A timeout, disconnect, cancel or stop at that point leaves the row
//! `PendingSync` for the reconciler instead of releasing the funds. Only an
//! explicit `Reject` from the peer releases them.
//!
//! Only one operation runs at a time; a second one is rejected with
//! [`CoordinatorError::Busy`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sovereign_ledger::{FundLockManager, TransactionId, TransactionStatus};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::error::CoordinatorError;
use crate::message::PeerMessage;
use crate::transport::{PeerId, PeerInfo, PeerTransport, TransportEvent, TransportEvents};

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Confirm outgoing transfers as soon as the peer acknowledges them.
    /// When false they are handed to reconciliation as `PendingSync`.
    #[serde(default = "default_settle_on_ack")]
    pub settle_on_ack: bool,
    /// Upper bound on discovery, connection and acknowledgement together.
    #[serde(default = "default_transfer_timeout", with = "duration_secs")]
    pub transfer_timeout: Duration,
}

fn default_settle_on_ack() -> bool {
    true
}

fn default_transfer_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            settle_on_ack: default_settle_on_ack(),
            transfer_timeout: default_transfer_timeout(),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATUS & EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// What the coordinator is doing right now.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum P2pStatus {
    Idle,
    Scanning,
    PeerFound { peer: String },
    Connecting { peer: String },
    AwaitingAck { tx_id: TransactionId },
    Receiving,
    Success { message: String },
    Error { message: String },
}

impl P2pStatus {
    pub fn message(&self) -> String {
        match self {
            P2pStatus::Idle => "Idle".into(),
            P2pStatus::Scanning => "Scanning for peers...".into(),
            P2pStatus::PeerFound { peer } => format!("Found {peer}"),
            P2pStatus::Connecting { peer } => format!("Connecting to {peer}..."),
            P2pStatus::AwaitingAck { .. } => "Waiting for peer to confirm...".into(),
            P2pStatus::Receiving => "Waiting for incoming transfer...".into(),
            P2pStatus::Success { message } | P2pStatus::Error { message } => message.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    StatusChanged {
        status: P2pStatus,
    },
    TransferSent {
        tx_id: TransactionId,
        amount: u64,
        peer: PeerId,
    },
    TransferSettled {
        tx_id: TransactionId,
        status: TransactionStatus,
    },
    TransferReceived {
        tx_id: TransactionId,
        amount: u64,
        peer: PeerId,
        credited: bool,
    },
}

/// Result of a completed outgoing transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub tx_id: TransactionId,
    pub status: TransactionStatus,
    pub peer: PeerId,
}

// ═══════════════════════════════════════════════════════════════════════════════
// COORDINATOR HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Handle for interacting with a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    command_tx: mpsc::Sender<CoordinatorCommand>,
    event_tx: broadcast::Sender<CoordinatorEvent>,
    status_rx: watch::Receiver<P2pStatus>,
}

impl CoordinatorHandle {
    pub fn status(&self) -> P2pStatus {
        self.status_rx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<P2pStatus> {
        self.status_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.event_tx.subscribe()
    }

    /// Reserve `amount` and hand it to the first peer found.
    ///
    /// Resolves once the peer acknowledges, rejects, or the transfer is
    /// cancelled or times out.
    pub async fn send_funds(
        &self,
        amount: u64,
        proof: Option<Vec<u8>>,
    ) -> Result<TransferOutcome, CoordinatorError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(CoordinatorCommand::Send {
                amount,
                proof,
                reply,
            })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        reply_rx.await.map_err(|_| CoordinatorError::ChannelClosed)?
    }

    /// Advertise and accept incoming transfers until cancelled.
    pub async fn start_receiving(&self) -> Result<(), CoordinatorError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(CoordinatorCommand::StartReceiving { reply })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        reply_rx.await.map_err(|_| CoordinatorError::ChannelClosed)?
    }

    /// Abandon the current operation. An outgoing transfer releases its funds.
    pub async fn cancel(&self) -> Result<(), CoordinatorError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(CoordinatorCommand::Cancel { reply })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        reply_rx.await.map_err(|_| CoordinatorError::ChannelClosed)?
    }

    /// Stop the coordinator task.
    pub async fn stop(&self) -> Result<(), CoordinatorError> {
        self.command_tx
            .send(CoordinatorCommand::Stop)
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)
    }
}

type Reply<T> = oneshot::Sender<Result<T, CoordinatorError>>;

enum CoordinatorCommand {
    Send {
        amount: u64,
        proof: Option<Vec<u8>>,
        reply: Reply<TransferOutcome>,
    },
    StartReceiving {
        reply: Reply<()>,
    },
    Cancel {
        reply: Reply<()>,
    },
    Stop,
}

// ═══════════════════════════════════════════════════════════════════════════════
// COORDINATOR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SendPhase {
    Scanning,
    Connecting,
    AwaitingAck,
}

struct OutgoingTransfer {
    tx_id: TransactionId,
    amount: u64,
    proof: Option<Vec<u8>>,
    peer: Option<PeerId>,
    phase: SendPhase,
    deadline: Instant,
    reply: Reply<TransferOutcome>,
}

enum Operation {
    Idle,
    Sending(OutgoingTransfer),
    Receiving,
}

pub struct PeerTransferCoordinator {
    manager: FundLockManager,
    transport: Arc<dyn PeerTransport>,
    config: CoordinatorConfig,
    status_tx: watch::Sender<P2pStatus>,
    event_tx: broadcast::Sender<CoordinatorEvent>,
    operation: Operation,
}

impl PeerTransferCoordinator {
    /// Start a coordinator over `transport`, consuming its event stream.
    pub fn spawn(
        manager: FundLockManager,
        transport: Arc<dyn PeerTransport>,
        transport_events: TransportEvents,
        config: CoordinatorConfig,
    ) -> CoordinatorHandle {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (event_tx, _) = broadcast::channel(64);
        let (status_tx, status_rx) = watch::channel(P2pStatus::Idle);

        let handle = CoordinatorHandle {
            command_tx,
            event_tx: event_tx.clone(),
            status_rx,
        };

        let coordinator = PeerTransferCoordinator {
            manager,
            transport,
            config,
            status_tx,
            event_tx,
            operation: Operation::Idle,
        };
        tokio::spawn(coordinator.run_loop(command_rx, transport_events));

        handle
    }

    async fn run_loop(
        mut self,
        mut command_rx: mpsc::Receiver<CoordinatorCommand>,
        mut transport_events: TransportEvents,
    ) {
        tracing::info!(
            settle_on_ack = self.config.settle_on_ack,
            timeout_secs = self.config.transfer_timeout.as_secs(),
            "Transfer coordinator started"
        );

        loop {
            let deadline = self.deadline();
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(CoordinatorCommand::Stop) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },

                Some(event) = transport_events.recv() => {
                    self.handle_event(event).await;
                }

                _ = wait_until(deadline) => {
                    self.fail_transfer("Timed out waiting for peer".into()).await;
                }
            }
        }

        self.fail_transfer("Coordinator stopped".into()).await;
        self.set_status(P2pStatus::Idle);
        tracing::info!("Transfer coordinator stopped");
    }

    fn deadline(&self) -> Option<Instant> {
        match &self.operation {
            Operation::Sending(transfer) => Some(transfer.deadline),
            _ => None,
        }
    }

    fn set_status(&self, status: P2pStatus) {
        self.status_tx.send_replace(status.clone());
        let _ = self.event_tx.send(CoordinatorEvent::StatusChanged { status });
    }

    fn transfer_mut(&mut self) -> Option<&mut OutgoingTransfer> {
        match &mut self.operation {
            Operation::Sending(transfer) => Some(transfer),
            _ => None,
        }
    }

    fn take_transfer(&mut self) -> Option<OutgoingTransfer> {
        match std::mem::replace(&mut self.operation, Operation::Idle) {
            Operation::Sending(transfer) => Some(transfer),
            other => {
                self.operation = other;
                None
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // COMMANDS
    // ═══════════════════════════════════════════════════════════════════════════

    async fn handle_command(&mut self, cmd: CoordinatorCommand) {
        match cmd {
            CoordinatorCommand::Send {
                amount,
                proof,
                reply,
            } => {
                if !matches!(self.operation, Operation::Idle) {
                    let _ = reply.send(Err(CoordinatorError::Busy));
                    return;
                }
                self.begin_transfer(amount, proof, reply).await;
            }
            CoordinatorCommand::StartReceiving { reply } => {
                let _ = reply.send(self.begin_receiving().await);
            }
            CoordinatorCommand::Cancel { reply } => {
                let _ = reply.send(self.cancel().await);
            }
            CoordinatorCommand::Stop => {}
        }
    }

    async fn begin_transfer(
        &mut self,
        amount: u64,
        proof: Option<Vec<u8>>,
        reply: Reply<TransferOutcome>,
    ) {
        let tx_id = match self.manager.lock_funds(amount) {
            Ok(tx_id) => tx_id,
            Err(err) => {
                self.set_status(P2pStatus::Error {
                    message: err.to_string(),
                });
                let _ = reply.send(Err(err.into()));
                return;
            }
        };

        tracing::info!(tx_id = %tx_id, amount, "Outgoing transfer started");
        self.operation = Operation::Sending(OutgoingTransfer {
            tx_id,
            amount,
            proof,
            peer: None,
            phase: SendPhase::Scanning,
            deadline: Instant::now() + self.config.transfer_timeout,
            reply,
        });
        self.set_status(P2pStatus::Scanning);

        if let Err(err) = self.transport.discover().await {
            self.fail_transfer(format!("Discovery failed: {err}")).await;
        }
    }

    async fn begin_receiving(&mut self) -> Result<(), CoordinatorError> {
        match self.operation {
            Operation::Receiving => return Ok(()),
            Operation::Sending(_) => return Err(CoordinatorError::Busy),
            Operation::Idle => {}
        }

        if let Err(err) = self.transport.advertise().await {
            self.set_status(P2pStatus::Error {
                message: err.to_string(),
            });
            return Err(err.into());
        }
        self.operation = Operation::Receiving;
        self.set_status(P2pStatus::Receiving);
        tracing::info!("Accepting incoming transfers");
        Ok(())
    }

    async fn cancel(&mut self) -> Result<(), CoordinatorError> {
        match std::mem::replace(&mut self.operation, Operation::Idle) {
            Operation::Sending(transfer) if transfer.phase == SendPhase::AwaitingAck => {
                self.hand_off_unconfirmed(transfer, "Cancelled after delivery".into(), P2pStatus::Idle)
                    .await;
                Ok(())
            }
            Operation::Sending(transfer) => {
                tracing::info!(tx_id = %transfer.tx_id, "Outgoing transfer cancelled");
                let error = CoordinatorError::Cancelled {
                    tx_id: transfer.tx_id.clone(),
                };
                self.abandon(transfer, error, P2pStatus::Idle).await;
                Ok(())
            }
            Operation::Receiving => {
                tracing::info!("Stopped accepting transfers");
                self.set_status(P2pStatus::Idle);
                Ok(())
            }
            Operation::Idle => Err(CoordinatorError::NotActive),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TRANSPORT EVENTS
    // ═══════════════════════════════════════════════════════════════════════════

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerFound(info) => self.on_peer_found(info).await,
            TransportEvent::Connected(peer) => self.on_connected(peer).await,
            TransportEvent::Received { peer, bytes } => self.on_message(peer, bytes).await,
            TransportEvent::Disconnected(peer) => {
                let ours = self
                    .transfer_mut()
                    .is_some_and(|transfer| transfer.peer.as_ref() == Some(&peer));
                if ours {
                    self.fail_transfer(format!("Peer {peer} disconnected")).await;
                } else {
                    tracing::debug!(peer = %peer, "Peer disconnected");
                }
            }
            TransportEvent::Error { peer, message } => {
                tracing::warn!(peer = ?peer, error = %message, "Transport error");
                let ours = self.transfer_mut().is_some_and(|transfer| {
                    peer.is_none() || transfer.peer.as_ref() == peer.as_ref()
                });
                if ours {
                    self.fail_transfer(message).await;
                }
            }
        }
    }

    async fn on_peer_found(&mut self, info: PeerInfo) {
        match self.transfer_mut() {
            Some(transfer) if transfer.phase == SendPhase::Scanning => {
                transfer.phase = SendPhase::Connecting;
                transfer.peer = Some(info.id.clone());
            }
            _ => {
                tracing::debug!(peer = %info.id, "Ignoring discovered peer");
                return;
            }
        }

        self.set_status(P2pStatus::PeerFound {
            peer: info.name.clone(),
        });
        self.set_status(P2pStatus::Connecting {
            peer: info.name.clone(),
        });
        if let Err(err) = self.transport.connect(&info.id).await {
            self.fail_transfer(format!("Connection failed: {err}")).await;
        }
    }

    async fn on_connected(&mut self, peer: PeerId) {
        let (tx_id, amount, proof) = match self.transfer_mut() {
            Some(transfer)
                if transfer.phase == SendPhase::Connecting
                    && transfer.peer.as_ref() == Some(&peer) =>
            {
                (
                    transfer.tx_id.clone(),
                    transfer.amount,
                    transfer.proof.clone(),
                )
            }
            _ => {
                tracing::debug!(peer = %peer, "Peer connected");
                return;
            }
        };

        let message = PeerMessage::Transfer {
            tx_id: tx_id.to_string(),
            amount,
            proof,
        };
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                self.fail_transfer(format!("Failed to encode transfer: {err}"))
                    .await;
                return;
            }
        };
        if let Err(err) = self.transport.send(&peer, bytes).await {
            self.fail_transfer(format!("Send failed: {err}")).await;
            return;
        }
        if let Some(transfer) = self.transfer_mut() {
            transfer.phase = SendPhase::AwaitingAck;
        }

        tracing::info!(tx_id = %tx_id, amount, peer = %peer, "Transfer sent, awaiting ack");
        self.set_status(P2pStatus::AwaitingAck {
            tx_id: tx_id.clone(),
        });
        let _ = self.event_tx.send(CoordinatorEvent::TransferSent {
            tx_id,
            amount,
            peer,
        });
    }

    async fn on_message(&mut self, peer: PeerId, bytes: Vec<u8>) {
        let message = match PeerMessage::decode(&bytes) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(peer = %peer, error = %err, "Dropping malformed peer message");
                return;
            }
        };

        match message {
            PeerMessage::Transfer {
                tx_id,
                amount,
                proof,
            } => {
                self.on_inbound_transfer(peer, tx_id, amount, proof).await;
            }
            PeerMessage::Ack { tx_id } => {
                if self.is_awaiting(&peer, &tx_id) {
                    self.complete_transfer().await;
                } else {
                    tracing::debug!(peer = %peer, tx_id = %tx_id, "Ignoring unexpected ack");
                }
            }
            PeerMessage::Reject { tx_id, reason } => {
                if self.is_awaiting(&peer, &tx_id) {
                    if let Some(transfer) = self.take_transfer() {
                        self.release_transfer(transfer, format!("Rejected by peer: {reason}"))
                            .await;
                    }
                } else {
                    tracing::debug!(peer = %peer, tx_id = %tx_id, "Ignoring unexpected reject");
                }
            }
        }
    }

    fn is_awaiting(&mut self, peer: &PeerId, tx_id: &str) -> bool {
        self.transfer_mut().is_some_and(|transfer| {
            transfer.phase == SendPhase::AwaitingAck
                && transfer.peer.as_ref() == Some(peer)
                && transfer.tx_id.as_str() == tx_id
        })
    }

    async fn on_inbound_transfer(
        &mut self,
        peer: PeerId,
        tx_id: String,
        amount: u64,
        proof: Option<Vec<u8>>,
    ) {
        if !matches!(self.operation, Operation::Receiving) {
            tracing::warn!(peer = %peer, tx_id = %tx_id, "Inbound transfer while not receiving");
            self.reply(
                &peer,
                PeerMessage::Reject {
                    tx_id,
                    reason: "Not accepting transfers".into(),
                },
            )
            .await;
            return;
        }

        let id = TransactionId::from(tx_id.clone());
        match self
            .manager
            .receive_funds_with_proof(id, amount, &peer, proof)
        {
            Ok(receipt) => {
                if receipt.credited {
                    self.set_status(P2pStatus::Success {
                        message: format!("Received {amount} from {peer}"),
                    });
                }
                let _ = self.event_tx.send(CoordinatorEvent::TransferReceived {
                    tx_id: receipt.id,
                    amount,
                    peer: peer.clone(),
                    credited: receipt.credited,
                });
                self.reply(&peer, PeerMessage::Ack { tx_id }).await;
            }
            Err(err) => {
                tracing::warn!(peer = %peer, tx_id = %tx_id, error = %err, "Inbound transfer refused");
                self.reply(
                    &peer,
                    PeerMessage::Reject {
                        tx_id,
                        reason: err.to_string(),
                    },
                )
                .await;
            }
        }
    }

    async fn reply(&self, peer: &PeerId, message: PeerMessage) {
        let sent = match message.encode() {
            Ok(bytes) => self.transport.send(peer, bytes).await.map_err(|e| e.to_string()),
            Err(err) => Err(err.to_string()),
        };
        if let Err(err) = sent {
            tracing::warn!(peer = %peer, tx_id = message.tx_id(), error = %err, "Failed to reply to peer");
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SETTLEMENT
    // ═══════════════════════════════════════════════════════════════════════════

    async fn complete_transfer(&mut self) {
        let Some(transfer) = self.take_transfer() else {
            return;
        };
        let peer = transfer.peer.clone().unwrap_or_default();

        let settled = if self.config.settle_on_ack {
            self.manager
                .settle(&transfer.tx_id, TransactionStatus::Confirmed)
        } else {
            self.manager.mark_pending_sync(
                &transfer.tx_id,
                Some(peer.clone()),
                transfer.proof.clone(),
            )
        };
        let _ = self.transport.disconnect(&peer).await;

        match settled {
            Ok(tx) => {
                let _ = self.event_tx.send(CoordinatorEvent::TransferSettled {
                    tx_id: tx.id.clone(),
                    status: tx.status,
                });
                self.set_status(P2pStatus::Success {
                    message: format!("Sent {} to {peer}", transfer.amount),
                });
                let _ = transfer.reply.send(Ok(TransferOutcome {
                    tx_id: tx.id,
                    status: tx.status,
                    peer,
                }));
            }
            Err(err) => {
                tracing::error!(tx_id = %transfer.tx_id, error = %err, "Acknowledged transfer could not be recorded");
                self.set_status(P2pStatus::Error {
                    message: err.to_string(),
                });
                let _ = transfer.reply.send(Err(err.into()));
            }
        }
    }

    /// End the outgoing transfer after a local failure.
    async fn fail_transfer(&mut self, reason: String) {
        let Some(transfer) = self.take_transfer() else {
            return;
        };
        if transfer.phase == SendPhase::AwaitingAck {
            let status = P2pStatus::Error {
                message: format!("{reason}; awaiting reconciliation"),
            };
            self.hand_off_unconfirmed(transfer, reason, status).await;
        } else {
            self.release_transfer(transfer, reason).await;
        }
    }

    async fn release_transfer(&mut self, transfer: OutgoingTransfer, reason: String) {
        tracing::warn!(tx_id = %transfer.tx_id, reason = %reason, "Outgoing transfer failed");
        let error = CoordinatorError::TransferFailed {
            tx_id: transfer.tx_id.clone(),
            reason: reason.clone(),
        };
        self.abandon(transfer, error, P2pStatus::Error { message: reason })
            .await;
    }

    /// Keep the reservation as `PendingSync` and resolve the waiting caller
    /// with [`CoordinatorError::Unconfirmed`].
    async fn hand_off_unconfirmed(
        &mut self,
        transfer: OutgoingTransfer,
        reason: String,
        status: P2pStatus,
    ) {
        tracing::warn!(
            tx_id = %transfer.tx_id,
            reason = %reason,
            "Transfer delivered without ack, leaving it for reconciliation"
        );
        match self.manager.mark_pending_sync(
            &transfer.tx_id,
            transfer.peer.clone(),
            transfer.proof.clone(),
        ) {
            Ok(tx) => {
                let _ = self.event_tx.send(CoordinatorEvent::TransferSettled {
                    tx_id: tx.id,
                    status: tx.status,
                });
            }
            Err(err) => {
                tracing::error!(tx_id = %transfer.tx_id, error = %err, "Failed to hand transfer to reconciliation");
            }
        }
        if let Some(peer) = &transfer.peer {
            let _ = self.transport.disconnect(peer).await;
        }
        self.set_status(status);
        let _ = transfer.reply.send(Err(CoordinatorError::Unconfirmed {
            tx_id: transfer.tx_id,
            reason,
        }));
    }

    /// Release the reservation and resolve the waiting caller with `error`.
    async fn abandon(
        &mut self,
        transfer: OutgoingTransfer,
        error: CoordinatorError,
        status: P2pStatus,
    ) {
        match self
            .manager
            .settle(&transfer.tx_id, TransactionStatus::Failed)
        {
            Ok(_) => {
                let _ = self.event_tx.send(CoordinatorEvent::TransferSettled {
                    tx_id: transfer.tx_id.clone(),
                    status: TransactionStatus::Failed,
                });
            }
            Err(err) => {
                tracing::error!(tx_id = %transfer.tx_id, error = %err, "Failed to release reserved funds");
            }
        }
        if let Some(peer) = &transfer.peer {
            let _ = self.transport.disconnect(peer).await;
        }
        self.set_status(status);
        let _ = transfer.reply.send(Err(error));
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackTransport;
    use sovereign_ledger::{Direction, LedgerError};

    struct Node {
        manager: FundLockManager,
        handle: CoordinatorHandle,
        transport: LoopbackTransport,
    }

    fn pair_with(balances: (u64, u64), config: CoordinatorConfig) -> (Node, Node) {
        let ((a, a_events), (b, b_events)) = LoopbackTransport::pair("alice", "bob");
        let node = |transport: LoopbackTransport, events: TransportEvents, balance: u64| {
            let manager = FundLockManager::in_memory();
            manager.seed_balance(balance).unwrap();
            let handle = PeerTransferCoordinator::spawn(
                manager.clone(),
                Arc::new(transport.clone()),
                events,
                config.clone(),
            );
            Node {
                manager,
                handle,
                transport,
            }
        };
        (
            node(a, a_events, balances.0),
            node(b, b_events, balances.1),
        )
    }

    fn pair() -> (Node, Node) {
        pair_with((100, 0), CoordinatorConfig::default())
    }

    #[tokio::test]
    async fn transfer_moves_value_between_ledgers() {
        let (alice, bob) = pair();
        bob.handle.start_receiving().await.unwrap();

        let outcome = alice
            .handle
            .send_funds(40, Some(b"balance-proof".to_vec()))
            .await
            .unwrap();

        assert_eq!(outcome.status, TransactionStatus::Confirmed);
        assert_eq!(outcome.peer, "loopback-bob");
        assert_eq!(alice.manager.available().unwrap(), 60);
        assert_eq!(bob.manager.available().unwrap(), 40);

        let received = bob.manager.transaction(&outcome.tx_id).unwrap().unwrap();
        assert_eq!(received.direction, Direction::Incoming);
        assert_eq!(received.counterparty.as_deref(), Some("loopback-alice"));
        assert_eq!(received.proof.as_deref(), Some(&b"balance-proof"[..]));
        assert!(matches!(alice.handle.status(), P2pStatus::Success { .. }));
    }

    #[tokio::test]
    async fn insufficient_funds_never_reaches_the_transport() {
        let (alice, _bob) = pair();

        let err = alice.handle.send_funds(500, None).await.unwrap_err();

        assert!(matches!(
            err,
            CoordinatorError::Ledger(LedgerError::InsufficientFunds { .. })
        ));
        assert!(alice.manager.history().unwrap().is_empty());
        assert!(matches!(alice.handle.status(), P2pStatus::Error { .. }));
    }

    #[tokio::test]
    async fn second_operation_is_rejected_and_cancel_releases_funds() {
        let (alice, _bob) = pair();
        let mut status = alice.handle.watch_status();

        let sender = alice.handle.clone();
        let pending = tokio::spawn(async move { sender.send_funds(30, None).await });
        status
            .wait_for(|s| *s == P2pStatus::Scanning)
            .await
            .unwrap();
        assert_eq!(alice.manager.available().unwrap(), 70);

        assert_eq!(
            alice.handle.send_funds(10, None).await,
            Err(CoordinatorError::Busy)
        );
        assert_eq!(
            alice.handle.start_receiving().await,
            Err(CoordinatorError::Busy)
        );

        alice.handle.cancel().await.unwrap();
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, CoordinatorError::Cancelled { .. }));
        assert_eq!(alice.manager.available().unwrap(), 100);
        assert_eq!(alice.handle.status(), P2pStatus::Idle);
        assert_eq!(alice.handle.cancel().await, Err(CoordinatorError::NotActive));
    }

    fn short_timeout() -> CoordinatorConfig {
        CoordinatorConfig {
            settle_on_ack: true,
            transfer_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_transfer_times_out_into_pending_sync() {
        let (alice, bob) = pair_with((100, 0), short_timeout());
        alice.transport.set_drop_outgoing(true);
        bob.handle.start_receiving().await.unwrap();

        let err = alice.handle.send_funds(25, None).await.unwrap_err();

        let tx_id = match err {
            CoordinatorError::Unconfirmed { tx_id, reason } => {
                assert!(reason.contains("Timed out"), "{reason}");
                tx_id
            }
            other => panic!("unexpected error: {other}"),
        };
        let row = alice.manager.transaction(&tx_id).unwrap().unwrap();
        assert_eq!(row.status, TransactionStatus::PendingSync);
        assert_eq!(row.counterparty.as_deref(), Some("loopback-bob"));
        assert_eq!(alice.manager.available().unwrap(), 75);
        assert_eq!(bob.manager.available().unwrap(), 0);

        // The peer never saw it; reconciliation releases the funds.
        alice
            .manager
            .settle(&tx_id, TransactionStatus::Failed)
            .unwrap();
        assert_eq!(alice.manager.available().unwrap(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_ack_does_not_duplicate_value() {
        let (alice, bob) = pair_with((100, 0), short_timeout());
        bob.transport.set_drop_outgoing(true);
        bob.handle.start_receiving().await.unwrap();

        let tx_id = match alice.handle.send_funds(25, None).await {
            Err(CoordinatorError::Unconfirmed { tx_id, .. }) => tx_id,
            other => panic!("unexpected result: {other:?}"),
        };

        // Bob credited the transfer; Alice must not get it back as well.
        assert_eq!(bob.manager.available().unwrap(), 25);
        let snapshot = alice.manager.snapshot().unwrap();
        assert_eq!(snapshot.available, 75);
        assert_eq!(snapshot.reserved, 25);

        alice
            .manager
            .settle(&tx_id, TransactionStatus::Confirmed)
            .unwrap();
        assert_eq!(
            alice.manager.available().unwrap() + bob.manager.available().unwrap(),
            100
        );
        assert!(matches!(alice.handle.status(), P2pStatus::Error { .. }));
    }

    #[tokio::test]
    async fn cancel_after_delivery_keeps_reservation() {
        let (alice, bob) = pair();
        alice.transport.set_drop_outgoing(true);
        bob.handle.start_receiving().await.unwrap();
        let mut status = alice.handle.watch_status();

        let sender = alice.handle.clone();
        let pending = tokio::spawn(async move { sender.send_funds(30, None).await });
        status
            .wait_for(|s| matches!(s, P2pStatus::AwaitingAck { .. }))
            .await
            .unwrap();

        alice.handle.cancel().await.unwrap();

        assert!(matches!(
            pending.await.unwrap(),
            Err(CoordinatorError::Unconfirmed { .. })
        ));
        assert_eq!(alice.manager.available().unwrap(), 70);
        assert_eq!(
            alice
                .manager
                .transactions_with_status(TransactionStatus::PendingSync)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(alice.handle.status(), P2pStatus::Idle);
    }

    #[tokio::test]
    async fn idle_receiver_rejects_transfer() {
        let (alice, bob) = pair();
        bob.handle.start_receiving().await.unwrap();
        bob.handle.cancel().await.unwrap();

        let err = alice.handle.send_funds(10, None).await.unwrap_err();

        match err {
            CoordinatorError::TransferFailed { reason, .. } => {
                assert!(reason.contains("Not accepting transfers"), "{reason}")
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(alice.manager.available().unwrap(), 100);
        assert_eq!(bob.manager.available().unwrap(), 0);
    }

    #[tokio::test]
    async fn deferred_settlement_leaves_transfer_pending() {
        let (alice, bob) = pair_with(
            (100, 0),
            CoordinatorConfig {
                settle_on_ack: false,
                ..CoordinatorConfig::default()
            },
        );
        bob.handle.start_receiving().await.unwrap();

        let outcome = alice
            .handle
            .send_funds(15, Some(b"proof".to_vec()))
            .await
            .unwrap();

        assert_eq!(outcome.status, TransactionStatus::PendingSync);
        let tx = alice.manager.transaction(&outcome.tx_id).unwrap().unwrap();
        assert_eq!(tx.counterparty.as_deref(), Some("loopback-bob"));
        assert_eq!(tx.proof.as_deref(), Some(&b"proof"[..]));
        assert_eq!(alice.manager.available().unwrap(), 85);
    }

    #[tokio::test]
    async fn stopping_fails_the_outstanding_transfer() {
        let (alice, _bob) = pair();
        let mut status = alice.handle.watch_status();

        let sender = alice.handle.clone();
        let pending = tokio::spawn(async move { sender.send_funds(20, None).await });
        status
            .wait_for(|s| *s == P2pStatus::Scanning)
            .await
            .unwrap();

        alice.handle.stop().await.unwrap();

        assert!(matches!(
            pending.await.unwrap(),
            Err(CoordinatorError::TransferFailed { .. })
        ));
        assert_eq!(alice.manager.available().unwrap(), 100);
    }

    #[tokio::test]
    async fn events_trace_the_transfer() {
        let (alice, bob) = pair();
        let mut events = alice.handle.subscribe();
        bob.handle.start_receiving().await.unwrap();

        let outcome = alice.handle.send_funds(5, None).await.unwrap();

        let mut sent = false;
        let mut settled = false;
        while let Ok(event) = events.try_recv() {
            match event {
                CoordinatorEvent::TransferSent { tx_id, amount, .. } => {
                    assert_eq!(tx_id, outcome.tx_id);
                    assert_eq!(amount, 5);
                    sent = true;
                }
                CoordinatorEvent::TransferSettled { status, .. } => {
                    assert_eq!(status, TransactionStatus::Confirmed);
                    settled = true;
                }
                _ => {}
            }
        }
        assert!(sent && settled);
    }

    #[test]
    fn status_serializes_with_state_tag() {
        let json = serde_json::to_value(P2pStatus::Connecting {
            peer: "bob".into(),
        })
        .unwrap();
        assert_eq!(json["state"], "connecting");
        assert_eq!(P2pStatus::Scanning.message(), "Scanning for peers...");
    }
}
