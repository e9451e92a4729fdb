//! Secure-computation pipeline.
//!
//! Drives one request through local proof generation, submission to the
//! secure-computation network and the remote computation phases:
//!
//! ```text
//! ┌──────┐   ┌─────────────────┐   ┌────────────┐   ┌───────────┐   ┌──────────────────┐
//! │ Idle │──►│ GeneratingProof │──►│ Submitting │──►│ Computing │──►│ AwaitingCallback │
//! └──────┘   └─────────────────┘   └────────────┘   └───────────┘   └──────────────────┘
//!    ▲                │                  │ live timeout / 5xx                 │
//!    │                │ oracle failure   └──► simulated predicate             ▼
//!    │                ▼                                           ┌──────────────────────┐
//!    └─────────── Failed ◄────────────────────────────────────────│ Completed │ Failed   │
//!                                                                 └──────────────────────┘
//! ```
//!
//! A pipeline runs one request at a time; a second request while one is in
//! flight is rejected with [`MpcError::Busy`]. Every run ends back in `Idle`,
//! including runs that are cancelled or whose oracle or network panics.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep, timeout};

use crate::error::{FailureKind, MpcError, NetworkError};
use crate::network::{SimulatedNetwork, Submission, SubmissionNetwork};
use crate::oracle::{OracleClient, ProofOracle};
use crate::protocol::OracleRequest;

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputationState {
    Idle,
    GeneratingProof,
    Submitting,
    Computing,
    AwaitingCallback,
    Completed,
    Failed,
}

impl ComputationState {
    /// Progress message shown while in this state.
    pub fn message(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::GeneratingProof => "Generating Zero-Knowledge Proof (Local Enclave)...",
            Self::Submitting => "Broadcasting to Secure Computation Network...",
            Self::Computing => "Executing Secure MPC Computation...",
            Self::AwaitingCallback => "Decrypting Network Result...",
            Self::Completed => "Computation Verified",
            Self::Failed => "Computation Failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Current pipeline state with its human-readable detail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub state: ComputationState,
    pub detail: String,
    pub request_id: Option<String>,
}

impl PipelineStatus {
    fn idle() -> Self {
        Self {
            state: ComputationState::Idle,
            detail: ComputationState::Idle.message().to_string(),
            request_id: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineEvent {
    StateChanged(PipelineStatus),
    FallbackToSimulation { request_id: String, reason: String },
    Cancelled { request_id: String },
}

/// Result of a finished run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputationOutcome {
    pub request_id: String,
    /// `Completed` or `Failed`.
    pub state: ComputationState,
    pub proof: Option<Vec<u8>>,
    /// Failure reason; `None` when completed.
    pub reason: Option<String>,
    /// Whether the simulated path stood in for the live network.
    pub used_fallback: bool,
    pub failure: Option<FailureKind>,
}

impl ComputationOutcome {
    pub fn is_completed(&self) -> bool {
        self.state == ComputationState::Completed
    }

    fn completed(request_id: String, proof: Vec<u8>, used_fallback: bool) -> Self {
        Self {
            request_id,
            state: ComputationState::Completed,
            proof: Some(proof),
            reason: None,
            used_fallback,
            failure: None,
        }
    }

    fn failed(
        request_id: String,
        failure: FailureKind,
        reason: String,
        proof: Option<Vec<u8>>,
        used_fallback: bool,
    ) -> Self {
        Self {
            request_id,
            state: ComputationState::Failed,
            proof,
            reason: Some(reason),
            used_fallback,
            failure: Some(failure),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Never touch the network; use the simulated predicate.
    #[default]
    Simulation,
    /// Submit to the live network first.
    Live,
}

/// Durations of the paced phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseTimings {
    pub simulated_submit: Duration,
    pub fallback_notice: Duration,
    pub computing: Duration,
    pub callback: Duration,
    /// How long a terminal state stays visible before `Idle`.
    pub terminal_hold: Duration,
}

impl Default for PhaseTimings {
    fn default() -> Self {
        Self {
            simulated_submit: Duration::from_millis(1500),
            fallback_notice: Duration::from_millis(1000),
            computing: Duration::from_millis(2000),
            callback: Duration::from_millis(1000),
            terminal_hold: Duration::from_millis(2000),
        }
    }
}

impl PhaseTimings {
    /// No pacing at all.
    pub fn instant() -> Self {
        Self {
            simulated_submit: Duration::ZERO,
            fallback_notice: Duration::ZERO,
            computing: Duration::ZERO,
            callback: Duration::ZERO,
            terminal_hold: Duration::ZERO,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub mode: PipelineMode,
    /// In live mode, fall back to simulation when the network is unavailable.
    pub allow_simulation_fallback: bool,
    /// Bound on the live submit call.
    pub live_timeout: Duration,
    pub timings: PhaseTimings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::Simulation,
            allow_simulation_fallback: true,
            live_timeout: Duration::from_millis(3500),
            timings: PhaseTimings::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PIPELINE
// ═══════════════════════════════════════════════════════════════════════════════

enum Verdict {
    Accepted,
    Rejected(String),
    Unavailable(String),
    /// The live network faulted instead of answering.
    Fault(String),
}

pub struct ComputationPipeline {
    config: PipelineConfig,
    oracle: OracleClient,
    live: Option<Arc<dyn SubmissionNetwork>>,
    simulated: SimulatedNetwork,
    slot: Mutex<()>,
    status_tx: watch::Sender<PipelineStatus>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl ComputationPipeline {
    pub fn new(config: PipelineConfig, oracle: Arc<dyn ProofOracle>) -> Self {
        let (status_tx, _) = watch::channel(PipelineStatus::idle());
        let (event_tx, _) = broadcast::channel(64);
        Self {
            config,
            oracle: OracleClient::new(oracle),
            live: None,
            simulated: SimulatedNetwork,
            slot: Mutex::new(()),
            status_tx,
            event_tx,
        }
    }

    /// Network used in [`PipelineMode::Live`].
    pub fn with_live_network(mut self, network: Arc<dyn SubmissionNetwork>) -> Self {
        self.live = Some(network);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn status(&self) -> PipelineStatus {
        self.status_tx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<PipelineStatus> {
        self.status_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    /// Run `request` to a terminal state and back to `Idle`.
    ///
    /// Dropping the returned future abandons the run; the pipeline returns to
    /// `Idle` and accepts new requests.
    pub async fn run(
        &self,
        request: OracleRequest,
        subject: Option<String>,
    ) -> Result<ComputationOutcome, MpcError> {
        let _slot = self.slot.try_lock().map_err(|_| {
            tracing::warn!(request_id = %request.request_id, "Pipeline busy, request rejected");
            MpcError::Busy
        })?;
        let mut guard = RunGuard {
            pipeline: self,
            request_id: request.request_id.clone(),
            armed: true,
        };

        tracing::info!(
            request_id = %request.request_id,
            action = %request.action_type,
            mode = ?self.config.mode,
            "Computation started"
        );
        let outcome = self.execute(&request, subject).await;

        let detail = outcome
            .reason
            .clone()
            .unwrap_or_else(|| outcome.state.message().to_string());
        self.publish(outcome.state, detail, Some(&outcome.request_id));
        match &outcome.failure {
            None => tracing::info!(
                request_id = %outcome.request_id,
                used_fallback = outcome.used_fallback,
                "Computation completed"
            ),
            Some(kind) => tracing::warn!(
                request_id = %outcome.request_id,
                failure = ?kind,
                reason = outcome.reason.as_deref().unwrap_or_default(),
                "Computation failed"
            ),
        }

        sleep(self.config.timings.terminal_hold).await;
        self.publish_idle();
        guard.armed = false;
        Ok(outcome)
    }

    /// Run `request` on a background task.
    pub fn spawn(self: &Arc<Self>, request: OracleRequest, subject: Option<String>) -> PipelineRun {
        let pipeline = Arc::clone(self);
        let request_id = request.request_id.clone();
        let task = tokio::spawn(async move { pipeline.run(request, subject).await });
        PipelineRun { request_id, task }
    }

    async fn execute(&self, request: &OracleRequest, subject: Option<String>) -> ComputationOutcome {
        let request_id = request.request_id.clone();
        let timings = self.config.timings;

        self.enter(ComputationState::GeneratingProof, &request_id);
        let proof = match self.oracle.generate(request).await {
            Ok(proof) => proof,
            Err(err) => {
                return ComputationOutcome::failed(
                    request_id,
                    err.kind(),
                    format!("ZK Proof Generation Failed: {err}"),
                    None,
                    false,
                );
            }
        };
        tracing::debug!(request_id = %request_id, proof_len = proof.len(), "Proof generated");

        self.enter(ComputationState::Submitting, &request_id);
        let submission = Submission {
            proof,
            action: request.action_type,
            timestamp: chrono::Utc::now().timestamp_millis(),
            subject,
        };
        let (verdict, used_fallback) = self.submit(&request_id, &submission).await;
        let proof = submission.proof;

        let rejection = match verdict {
            Verdict::Accepted => None,
            Verdict::Rejected(reason) => Some(reason),
            Verdict::Unavailable(reason) => {
                return ComputationOutcome::failed(
                    request_id,
                    FailureKind::NetworkUnavailable,
                    format!("Network unavailable: {reason}"),
                    Some(proof),
                    false,
                );
            }
            Verdict::Fault(reason) => {
                return ComputationOutcome::failed(
                    request_id,
                    FailureKind::Internal,
                    format!("Submission fault: {reason}"),
                    Some(proof),
                    false,
                );
            }
        };

        self.enter(ComputationState::Computing, &request_id);
        sleep(timings.computing).await;
        self.enter(ComputationState::AwaitingCallback, &request_id);
        sleep(timings.callback).await;

        match rejection {
            None => ComputationOutcome::completed(request_id, proof, used_fallback),
            Some(reason) => ComputationOutcome::failed(
                request_id,
                FailureKind::NetworkRejected,
                format!("Network rejected proof: {reason}"),
                Some(proof),
                used_fallback,
            ),
        }
    }

    async fn submit(&self, request_id: &str, submission: &Submission) -> (Verdict, bool) {
        let timings = self.config.timings;
        if self.config.mode == PipelineMode::Simulation {
            sleep(timings.simulated_submit).await;
            return (self.simulate(submission), false);
        }

        let failure = match &self.live {
            None => NetworkError::Transport("no live network configured".into()),
            Some(network) => {
                let network = Arc::clone(network);
                let owned = submission.clone();
                let mut task = AbortOnDrop(tokio::spawn(async move { network.submit(&owned).await }));
                match timeout(self.config.live_timeout, &mut task.0).await {
                    Ok(Ok(Ok(()))) => return (Verdict::Accepted, false),
                    Ok(Ok(Err(err))) => err,
                    Ok(Err(join)) => {
                        let reason = describe_join_error(join);
                        tracing::error!(request_id, error = %reason, "Live submission faulted");
                        return (Verdict::Fault(reason), false);
                    }
                    Err(_) => NetworkError::Timeout,
                }
            }
        };

        if !failure.allows_fallback() {
            return (Verdict::Rejected(failure.to_string()), false);
        }
        if !self.config.allow_simulation_fallback {
            return (Verdict::Unavailable(failure.to_string()), false);
        }

        tracing::warn!(request_id, error = %failure, "Live network unavailable, falling back to simulation");
        let _ = self.event_tx.send(PipelineEvent::FallbackToSimulation {
            request_id: request_id.to_string(),
            reason: failure.to_string(),
        });
        self.publish(
            ComputationState::Submitting,
            "Network Busy: Falling back to Simulation".to_string(),
            Some(request_id),
        );
        sleep(timings.fallback_notice).await;
        sleep(timings.simulated_submit).await;
        (self.simulate(submission), true)
    }

    fn simulate(&self, submission: &Submission) -> Verdict {
        if self.simulated.accepts(submission) {
            Verdict::Accepted
        } else {
            Verdict::Rejected("invalid proof".into())
        }
    }

    fn enter(&self, state: ComputationState, request_id: &str) {
        self.publish(state, state.message().to_string(), Some(request_id));
    }

    fn publish(&self, state: ComputationState, detail: String, request_id: Option<&str>) {
        let status = PipelineStatus {
            state,
            detail,
            request_id: request_id.map(str::to_string),
        };
        tracing::debug!(state = ?status.state, detail = %status.detail, "Pipeline state");
        self.status_tx.send_replace(status.clone());
        let _ = self.event_tx.send(PipelineEvent::StateChanged(status));
    }

    fn publish_idle(&self) {
        self.publish(
            ComputationState::Idle,
            ComputationState::Idle.message().to_string(),
            None,
        );
    }
}

/// Aborts a live submission that is no longer awaited.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn describe_join_error(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into());
    format!("network panicked: {message}")
}

/// Returns the pipeline to `Idle` when a run is abandoned mid-flight.
struct RunGuard<'a> {
    pipeline: &'a ComputationPipeline,
    request_id: String,
    armed: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::info!(request_id = %self.request_id, "Computation cancelled");
        self.pipeline.publish_idle();
        let _ = self.pipeline.event_tx.send(PipelineEvent::Cancelled {
            request_id: self.request_id.clone(),
        });
    }
}

/// A run executing on a background task.
pub struct PipelineRun {
    request_id: String,
    task: JoinHandle<Result<ComputationOutcome, MpcError>>,
}

impl PipelineRun {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Abandon the run and wait until the pipeline is back in `Idle`.
    pub async fn cancel(self) {
        self.task.abort();
        let _ = self.task.await;
    }

    pub async fn outcome(self) -> Result<ComputationOutcome, MpcError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Err(MpcError::Cancelled),
            Err(err) => Err(MpcError::Internal(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::MockEnclave;
    use crate::protocol::{ActionType, GovernanceFields};
    use async_trait::async_trait;

    fn vote(proposal: &str) -> OracleRequest {
        OracleRequest::new(
            format!("vote_{proposal}"),
            ActionType::GenerateMpcVote,
            format!("Vote_YES_for_{proposal}").into_bytes(),
        )
        .with_governance(GovernanceFields {
            proposal_id: proposal.into(),
            vote_choice: "YES".into(),
            identity_signature: vec![7; 64],
        })
    }

    fn pipeline(config: PipelineConfig) -> ComputationPipeline {
        ComputationPipeline::new(config, Arc::new(MockEnclave))
    }

    fn live(network: impl SubmissionNetwork + 'static, fallback: bool) -> ComputationPipeline {
        pipeline(PipelineConfig {
            mode: PipelineMode::Live,
            allow_simulation_fallback: fallback,
            ..Default::default()
        })
        .with_live_network(Arc::new(network))
    }

    fn drain_states(rx: &mut broadcast::Receiver<PipelineEvent>) -> Vec<ComputationState> {
        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::StateChanged(status) = event {
                states.push(status.state);
            }
        }
        states
    }

    struct Hangs;
    #[async_trait]
    impl SubmissionNetwork for Hangs {
        async fn submit(&self, _s: &Submission) -> Result<(), NetworkError> {
            sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    struct Rejects;
    #[async_trait]
    impl SubmissionNetwork for Rejects {
        async fn submit(&self, _s: &Submission) -> Result<(), NetworkError> {
            Err(NetworkError::Rejected {
                status: 400,
                reason: "bad proof".into(),
            })
        }
    }

    struct Accepts;
    #[async_trait]
    impl SubmissionNetwork for Accepts {
        async fn submit(&self, _s: &Submission) -> Result<(), NetworkError> {
            Ok(())
        }
    }

    struct Explodes;
    #[async_trait]
    impl SubmissionNetwork for Explodes {
        async fn submit(&self, _s: &Submission) -> Result<(), NetworkError> {
            panic!("transport blew up")
        }
    }

    struct GarbageEnclave;
    impl ProofOracle for GarbageEnclave {
        fn process(&self, _request: &[u8]) -> Vec<u8> {
            b"\x00\xffnot a response".to_vec()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_vote_walks_every_phase() {
        let pipeline = pipeline(PipelineConfig::default());
        let mut events = pipeline.subscribe();

        let outcome = pipeline.run(vote("proposal_ubi_001"), Some("proposal_ubi_001".into())).await.unwrap();

        assert!(outcome.is_completed());
        assert!(!outcome.used_fallback);
        assert_eq!(
            drain_states(&mut events),
            vec![
                ComputationState::GeneratingProof,
                ComputationState::Submitting,
                ComputationState::Computing,
                ComputationState::AwaitingCallback,
                ComputationState::Completed,
                ComputationState::Idle,
            ]
        );
        assert_eq!(pipeline.status().state, ComputationState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn oracle_refusal_never_reaches_submitting() {
        let pipeline = pipeline(PipelineConfig::default());
        let mut events = pipeline.subscribe();

        let request = OracleRequest::new("empty", ActionType::VerifyHealthAccess, Vec::new());
        let outcome = pipeline.run(request, None).await.unwrap();

        assert_eq!(outcome.state, ComputationState::Failed);
        assert_eq!(outcome.failure, Some(FailureKind::Oracle));
        assert_eq!(
            outcome.reason.as_deref(),
            Some("ZK Proof Generation Failed: Empty payload")
        );
        let states = drain_states(&mut events);
        assert!(!states.contains(&ComputationState::Submitting));
        assert_eq!(states.last(), Some(&ComputationState::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn live_timeout_falls_back_to_simulation() {
        let pipeline = live(Hangs, true);
        let mut events = pipeline.subscribe();

        let outcome = pipeline.run(vote("p1"), Some("p1".into())).await.unwrap();

        assert!(outcome.is_completed());
        assert!(outcome.used_fallback);
        let mut saw_fallback = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, PipelineEvent::FallbackToSimulation { .. }) {
                saw_fallback = true;
            }
        }
        assert!(saw_fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_still_applies_the_predicate() {
        let pipeline = live(Hangs, true);
        // Proof names p1 but the vote claims to be about p2.
        let outcome = pipeline.run(vote("p1"), Some("p2".into())).await.unwrap();

        assert_eq!(outcome.failure, Some(FailureKind::NetworkRejected));
        assert!(outcome.used_fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn strict_live_mode_fails_on_timeout() {
        let pipeline = live(Hangs, false);
        let outcome = pipeline.run(vote("p1"), Some("p1".into())).await.unwrap();

        assert_eq!(outcome.failure, Some(FailureKind::NetworkUnavailable));
        assert!(!outcome.used_fallback);
        assert_eq!(pipeline.status().state, ComputationState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_rejection_skips_fallback() {
        let pipeline = live(Rejects, true);
        let outcome = pipeline.run(vote("p1"), Some("p1".into())).await.unwrap();

        assert_eq!(outcome.failure, Some(FailureKind::NetworkRejected));
        assert!(!outcome.used_fallback);
        assert!(outcome.reason.unwrap().contains("bad proof"));
    }

    #[tokio::test(start_paused = true)]
    async fn live_acceptance_completes() {
        let pipeline = live(Accepts, true);
        let outcome = pipeline.run(vote("p1"), Some("p1".into())).await.unwrap();
        assert!(outcome.is_completed());
        assert!(!outcome.used_fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_while_running_is_busy() {
        let pipeline = Arc::new(pipeline(PipelineConfig::default()));
        let mut status = pipeline.watch_status();

        let first = pipeline.spawn(vote("p1"), Some("p1".into()));
        status
            .wait_for(|s| s.state != ComputationState::Idle)
            .await
            .unwrap();

        assert_eq!(
            pipeline.run(vote("p1"), Some("p1".into())).await,
            Err(MpcError::Busy)
        );
        assert!(first.outcome().await.unwrap().is_completed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_returns_to_idle_and_frees_the_slot() {
        let pipeline = Arc::new(pipeline(PipelineConfig::default()));
        let mut status = pipeline.watch_status();
        let mut events = pipeline.subscribe();

        let run = pipeline.spawn(vote("p1"), Some("p1".into()));
        status
            .wait_for(|s| s.state == ComputationState::Computing)
            .await
            .unwrap();
        run.cancel().await;

        assert_eq!(pipeline.status().state, ComputationState::Idle);
        let mut cancelled = false;
        while let Ok(event) = events.try_recv() {
            if let PipelineEvent::Cancelled { request_id } = event {
                assert_eq!(request_id, "vote_p1");
                cancelled = true;
            }
        }
        assert!(cancelled);

        let again = pipeline.run(vote("p1"), Some("p1".into())).await.unwrap();
        assert!(again.is_completed());
    }

    #[tokio::test(start_paused = true)]
    async fn network_panic_ends_in_failed() {
        let pipeline = Arc::new(live(Explodes, true));
        let mut events = pipeline.subscribe();

        let outcome = pipeline
            .spawn(vote("p1"), Some("p1".into()))
            .outcome()
            .await
            .unwrap();

        assert_eq!(outcome.state, ComputationState::Failed);
        assert_eq!(outcome.failure, Some(FailureKind::Internal));
        assert!(!outcome.used_fallback);
        let reason = outcome.reason.unwrap();
        assert!(reason.starts_with("Submission fault"), "{reason}");
        assert!(reason.contains("transport blew up"), "{reason}");

        let states = drain_states(&mut events);
        assert!(!states.contains(&ComputationState::Computing));
        assert_eq!(
            &states[states.len() - 2..],
            &[ComputationState::Failed, ComputationState::Idle]
        );
        assert_eq!(pipeline.status().state, ComputationState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_oracle_bytes_fail_before_submitting() {
        let pipeline = ComputationPipeline::new(PipelineConfig::default(), Arc::new(GarbageEnclave));
        let mut events = pipeline.subscribe();

        for _ in 0..2 {
            let outcome = pipeline.run(vote("p1"), Some("p1".into())).await.unwrap();
            assert_eq!(outcome.state, ComputationState::Failed);
            assert_eq!(outcome.failure, Some(FailureKind::Oracle));
            assert!(outcome.proof.is_none());
            assert!(outcome
                .reason
                .unwrap()
                .starts_with("ZK Proof Generation Failed: Malformed"));
        }

        let states = drain_states(&mut events);
        assert!(!states.contains(&ComputationState::Submitting));
        assert_eq!(states.last(), Some(&ComputationState::Idle));
        assert_eq!(pipeline.status().state, ComputationState::Idle);
    }
}
