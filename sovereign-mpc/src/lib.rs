//! Secure-computation submission pipeline.
//!
//! - [`protocol`]: JSON wire format of the local proof oracle.
//! - [`oracle`]: the oracle capability, its async client and [`MockEnclave`].
//! - [`network`]: live HTTP submission and the simulated network.
//! - [`pipeline`]: the single-flight state machine tying them together.
//! - [`flows`]: vote casting, health-vault unlock and identity proofs.
//!
//! The pipeline never touches the ledger.

pub mod error;
pub mod flows;
pub mod network;
pub mod oracle;
pub mod pipeline;
pub mod protocol;

pub use error::{FailureKind, FlowError, MpcError, NetworkError};
pub use flows::{IdentityProofFlow, VaultAccess, VaultAccessFlow, VoteFlow};
pub use network::{
    HttpSubmissionClient, HttpSubmissionConfig, SimulatedNetwork, Submission, SubmissionNetwork,
};
pub use oracle::{MockEnclave, OracleClient, OracleError, ProofOracle};
pub use pipeline::{
    ComputationOutcome, ComputationPipeline, ComputationState, PhaseTimings, PipelineConfig,
    PipelineEvent, PipelineMode, PipelineRun, PipelineStatus,
};
pub use protocol::{
    ActionType, GovernanceFields, HealthFields, IdentityFields, OracleRequest, OracleResponse,
};
