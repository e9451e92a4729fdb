//! User-facing flows built on the pipeline.
//!
//! Each flow authenticates first (when it signs anything), builds an
//! action-typed oracle request and runs it through a shared
//! [`ComputationPipeline`]. Authentication failure aborts the flow before the
//! pipeline is touched.

use std::sync::Arc;

use sovereign_common::{proof_digest, Authenticator, Challenge};
use sovereign_ledger::{ActivityKind, ActivityLog};
use uuid::Uuid;

use crate::error::FlowError;
use crate::pipeline::{ComputationOutcome, ComputationPipeline};
use crate::protocol::{ActionType, GovernanceFields, HealthFields, IdentityFields, OracleRequest};

fn request_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

fn record_proof(activity: Option<&ActivityLog>, outcome: &ComputationOutcome) {
    let (Some(log), Some(proof)) = (activity, outcome.proof.as_deref()) else {
        return;
    };
    if !outcome.is_completed() {
        return;
    }
    if let Err(err) = log.record(ActivityKind::Proof, proof_digest(proof)) {
        tracing::warn!(request_id = %outcome.request_id, error = %err, "Failed to record proof activity");
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VOTING
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct VoteFlow {
    pipeline: Arc<ComputationPipeline>,
    authenticator: Arc<dyn Authenticator>,
    activity: Option<ActivityLog>,
}

impl VoteFlow {
    pub fn new(pipeline: Arc<ComputationPipeline>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            pipeline,
            authenticator,
            activity: None,
        }
    }

    pub fn with_activity_log(mut self, log: ActivityLog) -> Self {
        self.activity = Some(log);
        self
    }

    /// Cast a private vote on `proposal_id`.
    pub async fn cast_vote(
        &self,
        proposal_id: &str,
        choice: &str,
    ) -> Result<ComputationOutcome, FlowError> {
        let challenge = Challenge::new(
            "Confirm Vote",
            format!("Sign your vote on {proposal_id}"),
        );
        let capability = self.authenticator.authenticate(&challenge).await?;

        let ballot = format!("Vote_{choice}_for_{proposal_id}");
        let signature = capability.sign(ballot.as_bytes());
        let request = OracleRequest::new(
            request_id("vote"),
            ActionType::GenerateMpcVote,
            ballot.into_bytes(),
        )
        .with_governance(GovernanceFields {
            proposal_id: proposal_id.to_string(),
            vote_choice: choice.to_string(),
            identity_signature: signature,
        });

        tracing::info!(proposal_id, request_id = %request.request_id, "Casting vote");
        let outcome = self
            .pipeline
            .run(request, Some(proposal_id.to_string()))
            .await?;
        record_proof(self.activity.as_ref(), &outcome);
        Ok(outcome)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HEALTH VAULT
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of a vault unlock attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VaultAccess {
    pub scope: String,
    pub granted: bool,
    pub outcome: ComputationOutcome,
}

#[derive(Clone)]
pub struct VaultAccessFlow {
    pipeline: Arc<ComputationPipeline>,
    authenticator: Arc<dyn Authenticator>,
    activity: Option<ActivityLog>,
}

impl VaultAccessFlow {
    pub fn new(pipeline: Arc<ComputationPipeline>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            pipeline,
            authenticator,
            activity: None,
        }
    }

    pub fn with_activity_log(mut self, log: ActivityLog) -> Self {
        self.activity = Some(log);
        self
    }

    /// Prove the right to open the records under `scope`.
    pub async fn unlock(&self, scope: &str) -> Result<VaultAccess, FlowError> {
        let challenge = Challenge::new("Unlock Health Vault", format!("Access records: {scope}"));
        let capability = self.authenticator.authenticate(&challenge).await?;
        let access_signature = capability.sign(scope.as_bytes());

        let request = OracleRequest::new(
            request_id("vault"),
            ActionType::VerifyHealthAccess,
            scope.as_bytes().to_vec(),
        )
        .with_health(HealthFields {
            record_scope: scope.to_string(),
            access_signature,
        });

        let outcome = self.pipeline.run(request, Some(scope.to_string())).await?;
        record_proof(self.activity.as_ref(), &outcome);
        let granted = outcome.is_completed();
        tracing::info!(scope, granted, "Vault access decided");
        Ok(VaultAccess {
            scope: scope.to_string(),
            granted,
            outcome,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IDENTITY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct IdentityProofFlow {
    pipeline: Arc<ComputationPipeline>,
    activity: Option<ActivityLog>,
}

impl IdentityProofFlow {
    pub fn new(pipeline: Arc<ComputationPipeline>) -> Self {
        Self {
            pipeline,
            activity: None,
        }
    }

    pub fn with_activity_log(mut self, log: ActivityLog) -> Self {
        self.activity = Some(log);
        self
    }

    /// Prove possession of `attribute_id` without revealing the seed.
    pub async fn prove_attribute(
        &self,
        attribute_id: &str,
        encrypted_seed: Vec<u8>,
    ) -> Result<ComputationOutcome, FlowError> {
        let request = OracleRequest::new(
            request_id("identity"),
            ActionType::GenerateIdentityProof,
            attribute_id.as_bytes().to_vec(),
        )
        .with_identity(IdentityFields {
            attribute_id: attribute_id.to_string(),
            encrypted_identity_seed: encrypted_seed,
        });

        let outcome = self.pipeline.run(request, Some(attribute_id.to_string())).await?;
        record_proof(self.activity.as_ref(), &outcome);
        Ok(outcome)
    }
}
