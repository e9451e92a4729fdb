//! Wiring of the on-disk node: one sled database shared by the ledger and
//! the activity log, a persisted signing key and the computation pipeline.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sovereign_common::SoftwareAuthenticator;
use sovereign_ledger::{ActivityLog, FundLockManager, SledLedger};
use sovereign_mpc::{
    ComputationPipeline, HttpSubmissionClient, HttpSubmissionConfig, MockEnclave, PipelineMode,
};

use crate::config::NodeConfig;

pub struct Node {
    pub config: NodeConfig,
    pub ledger: FundLockManager,
    pub activity: ActivityLog,
    db: sled::Db,
}

impl Node {
    pub fn open(config: NodeConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("Failed to create data dir {}", config.data_dir.display())
        })?;

        let ledger_path = config.ledger_path();
        let db = sled::open(&ledger_path)
            .with_context(|| format!("Failed to open ledger at {}", ledger_path.display()))?;
        let activity = ActivityLog::persistent(&db)?;
        let ledger = FundLockManager::new(SledLedger::from_db(db.clone())?)
            .with_activity_log(activity.clone());

        tracing::debug!(path = %ledger_path.display(), "Ledger opened");
        Ok(Self {
            config,
            ledger,
            activity,
            db,
        })
    }

    /// Signing identity, created on first use.
    pub fn authenticator(&self) -> Result<SoftwareAuthenticator> {
        let path = self.config.identity_key_path();
        if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let bytes = hex::decode(text.trim()).context("Identity key is not valid hex")?;
            let seed: [u8; 32] = bytes
                .try_into()
                .map_err(|_| anyhow::anyhow!("Identity key must be 32 bytes"))?;
            return Ok(SoftwareAuthenticator::from_seed(&seed));
        }

        let authenticator = SoftwareAuthenticator::generate();
        fs::write(&path, hex::encode(authenticator.seed()))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(
            public_key = %hex::encode(authenticator.public_key()),
            "Generated new identity key"
        );
        Ok(authenticator)
    }

    pub fn pipeline(&self) -> Result<Arc<ComputationPipeline>> {
        let pipeline_config = self.config.pipeline_config();
        let mut pipeline = ComputationPipeline::new(pipeline_config.clone(), Arc::new(MockEnclave));

        if pipeline_config.mode == PipelineMode::Live {
            let Some(endpoint) = self.config.network.live_endpoint.clone() else {
                bail!("network.live_endpoint must be set in live mode");
            };
            let client = HttpSubmissionClient::new(HttpSubmissionConfig {
                endpoint,
                connect_timeout: Duration::from_secs(3),
                request_timeout: pipeline_config.live_timeout,
            })?;
            pipeline = pipeline.with_live_network(Arc::new(client));
        }
        Ok(Arc::new(pipeline))
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush().context("Failed to flush ledger")?;
        Ok(())
    }
}
