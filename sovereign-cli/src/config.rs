//! Node configuration.
//!
//! Layers, lowest precedence first: built-in defaults, `sovereign.toml` in
//! the working directory (or the file passed with `--config`), then
//! `SOVEREIGN__*` environment variables such as `SOVEREIGN__NETWORK__MODE=live`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, Map};
use serde::{Deserialize, Serialize};
use sovereign_mpc::{PhaseTimings, PipelineConfig, PipelineMode};
use sovereign_p2p::CoordinatorConfig;

const DEFAULT_CONFIG_FILE: &str = "sovereign";
const ENV_PREFIX: &str = "SOVEREIGN";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory holding the ledger database and the identity key.
    pub data_dir: PathBuf,
    pub network: NetworkSettings,
    pub pipeline: PipelineSettings,
    pub transfer: TransferSettings,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub mode: PipelineMode,
    /// Submission endpoint; required in live mode.
    pub live_endpoint: Option<String>,
    pub live_timeout_ms: u64,
    pub allow_simulation_fallback: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Skip the paced phase delays.
    pub instant: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    pub settle_on_ack: bool,
    pub timeout_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".sovereign"),
            network: NetworkSettings::default(),
            pipeline: PipelineSettings::default(),
            transfer: TransferSettings::default(),
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            mode: PipelineMode::Simulation,
            live_endpoint: None,
            live_timeout_ms: 3500,
            allow_simulation_fallback: true,
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            settle_on_ack: true,
            timeout_secs: 30,
        }
    }
}

impl NodeConfig {
    /// Load from the optional file and the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(file, None)
    }

    /// Load with an explicit environment map instead of the process
    /// environment.
    pub fn load_with_env(
        file: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let file_source = match file {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        Config::builder()
            .add_source(file_source)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }

    pub fn identity_key_path(&self) -> PathBuf {
        self.data_dir.join("identity.key")
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            mode: self.network.mode,
            allow_simulation_fallback: self.network.allow_simulation_fallback,
            live_timeout: Duration::from_millis(self.network.live_timeout_ms),
            timings: if self.pipeline.instant {
                PhaseTimings::instant()
            } else {
                PhaseTimings::default()
            },
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            settle_on_ack: self.transfer.settle_on_ack,
            transfer_timeout: Duration::from_secs(self.transfer.timeout_secs),
        }
    }
}
