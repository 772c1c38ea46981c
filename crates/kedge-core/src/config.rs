//! kedge.toml daemon configuration parser.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub state: StateConfig,
    pub controller: ControllerConfig,
    /// Credential material keyed by `authRef.name`. Handed to scaler
    /// constructors untouched.
    pub auth: HashMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub data_dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/kedge"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Upper bound for a single scaler call during a reconcile pass.
    pub scaler_timeout_ms: u64,
    /// Deadline for an on-demand metric query.
    pub query_timeout_ms: u64,
    /// Clamp paused replica counts into `[min, max]` instead of treating
    /// the annotation as an absolute override.
    pub clamp_paused_replicas: bool,
    /// How often stored targets are re-synced with running loops.
    pub sync_interval_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            scaler_timeout_ms: 3_000,
            query_timeout_ms: 3_000,
            clamp_paused_replicas: false,
            sync_interval_secs: 10,
        }
    }
}

impl ControllerConfig {
    pub fn scaler_timeout(&self) -> Duration {
        Duration::from_millis(self.scaler_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
