//! Node configuration
//!
//! Loaded from a JSON file; every field has a default so a file only needs
//! to name what differs.

use crate::network::PeerAddress;
use crate::replication::ReplicationConfig;
use crate::storage::Id160;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Durations as whole milliseconds
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's id
    pub node_id: Id160,

    /// Address the QUIC endpoint binds to
    pub listen_addr: SocketAddr,

    /// Timeout for one request/response exchange
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,

    /// Accept any server certificate (self-signed clusters)
    pub insecure_skip_verify: bool,

    /// Persist values here; memory only when unset
    pub storage_dir: Option<PathBuf>,

    /// Prometheus scrape endpoint
    pub metrics_addr: Option<SocketAddr>,

    /// Other cluster members
    pub peers: Vec<PeerAddress>,

    pub replication: ReplicationConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: Id160::ZERO,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 7700)),
            request_timeout: Duration::from_secs(10),
            insecure_skip_verify: true,
            storage_dir: None,
            metrics_addr: None,
            peers: Vec::new(),
            replication: ReplicationConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let replication = &self.replication;
        let factor = &replication.factor;

        if replication.block_size == 0 {
            return Err(ConfigError::Invalid("block_size must be positive".into()));
        }
        if replication.tick_interval.is_zero() {
            return Err(ConfigError::Invalid("tick_interval must be positive".into()));
        }
        if replication.max_concurrent_locations == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_locations must be positive".into(),
            ));
        }
        if replication.max_value_size == 0 {
            return Err(ConfigError::Invalid("max_value_size must be positive".into()));
        }
        if factor.min > factor.max {
            return Err(ConfigError::Invalid(format!(
                "replication factor min {} exceeds max {}",
                factor.min, factor.max
            )));
        }
        if !(factor.target_durability > 0.0 && factor.target_durability < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "target_durability {} must lie in (0, 1)",
                factor.target_durability
            )));
        }
        if !(0.0..=1.0).contains(&factor.initial_availability) {
            return Err(ConfigError::Invalid(format!(
                "initial_availability {} must lie in [0, 1]",
                factor.initial_availability
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid("request_timeout must be positive".into()));
        }
        if let Some(peer) = self.peers.iter().find(|p| p.id == self.node_id) {
            return Err(ConfigError::Invalid(format!(
                "peer list contains this node ({})",
                peer.addr
            )));
        }

        Ok(())
    }
}
