//! Configuration types for TicketRaft

use crate::error::{Result, TicketRaftError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bounds for the delay before a client retries its preferred server.
pub const PREFERRED_RETRY_RANGE: (Duration, Duration) =
    (Duration::from_millis(1000), Duration::from_millis(2000));

/// Consensus timing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// Fixed part of the election timeout
    #[serde(with = "duration_millis")]
    pub election_timeout_base: Duration,

    /// Upper bound (exclusive) of the random part added to the base
    #[serde(with = "duration_millis")]
    pub election_timeout_jitter: Duration,

    /// Leader heartbeat period, never randomized
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_base: Duration::from_millis(400),
            election_timeout_jitter: Duration::from_millis(600),
            heartbeat_interval: Duration::from_millis(150),
        }
    }
}

/// Client failover timing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long a client waits for any response before failing over
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,

    /// How long an unresponsive preferred server is skipped
    #[serde(with = "duration_millis")]
    pub preferred_retry_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(500),
            preferred_retry_timeout: Duration::from_millis(1250),
        }
    }
}

/// Topology and workload of a demo cluster
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of servers
    pub servers: usize,

    /// Number of clients
    pub clients: usize,

    /// Initial value of every server's ticket counter
    pub initial_tickets: i64,

    /// Rounds of requests queued per client
    pub rounds_per_client: usize,

    /// Update requests per round, each followed by one unstable and one committed read
    pub updates_per_round: usize,

    /// Inject a failure marker into the last client's queue every n rounds
    pub failure_every: Option<usize>,

    /// Persist server state in RocksDB under this directory (in memory when unset)
    pub data_dir: Option<PathBuf>,

    /// Consensus configuration
    pub raft: RaftConfig,

    /// Client configuration
    pub client: ClientConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            servers: 5,
            clients: 5,
            initial_tickets: 100,
            rounds_per_client: 25,
            updates_per_round: 10,
            failure_every: None,
            data_dir: None,
            raft: RaftConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// Load a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| TicketRaftError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers == 0 {
            return Err(TicketRaftError::InvalidConfig(
                "at least one server is required".to_string(),
            ));
        }
        if self.failure_every == Some(0) {
            return Err(TicketRaftError::InvalidConfig(
                "failure_every must be positive".to_string(),
            ));
        }
        if self.raft.election_timeout_base.is_zero() || self.raft.heartbeat_interval.is_zero() {
            return Err(TicketRaftError::InvalidConfig(
                "raft timeouts must be non-zero".to_string(),
            ));
        }
        if self.client.request_timeout.is_zero() {
            return Err(TicketRaftError::InvalidConfig(
                "request_timeout must be non-zero".to_string(),
            ));
        }
        let (min, max) = PREFERRED_RETRY_RANGE;
        let retry = self.client.preferred_retry_timeout;
        if retry < min || retry > max {
            return Err(TicketRaftError::InvalidConfig(format!(
                "preferred_retry_timeout must be within {}..={} ms, got {} ms",
                min.as_millis(),
                max.as_millis(),
                retry.as_millis()
            )));
        }
        Ok(())
    }
}

// Serde helpers for Duration
mod duration_millis {
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
