//! Configuration for minicluster components

use crate::cluster::node::validate_node_id;
use crate::common::auth::Role;
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment prefix for overrides, e.g. `MINICLUSTER_NODE__NODE_ID=node1`
pub const ENV_PREFIX: &str = "MINICLUSTER";

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local node identity
    pub node: NodeConfig,

    /// Coordination tuning
    pub cluster: ClusterConfig,

    /// Admin API
    pub admin: AdminConfig,

    /// Logging level
    pub log_level: String,
}

/// Identity of this process inside the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node ID; absent or blank means the process is not clustered
    pub node_id: Option<String>,

    /// Hostname other nodes reach our cache listener on
    pub hostname: Option<String>,

    /// Cache listener port
    pub cache_listener_port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            hostname: None,
            cache_listener_port: default_cache_listener_port(),
        }
    }
}

fn default_cache_listener_port() -> u16 {
    40001
}

/// Backing store for the node, message and heartbeat tables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One SQLite file shared by every node process
    #[default]
    Sqlite,
    /// RocksDB directory locked by a single process; heartbeats stay in memory
    Rocksdb,
}

/// Coordination configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Which store holds the cluster tables
    pub store: StoreBackend,

    /// Directory holding the cluster database
    pub db_path: PathBuf,

    /// Bounded wait for the task manager during deactivation
    pub shutdown_timeout_ms: u64,

    /// Bounded wait for the directory-sync barrier during deactivation
    pub directory_sync_timeout_ms: u64,

    /// Heartbeat interval
    pub heartbeat_interval_ms: u64,

    /// A node whose last heartbeat is older than this is not live
    pub heartbeat_ttl_ms: u64,

    /// Mailbox polling interval
    pub poll_interval_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::Sqlite,
            db_path: PathBuf::from("./cluster-data"),
            shutdown_timeout_ms: 20_000,
            directory_sync_timeout_ms: 20_000,
            heartbeat_interval_ms: 5_000,
            heartbeat_ttl_ms: 30_000,
            poll_interval_ms: 1_000,
        }
    }
}

impl ClusterConfig {
    /// SQLite database file inside `db_path`
    pub fn sqlite_file(&self) -> PathBuf {
        self.db_path.join("cluster.sqlite3")
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn directory_sync_timeout(&self) -> Duration {
        Duration::from_millis(self.directory_sync_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ttl_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Admin API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Bind address for HTTP
    pub bind_addr: SocketAddr,

    /// Static API keys accepted by the admin API
    pub api_keys: Vec<ApiKeyConfig>,

    /// JSON-lines audit file; memory only when unset
    pub audit_log: Option<PathBuf>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7000)),
            api_keys: Vec::new(),
            audit_log: None,
        }
    }
}

/// One configured API key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub role: Role,
}

impl Config {
    /// Load from an optional TOML file, then apply `MINICLUSTER_*` overrides.
    ///
    /// Without an explicit path, `./minicluster.toml` is read when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name("minicluster").required(false)),
        };
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

        let loaded = builder
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let mut config: Config = loaded
            .try_deserialize()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if config.log_level.is_empty() {
            config.log_level = "info".to_string();
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the bounded waits or liveness meaningless
    pub fn validate(&self) -> Result<()> {
        if self.cluster.heartbeat_interval_ms == 0 || self.cluster.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "heartbeat and poll intervals must be non-zero".into(),
            ));
        }
        if self.cluster.heartbeat_ttl_ms < self.cluster.heartbeat_interval_ms {
            return Err(Error::InvalidConfig(format!(
                "heartbeat ttl ({}ms) shorter than heartbeat interval ({}ms)",
                self.cluster.heartbeat_ttl_ms, self.cluster.heartbeat_interval_ms
            )));
        }
        if let Some(node_id) = self.node.node_id.as_deref().map(str::trim) {
            if !node_id.is_empty() {
                validate_node_id(node_id).map_err(|e| Error::InvalidConfig(e.to_string()))?;
            }
        }
        if self.admin.api_keys.iter().any(|k| k.key.trim().is_empty()) {
            return Err(Error::InvalidConfig("api key cannot be blank".into()));
        }
        Ok(())
    }
}
