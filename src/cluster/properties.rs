//! What this process believes about its own cluster identity

use crate::common::config::Config;
use crate::common::utils::local_hostname;
use std::time::Duration;

/// Local node identity and lifecycle timeouts, resolved from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNodeProperties {
    node_id: Option<String>,
    hostname: String,
    cache_listener_port: u16,
    shutdown_timeout: Duration,
    directory_sync_timeout: Duration,
}

impl ClusterNodeProperties {
    /// Clustered identity; a blank id yields a non-clustered process
    pub fn new(node_id: Option<String>, hostname: impl Into<String>, cache_listener_port: u16) -> Self {
        Self {
            node_id: node_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            hostname: hostname.into(),
            cache_listener_port,
            shutdown_timeout: Duration::from_secs(20),
            directory_sync_timeout: Duration::from_secs(20),
        }
    }

    /// Process outside any cluster
    pub fn not_clustered() -> Self {
        Self::new(None, local_hostname(), 0)
    }

    pub fn from_config(config: &Config) -> Self {
        let hostname = config
            .node
            .hostname
            .clone()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(local_hostname);
        Self::new(
            config.node.node_id.clone(),
            hostname,
            config.node.cache_listener_port,
        )
        .with_timeouts(
            config.cluster.shutdown_timeout(),
            config.cluster.directory_sync_timeout(),
        )
    }

    pub fn with_timeouts(mut self, shutdown: Duration, directory_sync: Duration) -> Self {
        self.shutdown_timeout = shutdown;
        self.directory_sync_timeout = directory_sync;
        self
    }

    /// A non-blank node id is configured
    pub fn is_clustered(&self) -> bool {
        self.node_id.is_some()
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn cache_listener_port(&self) -> u16 {
        self.cache_listener_port
    }

    /// Bounded wait for the task manager during deactivation
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Bounded wait for the directory-sync barrier during deactivation
    pub fn directory_sync_timeout(&self) -> Duration {
        self.directory_sync_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_id_is_not_clustered() {
        assert!(!ClusterNodeProperties::new(Some("  ".into()), "h", 1).is_clustered());
        assert!(!ClusterNodeProperties::new(None, "h", 1).is_clustered());
        assert!(!ClusterNodeProperties::not_clustered().is_clustered());

        let props = ClusterNodeProperties::new(Some(" node1 ".into()), "h", 1);
        assert!(props.is_clustered());
        assert_eq!(props.node_id(), Some("node1"));
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.node.node_id = Some("node1".into());
        config.node.hostname = Some("alpha".into());
        config.node.cache_listener_port = 40011;
        config.cluster.shutdown_timeout_ms = 500;

        let props = ClusterNodeProperties::from_config(&config);
        assert_eq!(props.node_id(), Some("node1"));
        assert_eq!(props.hostname(), "alpha");
        assert_eq!(props.cache_listener_port(), 40011);
        assert_eq!(props.shutdown_timeout(), Duration::from_millis(500));
        assert_eq!(props.directory_sync_timeout(), Duration::from_secs(20));
    }
}
