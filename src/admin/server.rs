//! Cluster node server
//!
//! Opens the shared store, registers this node, starts the heartbeat and
//! mailbox polling loops, then serves the admin API until Ctrl-C.
//!
//! With the default SQLite store every node process opens the same database
//! file and sees the others' rows and heartbeats. The RocksDB store is
//! locked by one process, so that process is the whole cluster.

use crate::admin::http::{create_router, AdminState};
use crate::cluster::heartbeat::{start_heartbeat_task, HeartbeatService, HeartbeatTable};
use crate::cluster::lifecycle::{DetachedSubsystems, LifecycleListener};
use crate::cluster::manager::{ClusterManager, IndexConsistencyCheck, CHANNEL_BACKUP_INDEX};
use crate::cluster::messaging::{
    start_message_polling, ClusterMessageConsumer, ClusterMessagingService,
};
use crate::cluster::properties::ClusterNodeProperties;
use crate::cluster::rocks::RocksClusterStore;
use crate::cluster::service::NodeStateService;
use crate::cluster::sqlite::SqliteClusterStore;
use crate::cluster::state_manager::{NodeStateManager, Subsystems};
use crate::cluster::store::{ClusterMessageStore, NodeTable};
use crate::common::audit::{AuditEventType, AuditLogger};
use crate::common::auth::KeyStore;
use crate::common::config::{ClusterConfig, StoreBackend};
use crate::common::metrics::ClusterMetrics;
use crate::common::{Config, Result};
use std::sync::Arc;

/// The three tables a node works against
struct ClusterTables {
    nodes: Arc<dyn NodeTable>,
    messages: Arc<dyn ClusterMessageStore>,
    heartbeat: Arc<dyn HeartbeatService>,
    /// Set for RocksDB, which is flushed on shutdown
    rocks: Option<Arc<RocksClusterStore>>,
}

impl ClusterTables {
    fn open(config: &ClusterConfig) -> Result<Self> {
        match config.store {
            StoreBackend::Sqlite => {
                std::fs::create_dir_all(&config.db_path)?;
                let store = Arc::new(
                    SqliteClusterStore::open(config.sqlite_file())?
                        .with_heartbeat_ttl(config.heartbeat_ttl())?,
                );
                Ok(Self {
                    nodes: store.clone(),
                    messages: store.clone(),
                    heartbeat: store,
                    rocks: None,
                })
            }
            StoreBackend::Rocksdb => {
                tracing::warn!("RocksDB store is locked by this process; no other node can join");
                let store = Arc::new(RocksClusterStore::open(&config.db_path)?);
                Ok(Self {
                    nodes: store.clone(),
                    messages: store.clone(),
                    heartbeat: Arc::new(HeartbeatTable::new(config.heartbeat_ttl())),
                    rocks: Some(store),
                })
            }
        }
    }
}

/// Logs and audits incoming "send me your index" requests. Producing the
/// snapshot is up to whatever owns the index.
struct BackupIndexRequests {
    audit: Arc<AuditLogger>,
}

impl ClusterMessageConsumer for BackupIndexRequests {
    fn receive(&self, channel: &str, _supplemental_information: Option<&str>, sender_id: &str) {
        tracing::info!(channel, sender_id, "index snapshot requested");
        self.audit.log_event(
            AuditEventType::IndexRequested,
            sender_id,
            None,
            "index snapshot requested by peer",
        );
    }
}

pub struct NodeServer {
    config: Config,
    subsystems: Subsystems,
    index: Arc<dyn IndexConsistencyCheck>,
    listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl NodeServer {
    /// Server with every dependent subsystem detached
    pub fn new(config: Config) -> Self {
        Self {
            config,
            subsystems: Subsystems::detached(),
            index: Arc::new(DetachedSubsystems),
            listeners: vec![Arc::new(DetachedSubsystems)],
        }
    }

    pub fn with_subsystems(mut self, subsystems: Subsystems) -> Self {
        self.subsystems = subsystems;
        self
    }

    pub fn with_index_check(mut self, index: Arc<dyn IndexConsistencyCheck>) -> Self {
        self.index = index;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub async fn serve(self) -> Result<()> {
        let cluster_config = &self.config.cluster;
        let properties = ClusterNodeProperties::from_config(&self.config);

        tracing::info!(
            "Starting cluster node: {}",
            properties.node_id().unwrap_or("(not clustered)")
        );
        tracing::info!("  Admin API: {}", self.config.admin.bind_addr);
        tracing::info!(
            "  Store: {:?} at {}",
            cluster_config.store,
            cluster_config.db_path.display()
        );
        tracing::info!(
            "  Cache listener: {}:{}",
            properties.hostname(),
            properties.cache_listener_port()
        );

        let tables = ClusterTables::open(cluster_config)?;
        let metrics = Arc::new(ClusterMetrics::new());
        let audit = Arc::new(AuditLogger::new(
            self.config.admin.audit_log.as_deref(),
            false,
        ));

        let mut state_manager =
            NodeStateManager::new(properties, tables.nodes.clone(), self.subsystems)
                .with_metrics(metrics.clone());
        for listener in self.listeners {
            state_manager = state_manager.with_listener(listener);
        }
        let state_manager = Arc::new(state_manager);
        let registered = state_manager.register()?;
        tracing::info!("  Registered as: {}", registered);

        let heartbeat = tables.heartbeat.clone();
        let cluster = Arc::new(ClusterManager::new(
            state_manager.clone(),
            tables.nodes.clone(),
            tables.messages.clone(),
            heartbeat.clone(),
            self.index,
        ));
        let node_service = Arc::new(NodeStateService::new(cluster.clone(), audit.clone()));

        let messaging = Arc::new(ClusterMessagingService::new(
            cluster.clone(),
            tables.messages.clone(),
        )?);
        messaging.register_listener(
            CHANNEL_BACKUP_INDEX,
            Arc::new(BackupIndexRequests {
                audit: audit.clone(),
            }),
        );

        let mut tasks = Vec::new();
        if let Some(node_id) = cluster.node_id() {
            tasks.push(start_heartbeat_task(
                heartbeat.clone(),
                node_id.to_string(),
                cluster_config.heartbeat_interval(),
            ));
            tasks.push(start_message_polling(
                messaging.clone(),
                cluster_config.poll_interval(),
            ));
        }

        let keys = Arc::new(KeyStore::new(&self.config.admin.api_keys));
        if keys.is_empty() {
            tracing::warn!("No admin API keys configured, admin API is open");
        }

        let router = create_router(
            AdminState {
                cluster: cluster.clone(),
                node_service,
                heartbeat: heartbeat.clone(),
                messages: tables.messages.clone(),
                metrics,
                audit: audit.clone(),
            },
            keys,
        );

        let listener = tokio::net::TcpListener::bind(self.config.admin.bind_addr).await?;
        audit.log_event(
            AuditEventType::System,
            "system",
            cluster.node_id().map(str::to_string),
            "node started",
        );
        tracing::info!("✓ Cluster node ready ({})", registered.state());

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        for task in tasks {
            task.abort();
        }
        if let Some(node_id) = cluster.node_id() {
            if let Err(e) = heartbeat.remove(node_id) {
                tracing::warn!("failed to clear heartbeat for {}: {}", node_id, e);
            }
        }
        if let Some(rocks) = &tables.rocks {
            rocks.flush()?;
        }
        if let Err(e) = &served {
            tracing::error!("HTTP server error: {}", e);
        }
        tracing::info!("Cluster node stopped");
        served.map_err(Into::into)
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
