//! Cluster coordination
//!
//! - `node`, `message`: immutable value types
//! - `store`: node table and claimable mailbox traits, in-memory tables
//! - `sqlite`: tables shared by every node process, heartbeats included
//! - `rocks`: tables for a single process (RocksDB holds an exclusive lock)
//! - `state_manager`: local activation/deactivation state machine
//! - `manager`: facade (liveness, index checks, sending)
//! - `messaging`: per-channel consumers fed by mailbox polling
//! - `service`: admin-gated lifecycle entry point

pub mod heartbeat;
pub mod lifecycle;
pub mod manager;
pub mod message;
pub mod messaging;
pub mod node;
pub mod properties;
pub mod rocks;
pub mod service;
pub mod sqlite;
pub mod state_manager;
pub mod store;

pub use heartbeat::{start_heartbeat_task, HeartbeatService, HeartbeatTable};
pub use lifecycle::{
    CacheControl, DetachedSubsystems, DirectorySyncBarrier, LifecycleEvent, LifecycleListener,
    MailQueueControl, SchedulerControl, TaskManagerControl,
};
pub use manager::{
    ClusterManager, IndexCheck, IndexConsistencyCheck, NodeInformation, CHANNEL_BACKUP_INDEX,
};
pub use message::{ClusterMessage, Destination, Message, ALL_NODES, ANY_NODE, DELIMITER};
pub use messaging::{start_message_polling, ClusterMessageConsumer, ClusterMessagingService};
pub use node::{validate_node_id, Node, NodeState};
pub use properties::ClusterNodeProperties;
pub use rocks::RocksClusterStore;
pub use service::{NodeStateService, ServiceOutcome};
pub use sqlite::SqliteClusterStore;
pub use state_manager::{NodeStateManager, Subsystems};
pub use store::{ClusterMessageStore, MemoryClusterStore, MessageRow, NodeRow, NodeTable};
