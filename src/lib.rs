//! # minicluster
//!
//! Cluster coordination for node processes sharing one SQLite database:
//! - Node registry with a persisted lifecycle state per node
//! - Activation/deactivation state machine driving dependent subsystems
//! - Database-backed mailbox with broadcast and claim-once delivery
//! - Heartbeat liveness kept in the shared database, and "send me your
//!   index" requests
//! - HTTP admin API and CLI
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            Admin API (axum)              │
//! │   status / activate / deactivate / index │
//! └───────────┬──────────────────────────────┘
//!             │
//! ┌───────────▼──────────┐   ┌──────────────────┐
//! │    ClusterManager    │──▶│ HeartbeatService │
//! │  NodeStateManager    │   └──────────────────┘
//! │  MessagingService    │
//! └───────────┬──────────┘
//!             │
//! ┌───────────▼──────────────────────────────┐
//! │  Shared store (SQLite): nodes, messages, │
//! │  heartbeats                              │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a node
//! ```bash
//! MINICLUSTER_NODE__NODE_ID=node1 minicluster-node serve --config ./minicluster.toml
//! ```
//!
//! ### Use the CLI
//! ```bash
//! minicluster --url http://localhost:7000 --api-key $KEY status
//! minicluster nodes
//! minicluster deactivate
//! minicluster request-index node2
//! ```

pub mod admin;
pub mod cluster;
pub mod common;

// Re-export commonly used types
pub use admin::NodeServer;
pub use cluster::{ClusterManager, Message, Node, NodeState, NodeStateManager};
pub use common::{Config, Error, Result};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
