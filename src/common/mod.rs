//! Common utilities and types shared across minicluster

pub mod audit;
pub mod auth;
pub mod auth_middleware;
pub mod config;
pub mod error;
pub mod metrics;
pub mod tracing_middleware;
pub mod utils;

pub use audit::{AuditEntry, AuditEventType, AuditLogger};
pub use auth::{AuthContext, AuthResult, KeyStore, Role};
pub use config::{AdminConfig, ApiKeyConfig, ClusterConfig, Config, NodeConfig, StoreBackend};
pub use error::{Error, Result};
pub use metrics::ClusterMetrics;
pub use utils::{
    duration_millis, format_timestamp_millis, local_hostname, parse_duration, timestamp_now_millis,
};
