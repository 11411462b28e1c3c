//! Error types for minicluster

use crate::cluster::NodeState;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Fixed message for lifecycle requests on a process outside the cluster.
pub const NOT_CLUSTERED_MESSAGE: &str = "This node is not configured as a cluster member";

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Persistence Errors ===
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Row corrupted: {0}")]
    Corrupted(String),

    // === Lifecycle Errors ===
    #[error("{}", NOT_CLUSTERED_MESSAGE)]
    NotClustered,

    #[error("Invalid node state transition: {from} -> {to}")]
    InvalidTransition { from: NodeState, to: NodeState },

    #[error("Subsystem {name} failed: {reason}")]
    Subsystem { name: String, reason: String },

    // === Argument / Config Errors ===
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a dependent-subsystem failure.
    pub fn subsystem(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Subsystem {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Did this error come from the node or message table?
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            Error::RocksDb(_) | Error::Sqlite(_) | Error::Persistence(_) | Error::Corrupted(_)
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NotClustered | Error::InvalidTransition { .. } => StatusCode::CONFLICT,
            Error::InvalidArgument(_) | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::RocksDb(_) | Error::Sqlite(_) | Error::Persistence(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Corrupted(e.to_string())
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}
