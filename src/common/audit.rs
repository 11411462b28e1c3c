//! Audit logging for administrative lifecycle actions
//!
//! Every activate/deactivate/index request coming through the admin service
//! is recorded as one JSON line, including the ones that were refused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Entries kept in memory for `recent()`
const RECENT_CAPACITY: usize = 256;

/// Audit log event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    NodeActivated,
    NodeDeactivated,
    LifecycleFailed,
    AccessDenied,
    IndexRequested,
    System,
}

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub event: AuditEventType,
    pub actor: String,
    pub target: Option<String>,
    pub message: String,
}

/// Audit logger
pub struct AuditLogger {
    file: Option<Mutex<File>>,
    to_stdout: bool,
    recent: Mutex<VecDeque<AuditEntry>>,
}

impl AuditLogger {
    /// Create a new audit logger appending to `path`
    pub fn new(path: Option<&Path>, to_stdout: bool) -> Self {
        let file = path.and_then(|p| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(p)
                .map_err(|e| tracing::warn!("audit log {} unavailable: {}", p.display(), e))
                .ok()
                .map(Mutex::new)
        });
        Self {
            file,
            to_stdout,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_CAPACITY)),
        }
    }

    /// Memory-only logger
    pub fn in_memory() -> Self {
        Self::new(None, false)
    }

    /// Log an audit entry
    pub fn log(&self, entry: AuditEntry) {
        let line = serde_json::to_string(&entry).unwrap_or_else(|_| "{}".to_string());
        if let Some(file) = &self.file {
            if let Ok(mut f) = file.lock() {
                let _ = writeln!(f, "{}", line);
            }
        }
        if self.to_stdout {
            println!("[AUDIT] {}", line);
        }
        if let Ok(mut recent) = self.recent.lock() {
            if recent.len() == RECENT_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(entry);
        }
    }

    /// Convenience for logging an event
    pub fn log_event(
        &self,
        event: AuditEventType,
        actor: impl Into<String>,
        target: Option<String>,
        message: impl Into<String>,
    ) {
        self.log(AuditEntry {
            timestamp: Utc::now(),
            event,
            actor: actor.into(),
            target,
            message: message.into(),
        });
    }

    /// Most recent entries, oldest first
    pub fn recent(&self) -> Vec<AuditEntry> {
        self.recent
            .lock()
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }
}
