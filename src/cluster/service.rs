//! Administrative entry point for node lifecycle changes
//!
//! Checks the caller is a system administrator before touching any state,
//! and turns every outcome into a pass/fail result with a reason string.

use crate::cluster::manager::ClusterManager;
use crate::cluster::node::Node;
use crate::common::audit::{AuditEventType, AuditLogger};
use crate::common::auth::AuthContext;
use crate::common::Result;
use serde::Serialize;
use std::sync::{Arc, Mutex};

const FORBIDDEN_MESSAGE: &str = "You must be a system administrator to change the state of a cluster node";

/// Result handed back to administrative callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ServiceOutcome {
    Completed { node: Node },
    Forbidden { reason: String },
    Failed { reason: String },
}

impl ServiceOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ServiceOutcome::Completed { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ServiceOutcome::Completed { .. } => None,
            ServiceOutcome::Forbidden { reason } | ServiceOutcome::Failed { reason } => Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Activate,
    Deactivate,
}

pub struct NodeStateService {
    cluster: Arc<ClusterManager>,
    audit: Arc<AuditLogger>,
    /// One transition at a time per process
    running: Mutex<()>,
}

impl NodeStateService {
    pub fn new(cluster: Arc<ClusterManager>, audit: Arc<AuditLogger>) -> Self {
        Self {
            cluster,
            audit,
            running: Mutex::new(()),
        }
    }

    pub fn cluster(&self) -> &Arc<ClusterManager> {
        &self.cluster
    }

    pub fn activate(&self, caller: &AuthContext) -> ServiceOutcome {
        self.run(caller, Operation::Activate)
    }

    pub fn deactivate(&self, caller: &AuthContext) -> ServiceOutcome {
        self.run(caller, Operation::Deactivate)
    }

    fn run(&self, caller: &AuthContext, operation: Operation) -> ServiceOutcome {
        let target = self.cluster.node_id().map(str::to_string);
        if !caller.can_admin() {
            self.audit.log_event(
                AuditEventType::AccessDenied,
                &caller.principal,
                target,
                format!("{:?} refused", operation),
            );
            return ServiceOutcome::Forbidden {
                reason: FORBIDDEN_MESSAGE.to_string(),
            };
        }

        let _running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let manager = self.cluster.state_manager();
        let result: Result<Node> = match operation {
            Operation::Activate => manager.activate(),
            Operation::Deactivate => manager.deactivate(),
        };

        match result {
            Ok(node) => {
                let event = match operation {
                    Operation::Activate => AuditEventType::NodeActivated,
                    Operation::Deactivate => AuditEventType::NodeDeactivated,
                };
                self.audit.log_event(
                    event,
                    &caller.principal,
                    target,
                    format!("node now {}", node.state()),
                );
                ServiceOutcome::Completed { node }
            }
            Err(e) => {
                self.audit.log_event(
                    AuditEventType::LifecycleFailed,
                    &caller.principal,
                    target,
                    format!("{:?} failed: {}", operation, e),
                );
                ServiceOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
