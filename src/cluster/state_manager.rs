//! Local node activation/deactivation state machine
//!
//! Activation:
//! 1. persist ACTIVATING (with hostname/port)
//! 2. publish `NodeActivating`
//! 3. publish `ClearCache`, then flush caches
//! 4. start the scheduler, then the task manager
//! 5. persist ACTIVE
//! 6. publish `NodeActivated`
//!
//! Deactivation:
//! 1. publish `NodePassivating`
//! 2. scheduler standby
//! 3. task manager shutdown (bounded wait)
//! 4. directory-sync barrier (bounded wait)
//! 5. flush the mail queue
//! 6. persist PASSIVATING, then PASSIVE
//! 7. publish `NodePassivated`
//!
//! A failing step aborts the rest and leaves the node in whatever state was
//! last persisted; nothing is rolled back or retried. Expired bounded waits
//! are logged and the sequence continues.
//!
//! Calls are blocking and not reentrant; callers serialize them.

use crate::cluster::lifecycle::{
    CacheControl, DetachedSubsystems, DirectorySyncBarrier, LifecycleEvent, LifecycleListener,
    MailQueueControl, SchedulerControl, TaskManagerControl,
};
use crate::cluster::node::{Node, NodeState};
use crate::cluster::properties::ClusterNodeProperties;
use crate::cluster::store::NodeTable;
use crate::common::metrics::ClusterMetrics;
use crate::common::utils::timestamp_now_millis;
use crate::common::{Error, Result};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{error, info, warn};

/// Dependent subsystems started and stopped around a transition
#[derive(Clone)]
pub struct Subsystems {
    pub cache: Arc<dyn CacheControl>,
    pub scheduler: Arc<dyn SchedulerControl>,
    pub tasks: Arc<dyn TaskManagerControl>,
    pub mail: Arc<dyn MailQueueControl>,
    pub directory_sync: Arc<dyn DirectorySyncBarrier>,
}

impl Subsystems {
    /// Every hook backed by `DetachedSubsystems`
    pub fn detached() -> Self {
        let detached = Arc::new(DetachedSubsystems);
        Self {
            cache: detached.clone(),
            scheduler: detached.clone(),
            tasks: detached.clone(),
            mail: detached.clone(),
            directory_sync: detached,
        }
    }
}

pub struct NodeStateManager {
    properties: ClusterNodeProperties,
    nodes: Arc<dyn NodeTable>,
    subsystems: Subsystems,
    listeners: Vec<Arc<dyn LifecycleListener>>,
    metrics: Arc<ClusterMetrics>,
    /// Last node this process wrote or registered
    local: RwLock<Node>,
}

impl NodeStateManager {
    pub fn new(
        properties: ClusterNodeProperties,
        nodes: Arc<dyn NodeTable>,
        subsystems: Subsystems,
    ) -> Self {
        let local = match properties.node_id() {
            Some(id) => Node::with_details(
                id,
                NodeState::Offline,
                None,
                Some(properties.hostname().to_string()),
                Some(properties.cache_listener_port()),
            )
            .unwrap_or(Node::NOT_CLUSTERED),
            None => Node::NOT_CLUSTERED,
        };
        Self {
            properties,
            nodes,
            subsystems,
            listeners: Vec::new(),
            metrics: Arc::new(ClusterMetrics::new()),
            local: RwLock::new(local),
        }
    }

    /// Add a listener; listeners run in the order they were added
    pub fn with_listener(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ClusterMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn properties(&self) -> &ClusterNodeProperties {
        &self.properties
    }

    pub fn metrics(&self) -> &Arc<ClusterMetrics> {
        &self.metrics
    }

    /// The node as this process last wrote it; `NOT_CLUSTERED` outside a cluster
    pub fn node(&self) -> Node {
        match self.local.read() {
            Ok(node) => node.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// The node as the shared table currently records it
    pub fn persisted_node(&self) -> Result<Node> {
        let Some(node_id) = self.properties.node_id() else {
            return Ok(Node::NOT_CLUSTERED);
        };
        Ok(self
            .nodes
            .get_node(node_id)?
            .unwrap_or_else(|| self.node()))
    }

    /// Startup registration: make sure a row exists and carries our current
    /// hostname/port, without changing its state.
    pub fn register(&self) -> Result<Node> {
        let Some(node_id) = self.properties.node_id() else {
            info!("not clustered, skipping node registration");
            return Ok(Node::NOT_CLUSTERED);
        };

        match self.nodes.get_node(node_id)? {
            None => {
                info!(node_id, "registering new cluster node");
                self.persist(node_id, NodeState::Offline)
            }
            Some(existing) if self.identity_drifted(&existing) => {
                warn!(
                    node_id,
                    persisted = %existing,
                    hostname = self.properties.hostname(),
                    port = self.properties.cache_listener_port(),
                    "network identity changed since last run, updating node row"
                );
                self.persist(node_id, existing.state())
            }
            Some(existing) => {
                self.set_local(existing.clone());
                Ok(existing)
            }
        }
    }

    /// Does `candidate` disagree with what this process expects: the state it
    /// last wrote, or its configured hostname/port?
    pub fn state_has_changed(&self, candidate: &Node) -> bool {
        candidate.state() != self.node().state() || self.identity_drifted(candidate)
    }

    fn identity_drifted(&self, candidate: &Node) -> bool {
        candidate.hostname() != Some(self.properties.hostname())
            || candidate.cache_listener_port() != Some(self.properties.cache_listener_port())
    }

    /// Bring this node into service. No-op when the row already says ACTIVE.
    pub fn activate(&self) -> Result<Node> {
        let node_id = self.require_clustered()?;
        let current = self.persisted_state(node_id)?;
        match current {
            NodeState::Active => {
                info!(node_id, "node already active");
                return self.persisted_node();
            }
            NodeState::Activating => {
                warn!(node_id, "node was left ACTIVATING, re-running activation");
            }
            NodeState::Offline | NodeState::Passive => {}
            from => {
                return Err(Error::InvalidTransition {
                    from,
                    to: NodeState::Activating,
                })
            }
        }

        let started = Instant::now();
        let result = self.run_activation(node_id);
        self.metrics.record_lifecycle(started.elapsed(), result.is_ok());
        match &result {
            Ok(_) => {
                self.metrics.activations.inc();
                info!(node_id, elapsed = ?started.elapsed(), "node activated");
            }
            Err(e) => error!(
                node_id,
                state = %self.node().state(),
                error = %e,
                "activation aborted"
            ),
        }
        result
    }

    fn run_activation(&self, node_id: &str) -> Result<Node> {
        self.persist(node_id, NodeState::Activating)?;
        self.publish(LifecycleEvent::NodeActivating);

        // Another node may have changed shared state while we were passive.
        self.publish(LifecycleEvent::ClearCache);
        self.subsystems.cache.flush()?;

        self.subsystems.scheduler.start()?;
        self.subsystems.tasks.start()?;

        let node = self.persist(node_id, NodeState::Active)?;
        self.publish(LifecycleEvent::NodeActivated);
        Ok(node)
    }

    /// Take this node out of service. No-op when the row already says PASSIVE.
    pub fn deactivate(&self) -> Result<Node> {
        let node_id = self.require_clustered()?;
        let current = self.persisted_state(node_id)?;
        match current {
            NodeState::Passive => {
                info!(node_id, "node already passive");
                return self.persisted_node();
            }
            NodeState::Passivating => {
                warn!(node_id, "node was left PASSIVATING, re-running deactivation");
            }
            NodeState::Active => {}
            from => {
                return Err(Error::InvalidTransition {
                    from,
                    to: NodeState::Passivating,
                })
            }
        }

        let started = Instant::now();
        let result = self.run_deactivation(node_id);
        self.metrics.record_lifecycle(started.elapsed(), result.is_ok());
        match &result {
            Ok(_) => {
                self.metrics.deactivations.inc();
                info!(node_id, elapsed = ?started.elapsed(), "node passivated");
            }
            Err(e) => error!(
                node_id,
                state = %self.node().state(),
                error = %e,
                "deactivation aborted"
            ),
        }
        result
    }

    fn run_deactivation(&self, node_id: &str) -> Result<Node> {
        self.publish(LifecycleEvent::NodePassivating);

        self.subsystems.scheduler.standby()?;

        let timeout = self.properties.shutdown_timeout();
        if !self.subsystems.tasks.shutdown_and_wait(timeout)? {
            self.metrics.bounded_wait_timeouts.inc();
            warn!(node_id, ?timeout, "task manager still busy after timeout, continuing");
        }

        let timeout = self.properties.directory_sync_timeout();
        if !self.subsystems.directory_sync.await_barrier(timeout)? {
            self.metrics.bounded_wait_timeouts.inc();
            warn!(node_id, ?timeout, "directory sync barrier not reached, continuing");
        }

        self.subsystems.mail.flush()?;

        self.persist(node_id, NodeState::Passivating)?;
        let node = self.persist(node_id, NodeState::Passive)?;
        self.publish(LifecycleEvent::NodePassivated);
        Ok(node)
    }

    fn require_clustered(&self) -> Result<&str> {
        self.properties.node_id().ok_or(Error::NotClustered)
    }

    fn persisted_state(&self, node_id: &str) -> Result<NodeState> {
        Ok(self
            .nodes
            .get_node(node_id)?
            .map_or(NodeState::Offline, |n| n.state()))
    }

    fn persist(&self, node_id: &str, state: NodeState) -> Result<Node> {
        let node = Node::with_details(
            node_id,
            state,
            Some(timestamp_now_millis()),
            Some(self.properties.hostname().to_string()),
            Some(self.properties.cache_listener_port()),
        )?;
        self.nodes.put_node(&node)?;
        self.metrics.record_transition(state.as_str());
        info!(node_id, %state, "node state persisted");
        self.set_local(node.clone());
        Ok(node)
    }

    fn set_local(&self, node: Node) {
        match self.local.write() {
            Ok(mut local) => *local = node,
            Err(poisoned) => *poisoned.into_inner() = node,
        }
    }

    fn publish(&self, event: LifecycleEvent) {
        for listener in &self.listeners {
            listener.on_event(event);
        }
    }
}
