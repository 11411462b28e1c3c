//! Cluster facade used by the rest of the application
//!
//! Combines the local node state, heartbeat liveness and the mailbox into
//! the handful of questions other subsystems ask: am I clustered, am I
//! active, who else is alive, and "send me your index".

use crate::cluster::heartbeat::HeartbeatService;
use crate::cluster::message::{ClusterMessage, Destination, Message};
use crate::cluster::node::{Node, NodeState};
use crate::cluster::state_manager::NodeStateManager;
use crate::cluster::store::{ClusterMessageStore, NodeTable};
use crate::common::{Error, Result};
use serde::Serialize;
use std::sync::Arc;

/// Channel asking a node to produce a current index snapshot
pub const CHANNEL_BACKUP_INDEX: &str = "Backup Index";

/// Decides whether a passive node's local copy of the shared search index
/// can be trusted without a full rebuild
pub trait IndexConsistencyCheck: Send + Sync {
    fn is_index_consistent(&self) -> Result<bool>;
}

/// Outcome of `ClusterManager::check_index`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexCheck {
    /// Not clustered, or not PASSIVE
    Skipped,
    Consistent,
    Inconsistent,
}

/// One row of the cluster status view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeInformation {
    pub node: Node,
    pub live: bool,
}

pub struct ClusterManager {
    state: Arc<NodeStateManager>,
    nodes: Arc<dyn NodeTable>,
    messages: Arc<dyn ClusterMessageStore>,
    heartbeat: Arc<dyn HeartbeatService>,
    index: Arc<dyn IndexConsistencyCheck>,
}

impl ClusterManager {
    pub fn new(
        state: Arc<NodeStateManager>,
        nodes: Arc<dyn NodeTable>,
        messages: Arc<dyn ClusterMessageStore>,
        heartbeat: Arc<dyn HeartbeatService>,
        index: Arc<dyn IndexConsistencyCheck>,
    ) -> Self {
        Self {
            state,
            nodes,
            messages,
            heartbeat,
            index,
        }
    }

    pub fn state_manager(&self) -> &Arc<NodeStateManager> {
        &self.state
    }

    pub fn is_clustered(&self) -> bool {
        self.state.properties().is_clustered()
    }

    pub fn node_id(&self) -> Option<&str> {
        self.state.properties().node_id()
    }

    /// The shared table records this node as ACTIVE. Always true outside a
    /// cluster, since `NOT_CLUSTERED` reports ACTIVE.
    pub fn is_active(&self) -> Result<bool> {
        Ok(self.state.persisted_node()?.state() == NodeState::Active)
    }

    /// Every node the table knows about
    pub fn all_nodes(&self) -> Result<Vec<Node>> {
        if !self.is_clustered() {
            return Ok(Vec::new());
        }
        self.nodes.list_nodes()
    }

    /// Nodes both registered in the table and reported live by the
    /// heartbeat service. Registered-but-silent and heartbeating-but-never-
    /// joined nodes are both excluded.
    pub fn find_live_nodes(&self) -> Result<Vec<Node>> {
        if !self.is_clustered() {
            return Ok(Vec::new());
        }
        let live_ids = self.heartbeat.live_node_ids()?;
        let live: Vec<Node> = self
            .nodes
            .list_nodes()?
            .into_iter()
            .filter(|n| n.node_id().is_some_and(|id| live_ids.contains(id)))
            .collect();
        self.state.metrics().live_nodes.set(live.len() as u64);
        Ok(live)
    }

    /// Live nodes other than this one
    pub fn other_live_nodes(&self) -> Result<Vec<Node>> {
        let me = self.node_id();
        Ok(self
            .find_live_nodes()?
            .into_iter()
            .filter(|n| n.node_id() != me)
            .collect())
    }

    /// Every known node with its liveness flag
    pub fn node_information(&self) -> Result<Vec<NodeInformation>> {
        if !self.is_clustered() {
            return Ok(Vec::new());
        }
        let live_ids = self.heartbeat.live_node_ids()?;
        Ok(self
            .nodes
            .list_nodes()?
            .into_iter()
            .map(|node| {
                let live = node.node_id().is_some_and(|id| live_ids.contains(id));
                NodeInformation { node, live }
            })
            .collect())
    }

    /// Only a PASSIVE node asks whether its index copy is still usable; an
    /// active node is authoritative.
    pub fn check_index(&self) -> Result<IndexCheck> {
        if !self.is_clustered() {
            return Ok(IndexCheck::Skipped);
        }
        let node = self.state.persisted_node()?;
        if node.state() != NodeState::Passive {
            return Ok(IndexCheck::Skipped);
        }
        let consistent = self.index.is_index_consistent()?;
        tracing::info!(consistent, "passive node index check");
        Ok(if consistent {
            IndexCheck::Consistent
        } else {
            IndexCheck::Inconsistent
        })
    }

    /// Ask `node_id` to produce a current index snapshot. Only sends the
    /// request; producing and shipping the snapshot happens elsewhere.
    pub fn request_current_index_from_node(&self, node_id: &str) -> Result<ClusterMessage> {
        let destination = Destination::node(node_id)?;
        self.send_message(&destination, &Message::new(CHANNEL_BACKUP_INDEX, None)?)
    }

    /// Send from this node
    pub fn send_message(
        &self,
        destination: &Destination,
        message: &Message,
    ) -> Result<ClusterMessage> {
        if !self.is_clustered() {
            return Err(Error::NotClustered);
        }
        let sent = self.messages.send(&self.state.node(), destination, message)?;
        self.state.metrics().messages_sent.inc();
        tracing::debug!(id = sent.id, %destination, %message, "cluster message sent");
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::heartbeat::HeartbeatTable;
    use crate::cluster::properties::ClusterNodeProperties;
    use crate::cluster::state_manager::Subsystems;
    use crate::cluster::store::MemoryClusterStore;
    use std::time::Duration;

    struct FixedIndex(bool);

    impl IndexConsistencyCheck for FixedIndex {
        fn is_index_consistent(&self) -> Result<bool> {
            Ok(self.0)
        }
    }

    fn manager(node_id: Option<&str>, consistent: bool) -> (ClusterManager, Arc<MemoryClusterStore>) {
        let store = Arc::new(MemoryClusterStore::new());
        let state = Arc::new(NodeStateManager::new(
            ClusterNodeProperties::new(node_id.map(str::to_string), "alpha", 40001),
            store.clone(),
            Subsystems::detached(),
        ));
        let manager = ClusterManager::new(
            state,
            store.clone(),
            store.clone(),
            Arc::new(HeartbeatTable::new(Duration::from_secs(30))),
            Arc::new(FixedIndex(consistent)),
        );
        (manager, store)
    }

    #[test]
    fn test_not_clustered_facade() {
        let (manager, _) = manager(None, true);
        assert!(!manager.is_clustered());
        assert_eq!(manager.node_id(), None);
        assert!(manager.is_active().unwrap());
        assert!(manager.find_live_nodes().unwrap().is_empty());
        assert_eq!(manager.check_index().unwrap(), IndexCheck::Skipped);
        assert!(matches!(
            manager.request_current_index_from_node("node2"),
            Err(Error::NotClustered)
        ));
    }

    #[test]
    fn test_check_index_only_when_passive() {
        let (manager, _) = manager(Some("node1"), false);
        manager.state_manager().register().unwrap();
        assert_eq!(manager.check_index().unwrap(), IndexCheck::Skipped);

        manager.state_manager().activate().unwrap();
        assert!(manager.is_active().unwrap());
        assert_eq!(manager.check_index().unwrap(), IndexCheck::Skipped);

        manager.state_manager().deactivate().unwrap();
        assert!(!manager.is_active().unwrap());
        assert_eq!(manager.check_index().unwrap(), IndexCheck::Inconsistent);
    }

    #[test]
    fn test_request_index_sends_specific_message() {
        let (manager, store) = manager(Some("node1"), true);
        let sent = manager.request_current_index_from_node("node2").unwrap();
        assert_eq!(sent.destination(), Destination::node("node2").unwrap());
        assert_eq!(sent.message, Message::new(CHANNEL_BACKUP_INDEX, None).unwrap());

        let node1 = Node::new("node1", NodeState::Active).unwrap();
        let node2 = Node::new("node2", NodeState::Active).unwrap();
        let node3 = Node::new("node3", NodeState::Active).unwrap();
        assert_eq!(store.get_messages(&node1, &node2, None).unwrap().len(), 1);
        assert!(store.get_messages(&node1, &node3, None).unwrap().is_empty());
        assert!(manager.request_current_index_from_node(" ").is_err());
    }

    #[test]
    fn test_request_index_refuses_destination_markers() {
        let (manager, store) = manager(Some("node1"), true);
        for marker in [crate::cluster::message::ALL_NODES, crate::cluster::message::ANY_NODE] {
            assert!(matches!(
                manager.request_current_index_from_node(marker),
                Err(Error::InvalidArgument(_))
            ));
        }
        assert_eq!(store.latest_message_id().unwrap(), None);
    }
}
