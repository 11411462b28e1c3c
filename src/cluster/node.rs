//! Cluster member identity and lifecycle phase

use crate::cluster::message::{ALL_NODES, ANY_NODE};
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle phase of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Offline,
    Activating,
    Active,
    Passivating,
    Passive,
}

impl NodeState {
    pub const ALL: [NodeState; 5] = [
        NodeState::Offline,
        NodeState::Activating,
        NodeState::Active,
        NodeState::Passivating,
        NodeState::Passive,
    ];

    /// Valid persisted transitions:
    /// `OFFLINE|PASSIVE -> ACTIVATING -> ACTIVE -> PASSIVATING -> PASSIVE`
    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, next),
            (Offline | Passive, Activating)
                | (Activating, Active)
                | (Active, Passivating)
                | (Passivating, Passive)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeState::Offline => "OFFLINE",
            NodeState::Activating => "ACTIVATING",
            NodeState::Active => "ACTIVE",
            NodeState::Passivating => "PASSIVATING",
            NodeState::Passive => "PASSIVE",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        NodeState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidArgument(format!("unknown node state: {}", s)))
    }
}

/// Snapshot of one cluster member.
///
/// Nodes are never mutated in place: every transition produces a new value
/// that replaces the persisted row wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    node_id: Option<String>,
    state: NodeState,
    /// Last write, Unix millis
    timestamp: Option<u64>,
    hostname: Option<String>,
    cache_listener_port: Option<u16>,
    clustered: bool,
}

impl Node {
    /// The process does not participate in a cluster. Reports `ACTIVE` so
    /// "is this node usable" checks need no special case.
    pub const NOT_CLUSTERED: Node = Node {
        node_id: None,
        state: NodeState::Active,
        timestamp: None,
        hostname: None,
        cache_listener_port: None,
        clustered: false,
    };

    /// Clustered node with just an id and a state
    pub fn new(node_id: impl Into<String>, state: NodeState) -> Result<Self> {
        let node_id = node_id.into();
        validate_node_id(&node_id)?;
        Ok(Self {
            node_id: Some(node_id),
            state,
            timestamp: None,
            hostname: None,
            cache_listener_port: None,
            clustered: true,
        })
    }

    /// Clustered node with its network identity
    pub fn with_details(
        node_id: impl Into<String>,
        state: NodeState,
        timestamp: Option<u64>,
        hostname: Option<String>,
        cache_listener_port: Option<u16>,
    ) -> Result<Self> {
        let mut node = Self::new(node_id, state)?;
        node.timestamp = timestamp;
        node.hostname = hostname;
        node.cache_listener_port = cache_listener_port;
        Ok(node)
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn cache_listener_port(&self) -> Option<u16> {
        self.cache_listener_port
    }

    pub fn is_clustered(&self) -> bool {
        self.clustered
    }

    /// Same member (by id), regardless of state
    pub fn same_member(&self, other: &Node) -> bool {
        self.clustered && other.clustered && self.node_id == other.node_id
    }
}

/// A node id must be non-blank and must not collide with a destination marker
pub fn validate_node_id(node_id: &str) -> Result<()> {
    if node_id.trim().is_empty() {
        return Err(Error::InvalidArgument("node id cannot be blank".into()));
    }
    if node_id == ALL_NODES || node_id == ANY_NODE {
        return Err(Error::InvalidArgument(format!(
            "{} is reserved and cannot be used as a node id",
            node_id
        )));
    }
    Ok(())
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            None => f.write_str("<not clustered>"),
            Some(id) => {
                write!(f, "{} [{}", id, self.state)?;
                if let Some(host) = &self.hostname {
                    write!(f, " {}", host)?;
                    if let Some(port) = self.cache_listener_port {
                        write!(f, ":{}", port)?;
                    }
                }
                f.write_str("]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_requires_id() {
        assert!(Node::new("", NodeState::Active).is_err());
        assert!(Node::new("   ", NodeState::Active).is_err());
        assert!(matches!(
            Node::new("", NodeState::Offline),
            Err(Error::InvalidArgument(_))
        ));
        let node = Node::new("node1", NodeState::Passive).unwrap();
        assert!(node.is_clustered());
        assert_eq!(node.node_id(), Some("node1"));
        assert_eq!(node.state(), NodeState::Passive);
    }

    #[test]
    fn test_destination_markers_are_not_node_ids() {
        for reserved in [ALL_NODES, ANY_NODE] {
            assert!(matches!(
                Node::new(reserved, NodeState::Active),
                Err(Error::InvalidArgument(_))
            ));
            assert!(Node::with_details(reserved, NodeState::Passive, None, None, None).is_err());
        }
        assert!(Node::new("any_node", NodeState::Active).is_ok());
    }

    #[test]
    fn test_not_clustered_sentinel() {
        let node = Node::NOT_CLUSTERED;
        assert!(!node.is_clustered());
        assert_eq!(node.node_id(), None);
        assert_eq!(node.state(), NodeState::Active);
        assert!(!node.same_member(&Node::NOT_CLUSTERED));
    }

    #[test]
    fn test_transitions() {
        use NodeState::*;
        assert!(Offline.can_transition_to(Activating));
        assert!(Passive.can_transition_to(Activating));
        assert!(Activating.can_transition_to(Active));
        assert!(Active.can_transition_to(Passivating));
        assert!(Passivating.can_transition_to(Passive));

        assert!(!Offline.can_transition_to(Active));
        assert!(!Active.can_transition_to(Passive));
        assert!(!Passive.can_transition_to(Passivating));
        assert!(!Active.can_transition_to(Activating));
    }

    #[test]
    fn test_state_parse_and_display() {
        for state in NodeState::ALL {
            assert_eq!(state.to_string().parse::<NodeState>().unwrap(), state);
        }
        assert_eq!("passive".parse::<NodeState>().unwrap(), NodeState::Passive);
        assert!("sleeping".parse::<NodeState>().is_err());
    }

    #[test]
    fn test_display() {
        let node = Node::with_details(
            "node1",
            NodeState::Active,
            None,
            Some("alpha".into()),
            Some(40001),
        )
        .unwrap();
        assert_eq!(node.to_string(), "node1 [ACTIVE alpha:40001]");
        assert_eq!(Node::NOT_CLUSTERED.to_string(), "<not clustered>");
    }
}
