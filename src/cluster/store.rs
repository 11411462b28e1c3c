//! Node table and message mailbox
//!
//! The traits here are the seam to the shared transactional store. Both
//! tables only ever see single-row upserts/inserts, except the ANY_NODE
//! claim, which is a conditional update performed inside the read.

use crate::cluster::message::{ClusterMessage, Destination, Message};
use crate::cluster::node::{Node, NodeState};
use crate::common::utils::timestamp_now_millis;
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Persisted cluster membership, one row per node id
pub trait NodeTable: Send + Sync {
    fn get_node(&self, node_id: &str) -> Result<Option<Node>>;

    /// Upsert keyed by node id; the previous row is replaced wholesale
    fn put_node(&self, node: &Node) -> Result<()>;

    fn list_nodes(&self) -> Result<Vec<Node>>;
}

/// Persisted mailbox shared by every node
pub trait ClusterMessageStore: Send + Sync {
    /// Append a row with a fresh id and no claim
    fn send(&self, source: &Node, destination: &Destination, message: &Message)
        -> Result<ClusterMessage>;

    /// Rows sent by `source` that `destination` should see: addressed to it,
    /// broadcast to ALL_NODES, or ANY_NODE and still unclaimed. Unclaimed
    /// ANY_NODE rows are claimed for `destination` as part of this call.
    /// Rows with `id <= after_id` are skipped. Ordered by `(timestamp, id)`.
    fn get_messages(
        &self,
        source: &Node,
        destination: &Node,
        after_id: Option<u64>,
    ) -> Result<Vec<ClusterMessage>>;

    /// Highest id handed out so far
    fn latest_message_id(&self) -> Result<Option<u64>>;

    /// Drop rows written before `timestamp` (Unix millis); returns how many
    fn purge_before(&self, timestamp: u64) -> Result<usize>;
}

/// Persisted node entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRow {
    pub node_id: String,
    pub state: NodeState,
    pub last_updated: u64,
    pub hostname: Option<String>,
    pub cache_listener_port: Option<u16>,
}

impl NodeRow {
    pub fn from_node(node: &Node) -> Result<Self> {
        let node_id = node
            .node_id()
            .ok_or_else(|| Error::InvalidArgument("cannot persist a non-clustered node".into()))?;
        Ok(Self {
            node_id: node_id.to_string(),
            state: node.state(),
            last_updated: node.timestamp().unwrap_or_else(timestamp_now_millis),
            hostname: node.hostname().map(str::to_string),
            cache_listener_port: node.cache_listener_port(),
        })
    }

    pub fn into_node(self) -> Result<Node> {
        Node::with_details(
            self.node_id,
            self.state,
            Some(self.last_updated),
            self.hostname,
            self.cache_listener_port,
        )
    }
}

/// Persisted message entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: u64,
    pub source_node: String,
    pub destination_node: String,
    pub claimed_by_node: Option<String>,
    pub message: String,
    pub message_time: u64,
}

impl MessageRow {
    pub fn new(id: u64, source: &Node, destination: &Destination, message: &Message) -> Result<Self> {
        Ok(Self {
            id,
            source_node: require_id(source)?.to_string(),
            destination_node: destination.as_str().to_string(),
            claimed_by_node: None,
            message: message.to_string(),
            message_time: timestamp_now_millis(),
        })
    }

    pub fn to_message(&self) -> ClusterMessage {
        ClusterMessage {
            id: self.id,
            source_node_id: self.source_node.clone(),
            destination: self.destination_node.clone(),
            claimed_by_node_id: self.claimed_by_node.clone(),
            message: self
                .message
                .parse::<Message>()
                .unwrap_or_else(|never| match never {}),
            timestamp: self.message_time,
        }
    }

    /// Decide whether this row goes to `destination_id`, claiming it if it
    /// is an unclaimed ANY_NODE row.
    pub(crate) fn route(&mut self, destination_id: &str) -> Routing {
        match Destination::parse(&self.destination_node) {
            Destination::Node(id) if id == destination_id => Routing::Deliver,
            Destination::Node(_) => Routing::Skip,
            Destination::AllNodes => Routing::Deliver,
            Destination::AnyNode => {
                if self.claimed_by_node.is_some() {
                    Routing::Skip
                } else {
                    self.claimed_by_node = Some(destination_id.to_string());
                    Routing::Claimed
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Routing {
    Deliver,
    Claimed,
    Skip,
}

pub(crate) fn require_id(node: &Node) -> Result<&str> {
    node.node_id()
        .ok_or_else(|| Error::InvalidArgument("node is not clustered".into()))
}

pub(crate) fn sort_for_delivery(messages: &mut [ClusterMessage]) {
    messages.sort_by_key(|m| (m.timestamp, m.id));
}

#[derive(Debug, Default)]
struct MemoryTables {
    nodes: BTreeMap<String, NodeRow>,
    messages: BTreeMap<u64, MessageRow>,
    last_id: u64,
}

/// In-process implementation of both tables
#[derive(Debug, Default)]
pub struct MemoryClusterStore {
    tables: Mutex<MemoryTables>,
}

impl MemoryClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryTables>> {
        self.tables
            .lock()
            .map_err(|_| Error::Persistence("cluster tables lock poisoned".into()))
    }
}

impl NodeTable for MemoryClusterStore {
    fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
        self.lock()?
            .nodes
            .get(node_id)
            .cloned()
            .map(NodeRow::into_node)
            .transpose()
    }

    fn put_node(&self, node: &Node) -> Result<()> {
        let row = NodeRow::from_node(node)?;
        self.lock()?.nodes.insert(row.node_id.clone(), row);
        Ok(())
    }

    fn list_nodes(&self) -> Result<Vec<Node>> {
        self.lock()?
            .nodes
            .values()
            .cloned()
            .map(NodeRow::into_node)
            .collect()
    }
}

impl ClusterMessageStore for MemoryClusterStore {
    fn send(
        &self,
        source: &Node,
        destination: &Destination,
        message: &Message,
    ) -> Result<ClusterMessage> {
        let mut tables = self.lock()?;
        let row = MessageRow::new(tables.last_id + 1, source, destination, message)?;
        tables.last_id = row.id;
        let sent = row.to_message();
        tables.messages.insert(row.id, row);
        Ok(sent)
    }

    fn get_messages(
        &self,
        source: &Node,
        destination: &Node,
        after_id: Option<u64>,
    ) -> Result<Vec<ClusterMessage>> {
        let source_id = require_id(source)?;
        let destination_id = require_id(destination)?;
        let start = after_id.map_or(0, |id| id.saturating_add(1));

        // The whole read, claims included, happens under one lock.
        let mut tables = self.lock()?;
        let mut found = Vec::new();
        for row in tables.messages.range_mut(start..).map(|(_, row)| row) {
            if row.source_node != source_id {
                continue;
            }
            match row.route(destination_id) {
                Routing::Skip => {}
                Routing::Deliver | Routing::Claimed => found.push(row.to_message()),
            }
        }
        sort_for_delivery(&mut found);
        Ok(found)
    }

    fn latest_message_id(&self) -> Result<Option<u64>> {
        let tables = self.lock()?;
        Ok((tables.last_id > 0).then_some(tables.last_id))
    }

    fn purge_before(&self, timestamp: u64) -> Result<usize> {
        let mut tables = self.lock()?;
        let before = tables.messages.len();
        tables.messages.retain(|_, row| row.message_time >= timestamp);
        Ok(before - tables.messages.len())
    }
}
