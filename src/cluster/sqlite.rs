//! SQLite-backed node table, mailbox and heartbeat table
//!
//! One database file shared by every node process on the host (or on a
//! filesystem with working POSIX locks). SQLite's file locking serializes
//! writers across processes. The ANY_NODE claim is a conditional
//! `UPDATE ... WHERE claimed_by_node IS NULL`; a row another reader claimed
//! first changes nothing and is not delivered.
//!
//! Tables:
//! - `cluster_nodes`: one row per node id
//! - `cluster_messages`: AUTOINCREMENT ids, so ids are never reused after a purge
//! - `cluster_heartbeats`: node id -> last beat (Unix millis)

use crate::cluster::heartbeat::HeartbeatService;
use crate::cluster::message::{ClusterMessage, Destination, Message, ALL_NODES, ANY_NODE};
use crate::cluster::node::Node;
use crate::cluster::store::{
    require_id, sort_for_delivery, ClusterMessageStore, MessageRow, NodeRow, NodeTable, Routing,
};
use crate::common::utils::{duration_millis, timestamp_now_millis};
use crate::common::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const CREATE_TABLES_SQL: &str = r"
CREATE TABLE IF NOT EXISTS cluster_nodes (
    node_id TEXT PRIMARY KEY NOT NULL,
    state TEXT NOT NULL,
    last_updated INTEGER NOT NULL,
    hostname TEXT,
    cache_listener_port INTEGER
);

CREATE TABLE IF NOT EXISTS cluster_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_node TEXT NOT NULL,
    destination_node TEXT NOT NULL,
    claimed_by_node TEXT,
    message TEXT NOT NULL,
    message_time INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cluster_messages_source ON cluster_messages(source_node, id);
CREATE INDEX IF NOT EXISTS idx_cluster_messages_time ON cluster_messages(message_time);

CREATE TABLE IF NOT EXISTS cluster_heartbeats (
    node_id TEXT PRIMARY KEY NOT NULL,
    last_seen INTEGER NOT NULL
);
";

const UPSERT_NODE_SQL: &str = r"
INSERT INTO cluster_nodes (node_id, state, last_updated, hostname, cache_listener_port)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(node_id) DO UPDATE SET
    state = excluded.state,
    last_updated = excluded.last_updated,
    hostname = excluded.hostname,
    cache_listener_port = excluded.cache_listener_port
";

const SELECT_NODE_SQL: &str = r"
SELECT node_id, state, last_updated, hostname, cache_listener_port
FROM cluster_nodes WHERE node_id = ?1
";

const SELECT_NODES_SQL: &str = r"
SELECT node_id, state, last_updated, hostname, cache_listener_port
FROM cluster_nodes ORDER BY node_id
";

const INSERT_MESSAGE_SQL: &str = r"
INSERT INTO cluster_messages (source_node, destination_node, claimed_by_node, message, message_time)
VALUES (?1, ?2, NULL, ?3, ?4)
";

const SELECT_MESSAGES_SQL: &str = r"
SELECT id, source_node, destination_node, claimed_by_node, message, message_time
FROM cluster_messages
WHERE source_node = ?1
  AND id > ?2
  AND (destination_node = ?3
       OR destination_node = ?4
       OR (destination_node = ?5 AND claimed_by_node IS NULL))
ORDER BY id
";

const CLAIM_MESSAGE_SQL: &str = r"
UPDATE cluster_messages SET claimed_by_node = ?1
WHERE id = ?2 AND claimed_by_node IS NULL
";

const LAST_MESSAGE_ID_SQL: &str = "SELECT seq FROM sqlite_sequence WHERE name = 'cluster_messages'";

const PURGE_MESSAGES_SQL: &str = "DELETE FROM cluster_messages WHERE message_time < ?1";

const UPSERT_HEARTBEAT_SQL: &str = r"
INSERT INTO cluster_heartbeats (node_id, last_seen) VALUES (?1, ?2)
ON CONFLICT(node_id) DO UPDATE SET last_seen = excluded.last_seen
";

const DEFAULT_HEARTBEAT_TTL: Duration = Duration::from_secs(30);

/// Node, message and heartbeat tables in one SQLite database
pub struct SqliteClusterStore {
    conn: Mutex<Connection>,
    heartbeat_ttl_ms: i64,
}

impl SqliteClusterStore {
    /// Open or create the database file. Every process opens its own
    /// connection to the same file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(
            journal_mode = %mode,
            path = %path.as_ref().display(),
            "opened cluster database"
        );
        conn.execute_batch(CREATE_TABLES_SQL)?;

        Ok(Self {
            conn: Mutex::new(conn),
            heartbeat_ttl_ms: to_sql_int(duration_millis(DEFAULT_HEARTBEAT_TTL)?)?,
        })
    }

    /// A node whose last beat is older than `ttl` is not live
    pub fn with_heartbeat_ttl(mut self, ttl: Duration) -> Result<Self> {
        self.heartbeat_ttl_ms = to_sql_int(duration_millis(ttl)?)?;
        Ok(self)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Persistence("cluster database lock poisoned".into()))
    }
}

fn to_sql_int(value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| Error::InvalidArgument(format!("{} does not fit an SQLite integer", value)))
}

fn from_sql_int(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::Corrupted(format!("negative integer {}", value)))
}

/// Columns of `cluster_nodes` as SQLite returns them
struct RawNode {
    node_id: String,
    state: String,
    last_updated: i64,
    hostname: Option<String>,
    cache_listener_port: Option<i64>,
}

impl RawNode {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            node_id: row.get(0)?,
            state: row.get(1)?,
            last_updated: row.get(2)?,
            hostname: row.get(3)?,
            cache_listener_port: row.get(4)?,
        })
    }

    fn into_node(self) -> Result<Node> {
        let state = self
            .state
            .parse()
            .map_err(|_| Error::Corrupted(format!("unknown node state {}", self.state)))?;
        let cache_listener_port = self
            .cache_listener_port
            .map(|port| {
                u16::try_from(port)
                    .map_err(|_| Error::Corrupted(format!("cache listener port {}", port)))
            })
            .transpose()?;
        NodeRow {
            node_id: self.node_id,
            state,
            last_updated: from_sql_int(self.last_updated)?,
            hostname: self.hostname,
            cache_listener_port,
        }
        .into_node()
    }
}

/// Columns of `cluster_messages` as SQLite returns them
struct RawMessage {
    id: i64,
    source_node: String,
    destination_node: String,
    claimed_by_node: Option<String>,
    message: String,
    message_time: i64,
}

impl RawMessage {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source_node: row.get(1)?,
            destination_node: row.get(2)?,
            claimed_by_node: row.get(3)?,
            message: row.get(4)?,
            message_time: row.get(5)?,
        })
    }

    fn into_row(self) -> Result<MessageRow> {
        Ok(MessageRow {
            id: from_sql_int(self.id)?,
            source_node: self.source_node,
            destination_node: self.destination_node,
            claimed_by_node: self.claimed_by_node,
            message: self.message,
            message_time: from_sql_int(self.message_time)?,
        })
    }
}

impl NodeTable for SqliteClusterStore {
    fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
        let conn = self.lock()?;
        let raw = conn
            .prepare_cached(SELECT_NODE_SQL)?
            .query_row(params![node_id], RawNode::read)
            .optional()?;
        raw.map(RawNode::into_node).transpose()
    }

    fn put_node(&self, node: &Node) -> Result<()> {
        let row = NodeRow::from_node(node)?;
        let conn = self.lock()?;
        conn.prepare_cached(UPSERT_NODE_SQL)?.execute(params![
            row.node_id,
            row.state.as_str(),
            to_sql_int(row.last_updated)?,
            row.hostname,
            row.cache_listener_port.map(i64::from),
        ])?;
        Ok(())
    }

    fn list_nodes(&self) -> Result<Vec<Node>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(SELECT_NODES_SQL)?;
        let raw = stmt
            .query_map([], RawNode::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(RawNode::into_node).collect()
    }
}

impl ClusterMessageStore for SqliteClusterStore {
    fn send(
        &self,
        source: &Node,
        destination: &Destination,
        message: &Message,
    ) -> Result<ClusterMessage> {
        let mut row = MessageRow::new(0, source, destination, message)?;
        let conn = self.lock()?;
        conn.prepare_cached(INSERT_MESSAGE_SQL)?.execute(params![
            row.source_node,
            row.destination_node,
            row.message,
            to_sql_int(row.message_time)?,
        ])?;
        row.id = from_sql_int(conn.last_insert_rowid())?;
        Ok(row.to_message())
    }

    fn get_messages(
        &self,
        source: &Node,
        destination: &Node,
        after_id: Option<u64>,
    ) -> Result<Vec<ClusterMessage>> {
        let source_id = require_id(source)?;
        let destination_id = require_id(destination)?;
        let after = to_sql_int(after_id.unwrap_or(0))?;

        let mut conn = self.lock()?;
        // IMMEDIATE takes the write lock up front so the scan and its claims
        // see one snapshot across processes.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let candidates = tx
            .prepare_cached(SELECT_MESSAGES_SQL)?
            .query_map(
                params![source_id, after, destination_id, ALL_NODES, ANY_NODE],
                RawMessage::read,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut found = Vec::new();
        {
            let mut claim = tx.prepare_cached(CLAIM_MESSAGE_SQL)?;
            for raw in candidates {
                let mut row = raw.into_row()?;
                match row.route(destination_id) {
                    Routing::Skip => {}
                    Routing::Deliver => found.push(row.to_message()),
                    Routing::Claimed => {
                        let claimed = claim.execute(params![destination_id, to_sql_int(row.id)?])?;
                        if claimed == 1 {
                            tracing::debug!(id = row.id, claimant = destination_id, "claimed");
                            found.push(row.to_message());
                        }
                    }
                }
            }
        }
        tx.commit()?;

        sort_for_delivery(&mut found);
        Ok(found)
    }

    fn latest_message_id(&self) -> Result<Option<u64>> {
        let conn = self.lock()?;
        let seq: Option<i64> = conn
            .query_row(LAST_MESSAGE_ID_SQL, [], |row| row.get(0))
            .optional()?;
        match seq {
            Some(seq) if seq > 0 => Ok(Some(from_sql_int(seq)?)),
            _ => Ok(None),
        }
    }

    fn purge_before(&self, timestamp: u64) -> Result<usize> {
        // Everything is older than a cutoff beyond the integer range.
        let cutoff = i64::try_from(timestamp).unwrap_or(i64::MAX);
        let conn = self.lock()?;
        let purged = conn.execute(PURGE_MESSAGES_SQL, params![cutoff])?;
        Ok(purged)
    }
}

impl HeartbeatService for SqliteClusterStore {
    fn beat(&self, node_id: &str) -> Result<()> {
        let now = to_sql_int(timestamp_now_millis())?;
        let conn = self.lock()?;
        conn.prepare_cached(UPSERT_HEARTBEAT_SQL)?
            .execute(params![node_id, now])?;
        Ok(())
    }

    fn remove(&self, node_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM cluster_heartbeats WHERE node_id = ?1",
            params![node_id],
        )?;
        Ok(())
    }

    fn live_node_ids(&self) -> Result<HashSet<String>> {
        let horizon = to_sql_int(timestamp_now_millis())?.saturating_sub(self.heartbeat_ttl_ms);
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare_cached("SELECT node_id FROM cluster_heartbeats WHERE last_seen >= ?1")?;
        let live = stmt
            .query_map(params![horizon], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(live)
    }

    fn prune(&self) -> Result<usize> {
        let horizon = to_sql_int(timestamp_now_millis())?
            .saturating_sub(self.heartbeat_ttl_ms.saturating_mul(2));
        let conn = self.lock()?;
        let pruned = conn.execute(
            "DELETE FROM cluster_heartbeats WHERE last_seen < ?1",
            params![horizon],
        )?;
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node::NodeState;
    use tempfile::tempdir;

    fn node(id: &str) -> Node {
        Node::new(id, NodeState::Active).unwrap()
    }

    #[test]
    fn test_node_table() {
        let dir = tempdir().unwrap();
        let store = SqliteClusterStore::open(dir.path().join("cluster.sqlite3")).unwrap();

        let n = Node::with_details(
            "node1",
            NodeState::Passive,
            Some(1234567890),
            Some("alpha".into()),
            Some(40001),
        )
        .unwrap();
        store.put_node(&n).unwrap();
        assert_eq!(store.get_node("node1").unwrap().unwrap(), n);
        assert!(store.get_node("node2").unwrap().is_none());

        let moved =
            Node::with_details("node1", NodeState::Activating, Some(5), None, None).unwrap();
        store.put_node(&moved).unwrap();
        let nodes = store.list_nodes().unwrap();
        assert_eq!(nodes, vec![moved]);
    }

    #[test]
    fn test_second_handle_sees_rows_and_claims() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cluster.sqlite3");
        let first = SqliteClusterStore::open(&path).unwrap();
        let second = SqliteClusterStore::open(&path).unwrap();

        first.put_node(&node("node1")).unwrap();
        assert_eq!(second.list_nodes().unwrap().len(), 1);

        first
            .send(
                &node("node1"),
                &Destination::AnyNode,
                &Message::new("work", Some("7".into())).unwrap(),
            )
            .unwrap();
        assert_eq!(second.latest_message_id().unwrap(), Some(1));

        let claimed = second.get_messages(&node("node1"), &node("node2"), None).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].claimed_by_node_id.as_deref(), Some("node2"));
        assert!(first
            .get_messages(&node("node1"), &node("node3"), None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_heartbeats_are_shared() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cluster.sqlite3");
        let first = SqliteClusterStore::open(&path).unwrap();
        let second = SqliteClusterStore::open(&path).unwrap();

        first.beat("node1").unwrap();
        second.beat("node2").unwrap();
        let live = first.live_node_ids().unwrap();
        assert!(live.contains("node1") && live.contains("node2"));

        second.remove("node1").unwrap();
        assert!(!first.live_node_ids().unwrap().contains("node1"));
    }

    #[test]
    fn test_heartbeat_ttl_expiry() {
        let dir = tempdir().unwrap();
        let store = SqliteClusterStore::open(dir.path().join("cluster.sqlite3"))
            .unwrap()
            .with_heartbeat_ttl(Duration::from_millis(40))
            .unwrap();
        store.beat("node2").unwrap();
        std::thread::sleep(Duration::from_millis(100));
        store.beat("node1").unwrap();

        let live = store.live_node_ids().unwrap();
        assert!(live.contains("node1"));
        assert!(!live.contains("node2"));
        assert_eq!(store.prune().unwrap(), 1);
    }

    #[test]
    fn test_message_sequence_survives_reopen_and_purge() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cluster.sqlite3");
        {
            let store = SqliteClusterStore::open(&path).unwrap();
            assert_eq!(store.latest_message_id().unwrap(), None);
            for channel in ["a", "b"] {
                let message = Message::new(channel, None).unwrap();
                store
                    .send(&node("node1"), &Destination::AllNodes, &message)
                    .unwrap();
            }
            assert_eq!(store.purge_before(u64::MAX).unwrap(), 2);
        }

        let store = SqliteClusterStore::open(&path).unwrap();
        assert_eq!(store.latest_message_id().unwrap(), Some(2));
        let next = store
            .send(&node("node1"), &Destination::AllNodes, &Message::new("c", None).unwrap())
            .unwrap();
        assert_eq!(next.id, 3);
    }
}
