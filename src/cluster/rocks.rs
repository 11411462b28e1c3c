//! RocksDB-backed node table and mailbox
//!
//! RocksDB takes an exclusive lock on its directory, so this store serves a
//! single process: every node sharing it must live in that process. Use
//! `SqliteClusterStore` when nodes run as separate processes.
//!
//! Column families:
//! - `nodes`: node id -> `NodeRow`
//! - `messages`: big-endian message id -> `MessageRow` (iteration is id order)
//! - `meta`: the message id sequence

use crate::cluster::message::{ClusterMessage, Destination, Message};
use crate::cluster::node::Node;
use crate::cluster::store::{
    require_id, sort_for_delivery, ClusterMessageStore, MessageRow, NodeRow, NodeTable, Routing,
};
use crate::common::{Error, Result};
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const CF_NODES: &str = "nodes";
const CF_MESSAGES: &str = "messages";
const CF_META: &str = "meta";

const KEY_LAST_MESSAGE_ID: &[u8] = b"last_message_id";

/// Cluster tables in one RocksDB instance
pub struct RocksClusterStore {
    db: DB,
    /// Serializes id allocation and claim read-check-write
    write_lock: Mutex<()>,
}

impl RocksClusterStore {
    /// Open or create the store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, vec![CF_NODES, CF_MESSAGES, CF_META])?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Persistence(format!("missing column family {}", name)))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| Error::Persistence("message store lock poisoned".into()))
    }

    fn last_message_id(&self) -> Result<u64> {
        match self.db.get_cf(self.cf(CF_META)?, KEY_LAST_MESSAGE_ID)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    Error::Corrupted("message id sequence is not 8 bytes".into())
                })?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl NodeTable for RocksClusterStore {
    fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
        match self.db.get_cf(self.cf(CF_NODES)?, node_id.as_bytes())? {
            Some(bytes) => {
                let row: NodeRow = bincode::deserialize(&bytes)?;
                Ok(Some(row.into_node()?))
            }
            None => Ok(None),
        }
    }

    fn put_node(&self, node: &Node) -> Result<()> {
        let row = NodeRow::from_node(node)?;
        let value = bincode::serialize(&row)
            .map_err(|e| Error::Internal(format!("Serialize error: {}", e)))?;
        self.db
            .put_cf(self.cf(CF_NODES)?, row.node_id.as_bytes(), value)?;
        Ok(())
    }

    fn list_nodes(&self) -> Result<Vec<Node>> {
        let iter = self.db.iterator_cf(self.cf(CF_NODES)?, IteratorMode::Start);

        let mut nodes = Vec::new();
        for item in iter {
            let (_, value) = item?;
            let row: NodeRow = bincode::deserialize(&value)?;
            nodes.push(row.into_node()?);
        }
        Ok(nodes)
    }
}

impl ClusterMessageStore for RocksClusterStore {
    fn send(
        &self,
        source: &Node,
        destination: &Destination,
        message: &Message,
    ) -> Result<ClusterMessage> {
        let _guard = self.lock()?;
        let id = self.last_message_id()? + 1;
        let row = MessageRow::new(id, source, destination, message)?;
        let value = bincode::serialize(&row)
            .map_err(|e| Error::Internal(format!("Serialize error: {}", e)))?;

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_MESSAGES)?, id.to_be_bytes(), value);
        batch.put_cf(self.cf(CF_META)?, KEY_LAST_MESSAGE_ID, id.to_be_bytes());
        self.db.write(batch)?;

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
        let start = after_id.map_or(0, |id| id.saturating_add(1)).to_be_bytes();
        let cf = self.cf(CF_MESSAGES)?;

        // Held across the scan so a claim only lands on a row that is still unclaimed.
        let _guard = self.lock()?;
        let mut found = Vec::new();
        let mut claims = WriteBatch::default();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward))
        {
            let (key, value) = item?;
            let mut row: MessageRow = bincode::deserialize(&value)?;
            if row.source_node != source_id {
                continue;
            }
            match row.route(destination_id) {
                Routing::Skip => {}
                Routing::Deliver => found.push(row.to_message()),
                Routing::Claimed => {
                    let value = bincode::serialize(&row)
                        .map_err(|e| Error::Internal(format!("Serialize error: {}", e)))?;
                    claims.put_cf(cf, key, value);
                    found.push(row.to_message());
                }
            }
        }
        if !claims.is_empty() {
            self.db.write(claims)?;
        }

        sort_for_delivery(&mut found);
        Ok(found)
    }

    fn latest_message_id(&self) -> Result<Option<u64>> {
        let id = self.last_message_id()?;
        Ok((id > 0).then_some(id))
    }

    fn purge_before(&self, timestamp: u64) -> Result<usize> {
        let _guard = self.lock()?;
        let cf = self.cf(CF_MESSAGES)?;
        let mut batch = WriteBatch::default();
        let mut purged = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let row: MessageRow = bincode::deserialize(&value)?;
            if row.message_time < timestamp {
                batch.delete_cf(cf, key);
                purged += 1;
            }
        }
        self.db.write(batch)?;
        Ok(purged)
    }
}
