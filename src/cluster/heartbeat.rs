//! Heartbeat-derived liveness
//!
//! The coordination layer only consumes liveness: `HeartbeatService` reports
//! which node ids are currently reachable and accepts beats. `HeartbeatTable`
//! is a TTL-based in-process implementation; `SqliteClusterStore` keeps the
//! same table in the shared database so every process sees every beat.

use crate::common::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Liveness oracle fed by heartbeats
pub trait HeartbeatService: Send + Sync {
    /// Record a heartbeat for `node_id` now
    fn beat(&self, node_id: &str) -> Result<()>;

    /// Forget a node (clean shutdown)
    fn remove(&self, node_id: &str) -> Result<()>;

    fn live_node_ids(&self) -> Result<HashSet<String>>;

    /// Drop entries that expired more than one TTL ago; returns how many
    fn prune(&self) -> Result<usize>;
}

/// Last-seen table with a liveness TTL, local to this process
#[derive(Debug)]
pub struct HeartbeatTable {
    ttl: Duration,
    last_seen: Mutex<HashMap<String, Instant>>,
}

impl HeartbeatTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn beat_at(&self, node_id: &str, at: Instant) -> Result<()> {
        self.lock()?.insert(node_id.to_string(), at);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Instant>>> {
        self.last_seen
            .lock()
            .map_err(|_| Error::Internal("heartbeat table lock poisoned".into()))
    }
}

impl HeartbeatService for HeartbeatTable {
    fn beat(&self, node_id: &str) -> Result<()> {
        self.beat_at(node_id, Instant::now())
    }

    fn remove(&self, node_id: &str) -> Result<()> {
        self.lock()?.remove(node_id);
        Ok(())
    }

    fn live_node_ids(&self) -> Result<HashSet<String>> {
        Ok(self
            .lock()?
            .iter()
            .filter(|(_, at)| at.elapsed() <= self.ttl)
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn prune(&self) -> Result<usize> {
        let mut seen = self.lock()?;
        let before = seen.len();
        let horizon = self.ttl * 2;
        seen.retain(|_, at| at.elapsed() <= horizon);
        Ok(before - seen.len())
    }
}

/// Beat for the local node every `interval` until the task is aborted. The
/// service may do blocking I/O, so each beat runs on the blocking pool.
pub fn start_heartbeat_task(
    service: Arc<dyn HeartbeatService>,
    node_id: String,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let service = service.clone();
            let node_id = node_id.clone();
            let beat = tokio::task::spawn_blocking(move || {
                service.beat(&node_id)?;
                service.prune()
            })
            .await;
            match beat {
                Ok(Ok(0)) => {}
                Ok(Ok(pruned)) => tracing::debug!("pruned {} stale heartbeat entries", pruned),
                Ok(Err(e)) => tracing::warn!("heartbeat failed: {}", e),
                Err(e) => tracing::warn!("heartbeat task panicked: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_expiry() {
        let table = HeartbeatTable::new(Duration::from_millis(40));
        table.beat("node2").unwrap();
        std::thread::sleep(Duration::from_millis(100));
        table.beat("node1").unwrap();

        let live = table.live_node_ids().unwrap();
        assert!(live.contains("node1"));
        assert!(!live.contains("node2"));

        assert_eq!(table.prune().unwrap(), 1);
        table.remove("node1").unwrap();
        assert!(table.live_node_ids().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_task_beats() {
        let table = Arc::new(HeartbeatTable::new(Duration::from_secs(5)));
        let handle =
            start_heartbeat_task(table.clone(), "node1".into(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();
        assert!(table.live_node_ids().unwrap().contains("node1"));
    }
}
