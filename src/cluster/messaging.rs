//! Channel-based dispatch on top of the mailbox
//!
//! Consumers register for a channel. `poll()` reads, for every other live
//! node, the messages that node sent us since the last poll, and hands each
//! one to the consumers of its channel.

use crate::cluster::manager::ClusterManager;
use crate::cluster::message::{ClusterMessage, Destination, Message};
use crate::cluster::store::ClusterMessageStore;
use crate::common::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Receives messages for the channels it was registered on
pub trait ClusterMessageConsumer: Send + Sync {
    fn receive(&self, channel: &str, supplemental_information: Option<&str>, sender_id: &str);
}

pub struct ClusterMessagingService {
    cluster: Arc<ClusterManager>,
    store: Arc<dyn ClusterMessageStore>,
    consumers: RwLock<HashMap<String, Vec<Arc<dyn ClusterMessageConsumer>>>>,
    /// Highest id seen per sender
    cursors: Mutex<HashMap<String, u64>>,
    /// Where cursors for newly seen senders start
    watermark: Option<u64>,
}

impl ClusterMessagingService {
    /// Messages already in the store when the service starts are not replayed.
    pub fn new(cluster: Arc<ClusterManager>, store: Arc<dyn ClusterMessageStore>) -> Result<Self> {
        let watermark = store.latest_message_id()?;
        Ok(Self {
            cluster,
            store,
            consumers: RwLock::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
            watermark,
        })
    }

    pub fn register_listener(&self, channel: &str, consumer: Arc<dyn ClusterMessageConsumer>) {
        if let Ok(mut consumers) = self.consumers.write() {
            consumers
                .entry(channel.to_string())
                .or_default()
                .push(consumer);
        }
    }

    pub fn unregister_listener(&self, channel: &str, consumer: &Arc<dyn ClusterMessageConsumer>) {
        if let Ok(mut consumers) = self.consumers.write() {
            if let Some(list) = consumers.get_mut(channel) {
                list.retain(|c| !Arc::ptr_eq(c, consumer));
                if list.is_empty() {
                    consumers.remove(channel);
                }
            }
        }
    }

    /// Broadcast `supplemental` on `channel` to every other node
    pub fn send_remote(&self, channel: &str, supplemental: Option<String>) -> Result<ClusterMessage> {
        self.cluster
            .send_message(&Destination::AllNodes, &Message::new(channel, supplemental)?)
    }

    /// Offer `supplemental` on `channel` to exactly one other node
    pub fn send_to_any(&self, channel: &str, supplemental: Option<String>) -> Result<ClusterMessage> {
        self.cluster
            .send_message(&Destination::AnyNode, &Message::new(channel, supplemental)?)
    }

    /// One polling round; returns how many messages were dispatched
    pub fn poll(&self) -> Result<usize> {
        if !self.cluster.is_clustered() {
            return Ok(0);
        }
        let me = self.cluster.state_manager().node();
        let metrics = self.cluster.state_manager().metrics().clone();

        let mut dispatched = 0;
        for sender in self.cluster.other_live_nodes()? {
            let Some(sender_id) = sender.node_id() else {
                continue;
            };
            let after = self.cursor(sender_id)?;
            let messages = self.store.get_messages(&sender, &me, after)?;
            if messages.is_empty() {
                continue;
            }
            debug!(sender = sender_id, count = messages.len(), "received cluster messages");

            let mut highest = after.unwrap_or(0);
            for message in messages {
                highest = highest.max(message.id);
                if message.claimed_by_node_id.is_some() {
                    metrics.messages_claimed.inc();
                }
                self.dispatch(&message);
                metrics.messages_received.inc();
                dispatched += 1;
            }
            self.advance(sender_id, highest)?;
        }
        Ok(dispatched)
    }

    fn dispatch(&self, message: &ClusterMessage) {
        let channel = message.message.channel();
        let consumers = match self.consumers.read() {
            Ok(consumers) => consumers.get(channel).cloned().unwrap_or_default(),
            Err(_) => return,
        };
        if consumers.is_empty() {
            debug!(channel, id = message.id, "no consumer registered");
            return;
        }
        for consumer in consumers {
            consumer.receive(
                channel,
                message.message.supplemental_information(),
                &message.source_node_id,
            );
        }
    }

    fn cursor(&self, sender_id: &str) -> Result<Option<u64>> {
        let cursors = self
            .cursors
            .lock()
            .map_err(|_| Error::Internal("message cursor lock poisoned".into()))?;
        Ok(cursors.get(sender_id).copied().or(self.watermark))
    }

    fn advance(&self, sender_id: &str, id: u64) -> Result<()> {
        let mut cursors = self
            .cursors
            .lock()
            .map_err(|_| Error::Internal("message cursor lock poisoned".into()))?;
        let cursor = cursors.entry(sender_id.to_string()).or_insert(0);
        *cursor = (*cursor).max(id);
        Ok(())
    }
}

/// Poll every `interval` until the task is aborted. Blocking store work runs
/// on the blocking pool.
pub fn start_message_polling(
    service: Arc<ClusterMessagingService>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let service = service.clone();
            match tokio::task::spawn_blocking(move || service.poll()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("cluster message poll failed: {}", e),
                Err(e) => warn!("cluster message poll panicked: {}", e),
            }
        }
    })
}
