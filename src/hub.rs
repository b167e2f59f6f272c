//! In-process fan-out of new messages to live connections.
//!
//! Each connection owns a bounded outbound queue. Topics (`group_{id}`) map to
//! the set of connections bound to them; a connection may be bound to several.
//! Publishing never waits on a connection: a full or closed queue just misses
//! that delivery.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::db::MessageRow;

pub type ConnectionId = Uuid;

/// Default bound on each connection's undelivered backlog.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

pub fn topic(group_id: i64) -> String {
    format!("group_{group_id}")
}

struct Connection {
    tx: mpsc::Sender<MessageRow>,
    topics: HashSet<String>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Connection>,
    topics: HashMap<String, HashSet<ConnectionId>>,
}

#[derive(Clone)]
pub struct Hub {
    registry: Arc<RwLock<Registry>>,
    capacity: usize,
}

impl Hub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// `capacity` bounds each connection's undelivered backlog.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            capacity: capacity.max(1),
        }
    }

    /// Registers a new connection with no bindings.
    pub async fn connect(&self) -> (ConnectionId, mpsc::Receiver<MessageRow>) {
        let id = Uuid::now_v7();
        let (tx, rx) = mpsc::channel(self.capacity);

        self.registry.write().await.connections.insert(
            id,
            Connection {
                tx,
                topics: HashSet::new(),
            },
        );

        (id, rx)
    }

    /// Binds `connection` to the group's topic. Re-binding is a no-op.
    ///
    /// Returns whether a new binding was made.
    pub async fn subscribe(&self, connection: ConnectionId, group_id: i64) -> bool {
        let topic = topic(group_id);
        let mut registry = self.registry.write().await;

        let Some(conn) = registry.connections.get_mut(&connection) else {
            tracing::warn!(%connection, %topic, "subscribe from unknown connection");
            return false;
        };
        if !conn.topics.insert(topic.clone()) {
            return false;
        }

        registry.topics.entry(topic).or_default().insert(connection);
        true
    }

    /// Drops a single binding, leaving the connection's other topics alone.
    pub async fn leave(&self, connection: ConnectionId, group_id: i64) {
        let topic = topic(group_id);
        let mut registry = self.registry.write().await;

        if let Some(conn) = registry.connections.get_mut(&connection) {
            conn.topics.remove(&topic);
        }
        registry.remove_binding(&topic, connection);
    }

    /// Forgets the connection and every binding it had.
    pub async fn unsubscribe(&self, connection: ConnectionId) {
        let mut registry = self.registry.write().await;

        let Some(conn) = registry.connections.remove(&connection) else {
            return;
        };
        for topic in &conn.topics {
            registry.remove_binding(topic, connection);
        }
    }

    /// Queues `row` for every connection bound to the group's topic.
    ///
    /// Returns the number of connections it was queued for.
    pub async fn publish(&self, group_id: i64, row: &MessageRow) -> usize {
        let topic = topic(group_id);
        let registry = self.registry.read().await;

        let Some(subscribers) = registry.topics.get(&topic) else {
            return 0;
        };

        let mut delivered = 0;
        for id in subscribers {
            let Some(conn) = registry.connections.get(id) else {
                continue;
            };
            match conn.tx.try_send(row.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(connection = %id, %topic, message_id = row.id, "connection lagging, dropped message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(connection = %id, %topic, "connection gone before unsubscribe");
                }
            }
        }
        delivered
    }

    pub async fn subscriber_count(&self, group_id: i64) -> usize {
        self.registry
            .read()
            .await
            .topics
            .get(&topic(group_id))
            .map_or(0, HashSet::len)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    fn remove_binding(&mut self, topic: &str, connection: ConnectionId) {
        if let Some(subscribers) = self.topics.get_mut(topic) {
            subscribers.remove(&connection);
            if subscribers.is_empty() {
                self.topics.remove(topic);
            }
        }
    }
}
