//! Connection registry and fan-out.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace, warn};

use crate::connection::{Connection, ConnectionId};
use crate::message::RealtimeMessage;

/// Default time allowed for a single connection send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections that accepted the message.
    pub delivered: usize,
    /// Connections that failed and were removed.
    pub dropped: usize,
}

/// Live client connections grouped by subscriber key.
///
/// Keys map to connections in registration order. A key whose last
/// connection is removed is dropped from the map immediately, so the
/// registry never holds an empty list.
pub struct ConnectionRegistry {
    connections: DashMap<String, Vec<Connection>>,
    send_timeout: Duration,
}

impl ConnectionRegistry {
    /// Create a registry with the given per-send timeout.
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            send_timeout,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Register a connection under `key`.
    pub fn accept(&self, connection: Connection, key: &str) {
        let connection_id = connection.id();
        let mut entry = self.connections.entry(key.to_string()).or_default();
        entry.push(connection);

        debug!(
            key,
            %connection_id,
            connections = entry.len(),
            "connection registered"
        );
    }

    /// Remove a connection from `key`.
    ///
    /// Removing an unknown connection or key is a no-op. Returns whether a
    /// connection was removed.
    pub fn remove(&self, connection_id: ConnectionId, key: &str) -> bool {
        let Entry::Occupied(mut entry) = self.connections.entry(key.to_string()) else {
            return false;
        };

        let list = entry.get_mut();
        let before = list.len();
        list.retain(|c| c.id() != connection_id);
        let removed = list.len() != before;

        if list.is_empty() {
            entry.remove();
        }

        if removed {
            debug!(key, %connection_id, "connection removed");
        }
        removed
    }

    /// Send `message` to every connection registered under `key`.
    ///
    /// Works on a snapshot taken at call time, in registration order. A
    /// connection whose send fails or times out is removed and the
    /// remaining connections still receive the message. Unknown keys are a
    /// silent no-op.
    pub async fn broadcast(&self, key: &str, message: RealtimeMessage) -> BroadcastReport {
        let snapshot = match self.connections.get(key) {
            Some(entry) => entry.value().clone(),
            None => return BroadcastReport::default(),
        };

        let mut report = BroadcastReport::default();
        for connection in snapshot {
            match connection.send(message.clone(), self.send_timeout).await {
                Ok(()) => report.delivered += 1,
                Err(reason) => {
                    warn!(
                        key,
                        connection_id = %connection.id(),
                        %reason,
                        "send failed, dropping connection"
                    );
                    self.remove(connection.id(), key);
                    report.dropped += 1;
                }
            }
        }

        trace!(
            key,
            event_type = message.event_type(),
            delivered = report.delivered,
            dropped = report.dropped,
            "broadcast complete"
        );
        report
    }

    /// Number of connections under `key`.
    pub fn connections_for(&self, key: &str) -> usize {
        self.connections.get(key).map_or(0, |entry| entry.len())
    }

    /// Whether `key` has at least one connection.
    pub fn contains_key(&self, key: &str) -> bool {
        self.connections.contains_key(key)
    }

    /// Number of subscriber keys with live connections.
    pub fn subscriber_count(&self) -> usize {
        self.connections.len()
    }

    /// Total number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.iter().map(|entry| entry.len()).sum()
    }

    /// Subscriber keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_TIMEOUT)
    }
}
