//! Client connection handles.
//!
//! A [`Connection`] is the outbound half of one client stream. The socket
//! writer task owns the matching receiver and drains it onto the wire, so
//! the registry never touches the socket directly.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::message::RealtimeMessage;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a send to a connection did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendFailure {
    /// The receiving side is gone (client disconnected).
    #[error("connection closed")]
    Closed,

    /// The outbound buffer stayed full for the whole send timeout.
    #[error("send timed out")]
    TimedOut,
}

/// Outbound handle for one client connection.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<RealtimeMessage>,
}

impl Connection {
    /// Create a connection with a bounded outbound buffer.
    ///
    /// Returns the connection and the receiver the writer task drains.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<RealtimeMessage>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                id: ConnectionId::next(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the receiving side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queue a message for this connection, waiting at most `timeout` for
    /// buffer space.
    pub async fn send(
        &self,
        message: RealtimeMessage,
        timeout: Duration,
    ) -> Result<(), SendFailure> {
        match tokio::time::timeout(timeout, self.tx.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendFailure::Closed),
            Err(_) => Err(SendFailure::TimedOut),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello() -> RealtimeMessage {
        RealtimeMessage::Message {
            message: "hello".to_string(),
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let (a, _rx_a) = Connection::channel(1);
        let (b, _rx_b) = Connection::channel(1);
        assert_ne!(a.id(), b.id());
        assert!(b.id().as_u64() > a.id().as_u64());
    }

    #[tokio::test]
    async fn test_send_delivers() {
        let (conn, mut rx) = Connection::channel(4);
        conn.send(hello(), Duration::from_millis(100)).await.unwrap();
        assert_eq!(rx.recv().await, Some(hello()));
    }

    #[tokio::test]
    async fn test_send_to_dropped_receiver_is_closed() {
        let (conn, rx) = Connection::channel(4);
        drop(rx);
        assert!(conn.is_closed());
        let result = conn.send(hello(), Duration::from_millis(100)).await;
        assert_eq!(result, Err(SendFailure::Closed));
    }

    #[tokio::test]
    async fn test_send_times_out_when_buffer_full() {
        let (conn, _rx) = Connection::channel(1);
        conn.send(hello(), Duration::from_millis(50)).await.unwrap();
        let result = conn.send(hello(), Duration::from_millis(20)).await;
        assert_eq!(result, Err(SendFailure::TimedOut));
    }
}
