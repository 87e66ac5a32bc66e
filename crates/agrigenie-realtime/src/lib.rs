//! AgriGenie realtime layer.
//!
//! This crate provides the process-local fan-out used by the AgriGenie
//! backend:
//! - a connection registry grouping live client connections by subscriber key
//! - a change feed contract plus an in-process implementation
//! - table subscriptions that route change events into the registry
//!
//! Everything here is single-node and non-durable. A restart drops every
//! connection and subscription; clients re-establish them.

pub mod connection;
pub mod error;
pub mod feed;
pub mod message;
pub mod registry;
pub mod subscriptions;

pub use connection::{Connection, ConnectionId, SendFailure};
pub use error::{RealtimeError, Result};
pub use feed::{
    ChangeEvent, ChangeFeed, ChangeType, ColumnFilter, EventFilter, FeedFilter, FeedId,
    FeedSubscription, LocalChangeFeed,
};
pub use message::{MessageKind, RealtimeMessage};
pub use registry::{BroadcastReport, ConnectionRegistry};
pub use subscriptions::{
    validate_table_name, SubscribeOutcome, SubscriptionStatus, TableSubscription,
    TableSubscriptions, TopicRoute, UnsubscribeOutcome,
};
