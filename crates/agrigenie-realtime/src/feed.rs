//! Change feed contract and the in-process implementation.
//!
//! A change feed accepts a [`FeedFilter`] (table, event filter, optional
//! column equality) and pushes every matching row change into the returned
//! [`FeedSubscription`]. Cancelling goes through [`ChangeFeed::unsubscribe`]
//! with the subscription id.
//!
//! [`LocalChangeFeed`] keeps registrations in memory and is fed by
//! [`LocalChangeFeed::publish`], which the server exposes as a webhook for
//! whatever watches the database.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::{RealtimeError, Result};

/// Default per-registration event buffer.
pub const DEFAULT_FEED_BUFFER: usize = 256;

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeType::Insert => "INSERT",
            ChangeType::Update => "UPDATE",
            ChangeType::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A row-level change on one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Table the row belongs to.
    pub table: String,
    /// Insert, update or delete.
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// Row after the change. Absent for deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Value>,
    /// Row before the change, when the provider supplies it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_record: Option<Value>,
    /// When the change was committed.
    pub commit_timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Create a change event stamped with the current time.
    pub fn new(table: impl Into<String>, change_type: ChangeType) -> Self {
        Self {
            table: table.into(),
            change_type,
            record: None,
            old_record: None,
            commit_timestamp: Utc::now(),
        }
    }

    pub fn with_record(mut self, record: Value) -> Self {
        self.record = Some(record);
        self
    }

    pub fn with_old_record(mut self, old_record: Value) -> Self {
        self.old_record = Some(old_record);
        self
    }

    /// Look up a column, preferring the new row and falling back to the old
    /// one (deletes only carry the old row).
    pub fn column(&self, name: &str) -> Option<&Value> {
        self.record
            .as_ref()
            .and_then(|row| row.get(name))
            .or_else(|| self.old_record.as_ref().and_then(|row| row.get(name)))
    }
}

/// Which change types a registration receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventFilter {
    /// Every change type (`*`).
    #[default]
    All,
    /// A single change type.
    Only(ChangeType),
}

impl EventFilter {
    pub fn matches(&self, change_type: ChangeType) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(only) => *only == change_type,
        }
    }
}

/// Column equality filter (`column = value`).
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnFilter {
    pub column: String,
    pub value: Value,
}

impl ColumnFilter {
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.column(&self.column) == Some(&self.value)
    }
}

/// What a change feed registration listens to.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedFilter {
    /// Table to watch.
    pub table: String,
    /// Change types to receive.
    pub events: EventFilter,
    /// Optional row filter.
    pub column: Option<ColumnFilter>,
}

impl FeedFilter {
    /// Watch every change on a table.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            events: EventFilter::All,
            column: None,
        }
    }

    /// Restrict the change types received.
    pub fn with_events(mut self, events: EventFilter) -> Self {
        self.events = events;
        self
    }

    /// Only receive rows whose `column` equals `value`.
    pub fn with_column_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.column = Some(ColumnFilter {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    /// Check whether an event passes this filter.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.table == self.table
            && self.events.matches(event.change_type)
            && self.column.as_ref().map_or(true, |c| c.matches(event))
    }

    /// Stable name for this filter: the table, or `table:column=value`.
    pub fn name(&self) -> String {
        match &self.column {
            None => self.table.clone(),
            Some(ColumnFilter { column, value }) => match value {
                Value::String(s) => format!("{}:{}={}", self.table, column, s),
                other => format!("{}:{}={}", self.table, column, other),
            },
        }
    }
}

/// Identifier of a change feed registration.
pub type FeedId = u64;

/// An active change feed registration.
#[derive(Debug)]
pub struct FeedSubscription {
    /// Id to pass to [`ChangeFeed::unsubscribe`].
    pub id: FeedId,
    /// Matching change events, in commit order.
    pub events: mpsc::Receiver<ChangeEvent>,
}

/// A provider of row-level change notifications.
pub trait ChangeFeed: Send + Sync {
    /// Register for changes matching `filter`.
    fn subscribe(&self, filter: FeedFilter) -> Result<FeedSubscription>;

    /// Release a registration. The event receiver is closed afterwards.
    fn unsubscribe(&self, id: FeedId) -> Result<()>;
}

struct Registration {
    filter: FeedFilter,
    tx: mpsc::Sender<ChangeEvent>,
    dropped: u64,
}

/// In-process change feed.
pub struct LocalChangeFeed {
    registrations: RwLock<HashMap<FeedId, Registration>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl LocalChangeFeed {
    /// Create a feed with the default per-registration buffer.
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_FEED_BUFFER)
    }

    /// Create a feed with a custom per-registration buffer.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Deliver an event to every matching registration.
    ///
    /// Never waits: a registration whose buffer is full misses the event
    /// (counted and logged). Registrations whose receiver is gone are
    /// pruned. Returns the number of registrations that accepted the event.
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let mut registrations = self.registrations.write();
            for (&id, registration) in registrations.iter_mut() {
                if !registration.filter.matches(event) {
                    continue;
                }
                match registration.tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        registration.dropped += 1;
                        warn!(
                            feed_id = id,
                            table = %event.table,
                            dropped = registration.dropped,
                            "change feed buffer full, event dropped"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
                }
            }
            for id in &closed {
                registrations.remove(id);
            }
        }

        if !closed.is_empty() {
            debug!(count = closed.len(), "pruned closed feed registrations");
        }

        trace!(
            table = %event.table,
            change_type = %event.change_type,
            delivered,
            "published change event"
        );

        delivered
    }

    /// Number of live registrations.
    pub fn registration_count(&self) -> usize {
        self.registrations.read().len()
    }
}

impl Default for LocalChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed for LocalChangeFeed {
    fn subscribe(&self, filter: FeedFilter) -> Result<FeedSubscription> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(self.buffer);

        debug!(feed_id = id, filter = %filter.name(), "feed registration created");

        self.registrations.write().insert(
            id,
            Registration {
                filter,
                tx,
                dropped: 0,
            },
        );

        Ok(FeedSubscription { id, events: rx })
    }

    fn unsubscribe(&self, id: FeedId) -> Result<()> {
        match self.registrations.write().remove(&id) {
            Some(registration) => {
                debug!(
                    feed_id = id,
                    filter = %registration.filter.name(),
                    dropped = registration.dropped,
                    "feed registration removed"
                );
                Ok(())
            }
            None => Err(RealtimeError::Feed(format!(
                "feed registration {} not found",
                id
            ))),
        }
    }
}
