//! Table subscriptions bridging a change feed into the connection registry.
//!
//! Each active subscription owns a change feed registration and a forwarding
//! task that wraps every event and broadcasts it under the route's topic.
//! At most one subscription exists per name; subscribing twice is a no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{RealtimeError, Result};
use crate::feed::{ChangeEvent, ChangeFeed, FeedFilter, FeedId};
use crate::message::MessageKind;
use crate::registry::ConnectionRegistry;

/// Longest table name accepted.
pub const MAX_TABLE_NAME_LEN: usize = 63;

/// Check that `table` is a plain identifier: ASCII alphanumerics and `_`.
pub fn validate_table_name(table: &str) -> Result<()> {
    if table.is_empty() {
        return Err(RealtimeError::InvalidTable("table name is empty".to_string()));
    }
    if table.len() > MAX_TABLE_NAME_LEN {
        return Err(RealtimeError::InvalidTable(format!(
            "'{}' exceeds {} characters",
            table, MAX_TABLE_NAME_LEN
        )));
    }
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(RealtimeError::InvalidTable(format!(
            "'{}' contains characters other than letters, digits and '_'",
            table
        )));
    }
    Ok(())
}

/// Where a subscription's events go.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicRoute {
    /// Feed registration filter.
    pub filter: FeedFilter,
    /// Subscriber key the events are broadcast under.
    pub topic: String,
    /// How events are wrapped.
    pub kind: MessageKind,
}

impl TopicRoute {
    /// Every change on `table`, broadcast under the table name.
    pub fn table(table: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            filter: FeedFilter::table(table.clone()),
            topic: table,
            kind: MessageKind::TableChange,
        }
    }

    /// `market_prices` rows for one crop, broadcast under the crop name.
    pub fn market_prices(crop_name: impl Into<String>) -> Self {
        let crop_name = crop_name.into();
        Self {
            filter: FeedFilter::table("market_prices")
                .with_column_eq("crop_name", crop_name.clone()),
            topic: crop_name,
            kind: MessageKind::MarketPriceUpdate,
        }
    }

    /// `weather_updates` rows for one location, broadcast under the location.
    pub fn weather(location: impl Into<String>) -> Self {
        let location = location.into();
        Self {
            filter: FeedFilter::table("weather_updates")
                .with_column_eq("location", location.clone()),
            topic: location,
            kind: MessageKind::WeatherUpdate,
        }
    }

    /// Subscription name: the table, or `table:column=value` when filtered.
    pub fn name(&self) -> String {
        self.filter.name()
    }
}

/// Handle for one active subscription.
pub struct TableSubscription {
    name: String,
    topic: String,
    feed_id: FeedId,
    task: JoinHandle<()>,
    created_at: Instant,
}

impl TableSubscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Stop forwarding and release the feed registration.
    pub fn cancel(self, feed: &dyn ChangeFeed) -> Result<()> {
        self.task.abort();
        feed.unsubscribe(self.feed_id)
    }
}

/// Result of a subscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Subscribed,
    AlreadySubscribed,
}

/// Result of an unsubscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    Unsubscribed,
    NotSubscribed,
}

/// Snapshot of active subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionStatus {
    pub active_subscriptions: Vec<String>,
    pub count: usize,
}

/// Active table subscriptions, keyed by subscription name.
pub struct TableSubscriptions {
    feed: Arc<dyn ChangeFeed>,
    registry: Arc<ConnectionRegistry>,
    active: Mutex<HashMap<String, TableSubscription>>,
}

impl TableSubscriptions {
    pub fn new(feed: Arc<dyn ChangeFeed>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            feed,
            registry,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to every change on `table`, fanned out under the table name.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe_table(&self, table: &str) -> Result<SubscribeOutcome> {
        self.subscribe_topic(TopicRoute::table(table))
    }

    /// Subscribe with an explicit route.
    ///
    /// Idempotent per route name. Must be called from within a tokio runtime.
    pub fn subscribe_topic(&self, route: TopicRoute) -> Result<SubscribeOutcome> {
        validate_table_name(&route.filter.table)?;
        let name = route.name();

        let mut active = self.active.lock();
        if active.contains_key(&name) {
            debug!(subscription = %name, "already subscribed");
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }

        let registration = self.feed.subscribe(route.filter.clone())?;
        let task = tokio::spawn(forward_events(
            registration.events,
            self.registry.clone(),
            route.topic.clone(),
            route.kind,
        ));

        active.insert(
            name.clone(),
            TableSubscription {
                name: name.clone(),
                topic: route.topic.clone(),
                feed_id: registration.id,
                task,
                created_at: Instant::now(),
            },
        );

        info!(subscription = %name, topic = %route.topic, "subscribed to changes");
        Ok(SubscribeOutcome::Subscribed)
    }

    /// Cancel the subscription called `name`, if any.
    ///
    /// The handle is removed even when the feed reports an error releasing
    /// its registration; the error is still returned.
    pub fn unsubscribe_table(&self, name: &str) -> Result<UnsubscribeOutcome> {
        let Some(subscription) = self.active.lock().remove(name) else {
            return Ok(UnsubscribeOutcome::NotSubscribed);
        };

        let age = subscription.age();
        subscription.cancel(self.feed.as_ref())?;

        info!(subscription = %name, age_secs = age.as_secs(), "unsubscribed from changes");
        Ok(UnsubscribeOutcome::Unsubscribed)
    }

    /// Names of active subscriptions, sorted, with their count.
    pub fn status(&self) -> SubscriptionStatus {
        let mut names: Vec<String> = self.active.lock().keys().cloned().collect();
        names.sort();
        SubscriptionStatus {
            count: names.len(),
            active_subscriptions: names,
        }
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active.lock().contains_key(name)
    }

    pub fn count(&self) -> usize {
        self.active.lock().len()
    }

    /// Cancel every subscription. Used on process shutdown.
    pub fn shutdown(&self) {
        let drained: Vec<TableSubscription> =
            self.active.lock().drain().map(|(_, sub)| sub).collect();

        let total = drained.len();
        for subscription in drained {
            let name = subscription.name.clone();
            if let Err(e) = subscription.cancel(self.feed.as_ref()) {
                warn!(subscription = %name, error = %e, "failed to release subscription");
            }
        }

        if total > 0 {
            info!(count = total, "released all table subscriptions");
        }
    }
}

/// Forward feed events to the registry until the feed closes the channel.
async fn forward_events(
    mut events: mpsc::Receiver<ChangeEvent>,
    registry: Arc<ConnectionRegistry>,
    topic: String,
    kind: MessageKind,
) {
    while let Some(event) = events.recv().await {
        debug!(
            topic = %topic,
            table = %event.table,
            change_type = %event.change_type,
            "change received"
        );
        registry.broadcast(&topic, kind.wrap(event)).await;
    }
    debug!(topic = %topic, "change feed closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::feed::{ChangeType, FeedSubscription, LocalChangeFeed};
    use crate::message::RealtimeMessage;
    use serde_json::json;

    struct Fixture {
        feed: Arc<LocalChangeFeed>,
        registry: Arc<ConnectionRegistry>,
        subscriptions: TableSubscriptions,
    }

    fn fixture() -> Fixture {
        let feed = Arc::new(LocalChangeFeed::new());
        let registry = Arc::new(ConnectionRegistry::new(Duration::from_millis(100)));
        let subscriptions = TableSubscriptions::new(feed.clone(), registry.clone());
        Fixture {
            feed,
            registry,
            subscriptions,
        }
    }

    /// A feed whose every call fails.
    struct BrokenFeed;

    impl ChangeFeed for BrokenFeed {
        fn subscribe(&self, _filter: FeedFilter) -> Result<FeedSubscription> {
            Err(RealtimeError::Feed("realtime channel unavailable".to_string()))
        }

        fn unsubscribe(&self, _id: FeedId) -> Result<()> {
            Err(RealtimeError::Feed("realtime channel unavailable".to_string()))
        }
    }

    async fn recv(rx: &mut mpsc::Receiver<RealtimeMessage>) -> RealtimeMessage {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("channel closed")
    }

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("crop_listings").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("orders; drop").is_err());
        assert!(validate_table_name(&"x".repeat(MAX_TABLE_NAME_LEN + 1)).is_err());
    }

    #[tokio::test]
    async fn test_double_subscribe_keeps_one_handle() {
        let f = fixture();

        assert_eq!(
            f.subscriptions.subscribe_table("orders").unwrap(),
            SubscribeOutcome::Subscribed
        );
        assert_eq!(
            f.subscriptions.subscribe_table("orders").unwrap(),
            SubscribeOutcome::AlreadySubscribed
        );

        assert_eq!(
            f.subscriptions.status(),
            SubscriptionStatus {
                active_subscriptions: vec!["orders".to_string()],
                count: 1,
            }
        );
        assert_eq!(f.feed.registration_count(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_from_status() {
        let f = fixture();
        f.subscriptions.subscribe_table("orders").unwrap();
        f.subscriptions.subscribe_table("crop_listings").unwrap();

        assert_eq!(
            f.subscriptions.unsubscribe_table("orders").unwrap(),
            UnsubscribeOutcome::Unsubscribed
        );

        let status = f.subscriptions.status();
        assert_eq!(status.active_subscriptions, vec!["crop_listings".to_string()]);
        assert_eq!(status.count, 1);
        assert_eq!(f.feed.registration_count(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_is_not_an_error() {
        let f = fixture();
        assert_eq!(
            f.subscriptions.unsubscribe_table("orders").unwrap(),
            UnsubscribeOutcome::NotSubscribed
        );
    }

    #[tokio::test]
    async fn test_changes_are_broadcast_under_table_name() {
        let f = fixture();
        let (conn, mut rx) = Connection::channel(8);
        f.registry.accept(conn, "orders");
        f.subscriptions.subscribe_table("orders").unwrap();

        let event = ChangeEvent::new("orders", ChangeType::Insert).with_record(json!({"id": 42}));
        assert_eq!(f.feed.publish(&event), 1);

        assert_eq!(recv(&mut rx).await, RealtimeMessage::TableChange { data: event });
    }

    #[tokio::test]
    async fn test_market_price_route_filters_by_crop() {
        let f = fixture();
        let (conn, mut rx) = Connection::channel(8);
        f.registry.accept(conn, "Onion");

        let route = TopicRoute::market_prices("Onion");
        assert_eq!(route.name(), "market_prices:crop_name=Onion");
        f.subscriptions.subscribe_topic(route).unwrap();

        let tomato = ChangeEvent::new("market_prices", ChangeType::Update)
            .with_record(json!({"crop_name": "Tomato", "modal_price": 900}));
        let onion = ChangeEvent::new("market_prices", ChangeType::Update)
            .with_record(json!({"crop_name": "Onion", "modal_price": 1850}));
        assert_eq!(f.feed.publish(&tomato), 0);
        assert_eq!(f.feed.publish(&onion), 1);

        assert_eq!(
            recv(&mut rx).await,
            RealtimeMessage::MarketPriceUpdate { data: onion }
        );
    }

    #[tokio::test]
    async fn test_feed_errors_surface() {
        let registry = Arc::new(ConnectionRegistry::default());
        let subscriptions = TableSubscriptions::new(Arc::new(BrokenFeed), registry);

        let err = subscriptions.subscribe_table("orders").unwrap_err();
        assert!(matches!(err, RealtimeError::Feed(ref msg) if msg.contains("unavailable")));
        assert_eq!(subscriptions.count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_table_rejected() {
        let f = fixture();
        assert!(matches!(
            f.subscriptions.subscribe_table("bad name"),
            Err(RealtimeError::InvalidTable(_))
        ));
        assert_eq!(f.subscriptions.count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_releases_everything() {
        let f = fixture();
        f.subscriptions.subscribe_table("orders").unwrap();
        f.subscriptions
            .subscribe_topic(TopicRoute::weather("Pune"))
            .unwrap();
        assert_eq!(f.feed.registration_count(), 2);

        f.subscriptions.shutdown();
        assert_eq!(f.subscriptions.count(), 0);
        assert_eq!(f.feed.registration_count(), 0);
    }
}
