use std::sync::Arc;

use agrigenie_realtime::{ConnectionRegistry, LocalChangeFeed, SubscribeOutcome, TableSubscriptions};

use crate::config::ServerConfig;

/// Application state shared across all routes
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub subscriptions: Arc<TableSubscriptions>,
    pub feed: Arc<LocalChangeFeed>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.send_timeout));
        let feed = Arc::new(LocalChangeFeed::with_buffer(config.feed_buffer));
        let subscriptions = Arc::new(TableSubscriptions::new(feed.clone(), registry.clone()));

        Self {
            registry,
            subscriptions,
            feed,
            config,
        }
    }

    /// Subscribe to the configured startup tables.
    ///
    /// Failures are logged and skipped so one bad table does not keep the
    /// server from starting. Returns the number of new subscriptions; tables
    /// that were already subscribed are not counted.
    pub fn subscribe_startup_tables(&self) -> usize {
        let mut subscribed = 0;
        for table in &self.config.startup_tables {
            match self.subscriptions.subscribe_table(table) {
                Ok(SubscribeOutcome::Subscribed) => subscribed += 1,
                Ok(SubscribeOutcome::AlreadySubscribed) => {
                    tracing::debug!(table = %table, "startup table already subscribed")
                }
                Err(e) => tracing::warn!(table = %table, error = %e, "startup subscription failed"),
            }
        }
        subscribed
    }
}
