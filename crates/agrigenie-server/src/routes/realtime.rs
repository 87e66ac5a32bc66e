//! Realtime control routes.

use agrigenie_realtime::{
    validate_table_name, ChangeEvent, ChangeType, SubscribeOutcome, SubscriptionStatus,
    TopicRoute, UnsubscribeOutcome,
};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::state::AppState;

/// Realtime routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/realtime/subscribe/:table", post(subscribe_to_table))
        .route("/realtime/unsubscribe/:table", post(unsubscribe_from_table))
        .route("/realtime/status", get(subscription_status))
        .route("/realtime/market-prices/:crop_name", get(market_price_updates))
        .route("/realtime/weather/:location", get(weather_updates))
        .route("/realtime/changes/:table", post(ingest_change))
}

/// Plain status message.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Response for topic subscriptions.
#[derive(Debug, Serialize)]
pub struct TopicResponse {
    pub message: String,
    /// Subscriber key the updates are delivered under.
    pub topic: String,
    /// Name of the backing subscription.
    pub subscription: String,
}

/// A row change pushed by the database watcher.
#[derive(Debug, Deserialize)]
pub struct ChangeRequest {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    #[serde(default)]
    pub record: Option<Value>,
    #[serde(default)]
    pub old_record: Option<Value>,
    /// Commit time reported by the provider. Defaults to arrival time.
    #[serde(default)]
    pub commit_timestamp: Option<DateTime<Utc>>,
}

/// Response for an ingested change.
#[derive(Debug, Serialize)]
pub struct ChangeAccepted {
    pub table: String,
    /// Feed registrations the change was handed to.
    pub delivered: usize,
}

async fn subscribe_to_table(
    State(state): State<AppState>,
    Path(table): Path<String>,
) -> Result<Json<MessageResponse>> {
    let message = match state.subscriptions.subscribe_table(&table)? {
        SubscribeOutcome::Subscribed => format!("Successfully subscribed to {}", table),
        SubscribeOutcome::AlreadySubscribed => format!("Already subscribed to {}", table),
    };
    Ok(Json(MessageResponse { message }))
}

async fn unsubscribe_from_table(
    State(state): State<AppState>,
    Path(table): Path<String>,
) -> Result<Json<MessageResponse>> {
    let message = match state.subscriptions.unsubscribe_table(&table)? {
        UnsubscribeOutcome::Unsubscribed => format!("Successfully unsubscribed from {}", table),
        UnsubscribeOutcome::NotSubscribed => format!("No active subscription for {}", table),
    };
    Ok(Json(MessageResponse { message }))
}

async fn subscription_status(State(state): State<AppState>) -> Json<SubscriptionStatus> {
    Json(state.subscriptions.status())
}

async fn market_price_updates(
    State(state): State<AppState>,
    Path(crop_name): Path<String>,
) -> Result<Json<TopicResponse>> {
    subscribe_route(&state, TopicRoute::market_prices(crop_name), "market price")
}

async fn weather_updates(
    State(state): State<AppState>,
    Path(location): Path<String>,
) -> Result<Json<TopicResponse>> {
    subscribe_route(&state, TopicRoute::weather(location), "weather")
}

fn subscribe_route(
    state: &AppState,
    route: TopicRoute,
    label: &str,
) -> Result<Json<TopicResponse>> {
    let subscription = route.name();
    let topic = route.topic.clone();

    let message = match state.subscriptions.subscribe_topic(route)? {
        SubscribeOutcome::Subscribed => format!("Subscribed to {} updates for {}", label, topic),
        SubscribeOutcome::AlreadySubscribed => {
            format!("Already subscribed to {} updates for {}", label, topic)
        }
    };

    Ok(Json(TopicResponse {
        message,
        topic,
        subscription,
    }))
}

async fn ingest_change(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Json(request): Json<ChangeRequest>,
) -> Result<Json<ChangeAccepted>> {
    validate_table_name(&table)?;

    let mut event = ChangeEvent::new(table.clone(), request.change_type);
    event.record = request.record;
    event.old_record = request.old_record;
    if let Some(committed) = request.commit_timestamp {
        event.commit_timestamp = committed;
    }

    let delivered = state.feed.publish(&event);
    tracing::debug!(
        table = %table,
        change_type = %event.change_type,
        delivered,
        "change ingested"
    );

    Ok(Json(ChangeAccepted { table, delivered }))
}
