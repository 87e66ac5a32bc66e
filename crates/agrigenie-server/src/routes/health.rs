use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Welcome to AgriGenie API" }))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "agrigenie-server",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": {
            "subscribers": state.registry.subscriber_count(),
            "active": state.registry.connection_count(),
        },
        "subscriptions": state.subscriptions.count(),
    }))
}
