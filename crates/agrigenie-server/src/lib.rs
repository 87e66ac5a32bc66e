//! AgriGenie realtime server.
//!
//! This crate exposes the realtime layer over HTTP and WebSocket:
//! - `/realtime/ws/:user_id` fan-out sockets keyed by subscriber
//! - table subscribe/unsubscribe/status control routes
//! - market price and weather topic subscriptions
//! - a change ingest route feeding the in-process change feed

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

pub use config::{Args, ServerConfig};
pub use error::AppError;
pub use state::AppState;

use axum::{http::HeaderValue, routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the Axum router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origin);

    Router::new()
        .merge(routes::health::routes())
        .merge(routes::realtime::routes())
        .route("/realtime/ws/:user_id", get(ws::ws_subscriber))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origin == "*" {
        return cors.allow_origin(Any);
    }
    match origin.parse::<HeaderValue>() {
        Ok(value) => cors.allow_origin(value),
        Err(_) => {
            tracing::warn!(origin, "invalid CORS origin, allowing any");
            cors.allow_origin(Any)
        }
    }
}
