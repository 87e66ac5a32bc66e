//! AgriGenie realtime server binary.

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agrigenie_server::{create_router, AppState, Args, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    let log_filter = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "agrigenie_server={0},agrigenie_realtime={0},tower_http=info",
                    log_filter
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from(&args);
    if let Err(reason) = config.validate() {
        anyhow::bail!("invalid configuration: {}", reason);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen_addr,
        cors_origin = %config.cors_origin,
        send_timeout_ms = config.send_timeout.as_millis() as u64,
        "starting AgriGenie realtime server"
    );

    let state = AppState::new(config.clone());

    let subscribed = state.subscribe_startup_tables();
    info!(
        subscribed,
        requested = config.startup_tables.len(),
        "startup table subscriptions ready"
    );

    let app = create_router(state.clone());

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.subscriptions.shutdown();
    info!("server shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl+c");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal");
}
