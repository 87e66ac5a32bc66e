//! Server configuration.

use std::time::Duration;

use clap::Parser;

/// Default HTTP listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";

/// Default allowed CORS origin (the web frontend).
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";

/// Default per-connection send timeout in milliseconds.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 5_000;

/// Default outbound buffer per WebSocket connection.
pub const DEFAULT_CONNECTION_BUFFER: usize = 64;

/// Default event buffer per change feed registration.
pub const DEFAULT_FEED_BUFFER: usize = 256;

/// Tables subscribed when the server starts.
pub const DEFAULT_STARTUP_TABLES: &[&str] = &[
    "market_prices",
    "ai_insights",
    "crop_listings",
    "orders",
    "disease_detections",
];

/// AgriGenie realtime server command line arguments.
#[derive(Debug, Parser)]
#[command(name = "agrigenie-server")]
#[command(version, about = "AgriGenie realtime API server")]
pub struct Args {
    /// Address to listen on for HTTP and WebSocket requests.
    #[arg(short, long, default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: String,

    /// Allowed CORS origin ("*" allows any).
    #[arg(long, env = "CORS_ORIGIN", default_value = DEFAULT_CORS_ORIGIN)]
    pub cors_origin: String,

    /// Time (ms) a broadcast waits on one slow connection before dropping it.
    #[arg(long, default_value_t = DEFAULT_SEND_TIMEOUT_MS)]
    pub send_timeout_ms: u64,

    /// Outbound message buffer per WebSocket connection.
    #[arg(long, default_value_t = DEFAULT_CONNECTION_BUFFER)]
    pub connection_buffer: usize,

    /// Event buffer per change feed registration.
    #[arg(long, default_value_t = DEFAULT_FEED_BUFFER)]
    pub feed_buffer: usize,

    /// Tables to subscribe to at startup (comma-separated, empty for none).
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "market_prices,ai_insights,crop_listings,orders,disease_detections"
    )]
    pub startup_tables: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub listen_addr: String,
    /// Allowed CORS origin.
    pub cors_origin: String,
    /// Per-connection send timeout during broadcast.
    pub send_timeout: Duration,
    /// Outbound buffer per WebSocket connection.
    pub connection_buffer: usize,
    /// Event buffer per change feed registration.
    pub feed_buffer: usize,
    /// Tables subscribed at startup.
    pub startup_tables: Vec<String>,
}

impl ServerConfig {
    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    pub fn with_cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_origin = origin.into();
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_connection_buffer(mut self, buffer: usize) -> Self {
        self.connection_buffer = buffer;
        self
    }

    pub fn with_feed_buffer(mut self, buffer: usize) -> Self {
        self.feed_buffer = buffer;
        self
    }

    pub fn with_startup_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.startup_tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Check settings that would make the server misbehave.
    pub fn validate(&self) -> Result<(), String> {
        if self.send_timeout.is_zero() {
            return Err("send timeout must be greater than zero".to_string());
        }
        if self.connection_buffer == 0 {
            return Err("connection buffer must be at least 1".to_string());
        }
        if self.feed_buffer == 0 {
            return Err("feed buffer must be at least 1".to_string());
        }
        Ok(())
    }
}

impl From<&Args> for ServerConfig {
    fn from(args: &Args) -> Self {
        Self {
            listen_addr: args.listen.clone(),
            cors_origin: args.cors_origin.clone(),
            send_timeout: Duration::from_millis(args.send_timeout_ms),
            connection_buffer: args.connection_buffer,
            feed_buffer: args.feed_buffer,
            startup_tables: args
                .startup_tables
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            cors_origin: DEFAULT_CORS_ORIGIN.to_string(),
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
            connection_buffer: DEFAULT_CONNECTION_BUFFER,
            feed_buffer: DEFAULT_FEED_BUFFER,
            startup_tables: DEFAULT_STARTUP_TABLES.iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(config.cors_origin, DEFAULT_CORS_ORIGIN);
        assert_eq!(config.send_timeout, Duration::from_secs(5));
        assert_eq!(config.startup_tables.len(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_args_defaults_match_config_defaults() {
        let args = Args::parse_from(["agrigenie-server"]);
        let config = ServerConfig::from(&args);
        let defaults = ServerConfig::default();

        assert_eq!(config.listen_addr, defaults.listen_addr);
        assert_eq!(config.send_timeout, defaults.send_timeout);
        assert_eq!(config.startup_tables, defaults.startup_tables);
    }

    #[test]
    fn test_startup_tables_parsing() {
        let args = Args::parse_from([
            "agrigenie-server",
            "--startup-tables",
            "orders, crop_listings,",
            "--send-timeout-ms",
            "250",
        ]);
        let config = ServerConfig::from(&args);

        assert_eq!(config.startup_tables, vec!["orders", "crop_listings"]);
        assert_eq!(config.send_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_validate_rejects_zero_buffers() {
        let config = ServerConfig::default().with_connection_buffer(0);
        assert!(config.validate().is_err());

        let config = ServerConfig::default().with_send_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
