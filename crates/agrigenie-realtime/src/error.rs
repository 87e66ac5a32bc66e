//! Realtime error types.

use thiserror::Error;

/// Realtime errors.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// The change feed provider rejected or failed a request.
    #[error("change feed error: {0}")]
    Feed(String),

    /// Table name failed validation.
    #[error("invalid table name: {0}")]
    InvalidTable(String),
}

pub type Result<T> = std::result::Result<T, RealtimeError>;
