//! Error types and handling for PulseHub

use std::time::Duration;
use thiserror::Error;

/// Result type alias for PulseHub operations
pub type Result<T> = std::result::Result<T, Error>;

/// PulseHub error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Connection is not authenticated")]
    Unauthenticated,

    #[error("Rate limit exceeded, retry after {0:?}")]
    RateLimited(Duration),

    #[error("Connection limit reached ({0} active)")]
    ConnectionLimit(usize),

    #[error("Message expired: older than {0:?}")]
    MessageExpired(Duration),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Notification failure on {channel}: {reason}")]
    NotificationFailure { channel: String, reason: String },

    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    #[error("Alert rule not found: {0}")]
    RuleNotFound(String),

    #[error("Pattern rule not found: {0}")]
    PatternNotFound(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Mirror error: {0}")]
    Mirror(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Service is shutting down")]
    Shutdown,
}
