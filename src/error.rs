use thiserror::Error;
use uuid::Uuid;

use crate::domain::OrderStatus;

/// Main error type for the order gateway
#[derive(Error, Debug)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Lookup failures
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Market not found: {0}")]
    MarketNotFound(i64),

    #[error("Market {0} is not accepting orders")]
    MarketNotActive(i64),

    // Idempotency conflicts
    #[error("Conflict: {0}")]
    Conflict(String),

    // State guard violations
    #[error("Order cannot be cancelled in status {status}")]
    NotCancellable { status: OrderStatus },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Validation errors (surfaced before any transaction opens)
    #[error("Validation failed: {0}")]
    Validation(String),

    // Crypto/signing errors
    #[error("Order signature does not match the claimed wallet address")]
    InvalidSignature,

    #[error("Signature error: {0}")]
    Signature(String),

    // Collaborator failures
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Conflict raised while another request holds the same idempotency key.
    pub fn key_in_flight() -> Self {
        Self::Conflict("a request with this idempotency key is already being processed".to_string())
    }

    /// Conflict raised when a key is reused with a different request body.
    pub fn key_reused() -> Self {
        Self::Conflict("idempotency key was reused with different parameters".to_string())
    }
}

/// Result type alias for EngineError
pub type Result<T> = std::result::Result<T, EngineError>;
