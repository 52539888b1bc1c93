use thiserror::Error;

/// Main error type for the supervision server
#[derive(Error, Debug)]
pub enum WardenError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Transport errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Not connected; registration for topic {topic} retained until next refresh")]
    NotConnected { topic: String },

    #[error("Request timed out after {elapsed_ms}ms")]
    RequestTimeout { elapsed_ms: u64 },

    #[error("Request failed: {0}")]
    RequestFailed(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Programming/contract errors (these do surface to the caller)
    #[error("Contract violation: {0}")]
    Contract(String),

    // Listener errors
    #[error("Listener failure: {0}")]
    Listener(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for WardenError
pub type Result<T> = std::result::Result<T, WardenError>;

impl WardenError {
    /// True for errors the caller is expected to retry after reconnection.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WardenError::NotConnected { .. }
                | WardenError::Transport(_)
                | WardenError::RequestTimeout { .. }
        )
    }
}
