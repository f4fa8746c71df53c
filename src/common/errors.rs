use tokio_tungstenite::tungstenite;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, WiredExchangeError>;

#[derive(thiserror::Error, Debug)]
pub enum WiredExchangeError {
    #[error("Health check failed")]
    HealthCheckFailed,

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// No connection became ready before the wait was given up.
    #[error("WebSocket not connected")]
    NotConnected,

    /// The transport dropped underneath the receive loop.
    #[error("WebSocket transport closed")]
    TransportClosed,

    /// The server never acknowledged subscription `id`.
    #[error("Subscription #{id} not acknowledged in time")]
    SubscriptionTimeout { id: u64 },

    #[error("Handler {handler} failed: {message}")]
    HandlerFault { handler: String, message: String },

    #[error("Malformed message: {0}")]
    MalformedMessage(String),
}

impl WiredExchangeError {
    pub fn handler_fault(handler: &str, message: impl Into<String>) -> Self {
        Self::HandlerFault {
            handler: handler.to_string(),
            message: message.into(),
        }
    }
}
