//! Error types for the Alpaca client

/// Errors that can occur while talking to an Alpaca server
#[derive(Debug, thiserror::Error)]
pub enum AlpacaError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Server unreachable: {0}")]
    Unreachable(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Alpaca error {code}: {message}")]
    Protocol { code: i32, message: String },

    #[error("Property not supported by device: {0}")]
    UnsupportedProperty(String),

    #[error("Malformed device identity: {0:?}")]
    MalformedIdentity(String),

    #[error("No device selected")]
    IdentityUnset,

    #[error("Device did not connect after {attempts} attempts")]
    ConnectFailed { attempts: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AlpacaError {
    /// True for failures reported by the device itself (`ErrorNumber != 0`)
    pub fn is_protocol(&self) -> bool {
        matches!(self, AlpacaError::Protocol { .. })
    }
}

/// Result type alias for Alpaca client operations
pub type Result<T> = std::result::Result<T, AlpacaError>;
