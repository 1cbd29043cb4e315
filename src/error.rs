//! Restash error types

/// Restash error types.
///
/// `Clone` so that a single in-flight fetch can hand the same failure to
/// every caller that attached to it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RestashError {
    /// The token provider produced no credential; no request was sent.
    #[error("no credential available")]
    Auth,

    /// Transport failure before a response was received.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The response body did not match its declared content type or the
    /// expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl RestashError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Network failures, 429 and 5xx are transient. Everything else is a
    /// permanent error the caller has to act on.
    pub fn is_transient(&self) -> bool {
        match self {
            RestashError::Network(_) => true,
            RestashError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            RestashError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short, stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RestashError::Auth => "auth",
            RestashError::Network(_) => "network",
            RestashError::HttpStatus { .. } => "http_status",
            RestashError::Decode(_) => "decode",
            RestashError::InvalidInput(_) => "invalid_input",
            RestashError::Configuration(_) => "configuration",
        }
    }
}

impl From<serde_json::Error> for RestashError {
    fn from(err: serde_json::Error) -> Self {
        RestashError::Decode(err.to_string())
    }
}

/// Result type alias for Restash operations
pub type Result<T> = std::result::Result<T, RestashError>;
