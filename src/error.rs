//! Error types for Design Assist.

/// Top-level error type for the client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Relay error: {0}")]
    Relay(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Outcome classification for every call against the workflow API.
///
/// None of these are fatal: the session stays usable and the caller may
/// retry the same action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Network, DNS, timeout, or a response body that could not be read.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with an explicit `error` field.
    #[error("Server error: {0}")]
    Remote(String),

    /// Rejected locally before any request was made.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A stage value outside the known sequence.
    #[error("Unresolvable stage: {0}")]
    Unresolvable(String),
}

impl ApiError {
    /// Whether repeating the same request might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Transport(format!("malformed response: {e}"))
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Result type alias for the client.
pub type Result<T> = std::result::Result<T, Error>;
