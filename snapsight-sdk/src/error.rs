// ABOUTME: Custom error types for the snapsight SDK with user-friendly messages
// ABOUTME: Covers REST failures, channel transport failures and protocol decoding errors

use thiserror::Error;

use crate::mode::Mode;

#[derive(Debug, Error)]
pub enum SnapError {
    #[error("Authentication failed. Log in again with `snapsight login`")]
    Auth,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Server returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded. Please wait before making more requests")]
    RateLimit,

    #[error("Invalid API response format")]
    InvalidResponse,

    #[error("Timeout: Request took too long to complete")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Channel for {0} is not open")]
    ChannelClosed(Mode),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Unknown mode '{0}'. Expected one of: translate, calorie, navigate")]
    UnknownMode(String),

    #[error("No active processing mode found")]
    NoActiveMode,

    #[error("Image error: {0}")]
    Image(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Credential storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SnapError {
    pub fn help_text(&self) -> Option<&'static str> {
        match self {
            SnapError::Auth => Some("Run `snapsight login` or set SNAPSIGHT_TOKEN"),
            SnapError::Network(_) | SnapError::Transport(_) => {
                Some("Check that the backend is running and reachable, then try again")
            }
            SnapError::RateLimit => Some("Wait a moment before making another request"),
            SnapError::Timeout => Some("Try again or check your network connection"),
            SnapError::NoActiveMode => Some(
                "Enable one mode on the server first, for example with `snapsight toggle calorie`",
            ),
            SnapError::UnknownMode(_) => Some("Valid modes are: translate, calorie, navigate"),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            SnapError::Network(_)
            | SnapError::Timeout
            | SnapError::RateLimit
            | SnapError::Transport(_) => true,
            SnapError::Http { status, .. } => {
                (crate::constants::errors::SERVER_ERROR_MIN
                    ..=crate::constants::errors::SERVER_ERROR_MAX)
                    .contains(status)
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SnapError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SnapError::Timeout
        } else if err.is_status() {
            if let Some(status) = err.status() {
                match status.as_u16() {
                    401 => SnapError::Auth,
                    429 => SnapError::RateLimit,
                    code => SnapError::Http {
                        status: code,
                        message: err.to_string(),
                    },
                }
            } else {
                SnapError::Network(err.to_string())
            }
        } else if err.is_decode() {
            SnapError::InvalidResponse
        } else {
            SnapError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SnapError {
    fn from(err: serde_json::Error) -> Self {
        SnapError::MalformedMessage(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SnapError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SnapError::Transport(err.to_string())
    }
}

impl From<url::ParseError> for SnapError {
    fn from(err: url::ParseError) -> Self {
        SnapError::Configuration(format!("Invalid URL: {}", err))
    }
}
