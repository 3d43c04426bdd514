use std::fmt;

use log::error;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(reqwest::Error),
    /// Authentication-specific errors
    #[error("Authentication error: {0}")]
    Authentication(String),
    /// Forbidden access error
    #[error("Forbidden: {0}")]
    Forbidden(String),
    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),
    /// Server error
    #[error("Server error: {0}")]
    ServerError(String),
    /// Non-success responses that don't map to a more specific variant
    #[error("API error: {0}")]
    ApiError(String),
    /// The byte stream failed while it was being read
    #[error("Transport error: {0}")]
    Transport(String),
    /// The backend reported `status: error` on the stream
    #[error("Backend error: {0}")]
    Backend(String),
    /// Response parsing errors (missing fields, invalid format)
    #[error("Failed to parse response: {0}")]
    ResponseFormat(String),
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// I/O error
    #[error("I/O error: {0}")]
    IOError(String),
}

impl ChatError {
    /// Transport failures and backend-reported errors interrupt the conversation
    /// for the user. Malformed records and protocol violations never reach here.
    pub const fn is_user_visible(&self) -> bool {
        !matches!(self, Self::ResponseFormat(_))
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        Self::IOError(err.to_string())
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        // If the error has a status code, map it to a more specific error
        if let Some(status) = err.status() {
            match status.as_u16() {
                401 => Self::Authentication(format!("Authentication failed: {err}")),
                403 => Self::Forbidden(format!("Permission denied: {err}")),
                404 => Self::NotFound(format!("Resource not found: {err}")),
                429 => Self::ApiError(format!("Rate limit exceeded: {err}")),
                500..=599 => Self::ServerError(format!("Server error: {err}")),
                _ => Self::Network(err),
            }
        } else {
            Self::Network(err)
        }
    }
}

impl From<::config::ConfigError> for ChatError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

/// The chat operation an error happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Send,
    Create,
    Delete,
    Rename,
    Load,
    Export,
    Stream,
}

impl Operation {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Send => "Sending message",
            Self::Create => "Creating conversation",
            Self::Delete => "Deleting conversation",
            Self::Rename => "Renaming conversation",
            Self::Load => "Loading conversation",
            Self::Export => "Exporting conversation",
            Self::Stream => "Streaming",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Receives errors that should interrupt the perceived conversation flow.
pub trait ErrorSink: Send + Sync {
    fn report(&self, error: &ChatError, operation: Operation);
}

/// Writes reported errors to the log at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn report(&self, err: &ChatError, operation: Operation) {
        error!("{} failed: {err}", operation.label());
    }
}
