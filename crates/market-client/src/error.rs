//! Error types for the marketplace client.

use reqwest::StatusCode;
use thiserror::Error;

/// Crate-wide result type for API calls.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors raised by a [`CredentialStore`](crate::credentials::CredentialStore).
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying file system failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The credential document exists but cannot be parsed.
    #[error("Corrupt credential file: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// Backend-specific failure.
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// Create a backend-specific error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Errors returned from [`RequestDispatcher::request`](crate::dispatcher::RequestDispatcher::request)
/// and the typed endpoint helpers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network unreachable, timeout, or connection dropped.
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A 401 that was not recovered by a refresh.
    #[error("{message}")]
    Unauthorized { message: String },

    /// The refresh credential was rejected or could not be exchanged.
    #[error("Session expired, please sign in again")]
    SessionExpired,

    /// Any other non-2xx response.
    #[error("{message}")]
    Application { status: StatusCode, message: String },

    /// Credential persistence failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Response body did not match the expected shape.
    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The client was torn down while the request was waiting.
    #[error("Request cancelled: client is shutting down")]
    Cancelled,
}

impl ApiError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Build an application error, falling back to the generic status message
    /// when the server did not provide one.
    pub fn application(status: StatusCode, message: Option<String>) -> Self {
        Self::Application {
            status,
            message: message.unwrap_or_else(|| generic_status_message(status)),
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Application { status, .. } => Some(*status),
            Self::Unauthorized { .. } => Some(StatusCode::UNAUTHORIZED),
            Self::Transport(e) => e.status(),
            _ => None,
        }
    }

    /// Whether the user has to sign in again.
    pub fn requires_relogin(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }

    /// Whether a notice for this error has already been emitted elsewhere.
    ///
    /// Refresh exhaustion is reported once by the coordinator rather than once
    /// per queued request, and cancellation is never user-visible.
    pub fn is_reported(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::Cancelled)
    }

    /// Message shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport(e) => e.to_string(),
            _ => self.to_string(),
        }
    }
}

/// Message used when an error response carries no `message` field.
pub(crate) fn generic_status_message(status: StatusCode) -> String {
    format!("Request failed with status code {}", status.as_u16())
}

/// Errors raised by the realtime bridge.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// WebSocket handshake or I/O failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Malformed frame or unexpected packet.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server refused the connection.
    #[error("Connection rejected: {0}")]
    Rejected(String),

    /// Operation requires an open connection.
    #[error("Not connected")]
    NotConnected,

    /// The realtime endpoint could not be derived from the base URL.
    #[error("Invalid realtime URL: {0}")]
    InvalidUrl(String),
}

impl RealtimeError {
    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_error_falls_back_to_status_message() {
        let err = ApiError::application(StatusCode::NOT_FOUND, None);
        assert_eq!(err.user_message(), "Request failed with status code 404");

        let err = ApiError::application(StatusCode::BAD_REQUEST, Some("Invalid price".into()));
        assert_eq!(err.user_message(), "Invalid price");
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_session_expired_is_reported_once() {
        assert!(ApiError::SessionExpired.is_reported());
        assert!(ApiError::SessionExpired.requires_relogin());
        assert!(!ApiError::config("bad").is_reported());
    }
}
