//! Error types for Murmur

use thiserror::Error;

/// Result type alias for Murmur operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Murmur
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Readiness probe could not reach the backend
    #[error("status check failed: {0}")]
    StatusCheck(#[source] BackendError),

    /// Chat, audio, or synthesis exchange failed
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Deleting a server-side conversation failed (logged, never returned to callers)
    #[error("conversation teardown failed: {0}")]
    Teardown(#[source] BackendError),

    /// Microphone access was refused by the platform
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable capture device
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Audio encoding, decoding, or playback error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing error
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Whether this error came from acquiring the capture device
    #[must_use]
    pub const fn is_capture_error(&self) -> bool {
        matches!(self, Self::PermissionDenied(_) | Self::DeviceUnavailable(_))
    }
}

/// Failure of a single request/response exchange with the inference backend
#[derive(Debug, Error)]
#[error("{operation} failed: {cause}")]
pub struct BackendError {
    /// Backend operation that failed (e.g. "chat")
    pub operation: &'static str,
    /// What went wrong
    pub cause: BackendCause,
}

/// Why a backend exchange failed
#[derive(Debug, Error)]
pub enum BackendCause {
    /// The request never produced a usable HTTP response
    #[error("transport failure: {0}")]
    Transport(String),

    /// The backend answered with an `error` field
    #[error("backend reported: {0}")]
    Declared(String),

    /// The backend answered with a body that could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Create a transport failure
    pub fn transport(operation: &'static str, detail: impl Into<String>) -> Self {
        Self {
            operation,
            cause: BackendCause::Transport(detail.into()),
        }
    }

    /// Create a backend-declared application error
    pub fn declared(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            cause: BackendCause::Declared(message.into()),
        }
    }

    /// Create an invalid-response error
    pub fn invalid_response(operation: &'static str, detail: impl Into<String>) -> Self {
        Self {
            operation,
            cause: BackendCause::InvalidResponse(detail.into()),
        }
    }

    /// Whether the failure happened at the network level
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self.cause, BackendCause::Transport(_))
    }

    /// Whether the backend itself reported the failure
    #[must_use]
    pub const fn is_declared(&self) -> bool {
        matches!(self.cause, BackendCause::Declared(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::declared("chat", "model overloaded");
        assert_eq!(err.to_string(), "chat failed: backend reported: model overloaded");
        assert!(err.is_declared());
        assert!(!err.is_transport());
    }

    #[test]
    fn test_backend_error_converts_into_error() {
        let err: Error = BackendError::transport("status", "connection refused").into();
        assert!(matches!(err, Error::Backend(ref e) if e.is_transport()));
        assert!(!err.is_capture_error());
    }

    #[test]
    fn test_capture_errors() {
        assert!(Error::PermissionDenied("denied".to_string()).is_capture_error());
        assert!(Error::DeviceUnavailable("none".to_string()).is_capture_error());
        assert!(!Error::Audio("bad".to_string()).is_capture_error());
    }
}
