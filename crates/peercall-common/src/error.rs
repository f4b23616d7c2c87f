//! Common error types for Peercall.

use thiserror::Error;

/// Result type alias using Peercall's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Peercall operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Request could not reach the gateway or the response was unreadable
    #[error("transport error: {0}")]
    Transport(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Caller input rejected before or by the gateway
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Authentication failed or session missing
    #[error("authentication error: {0}")]
    Auth(String),

    /// Account or peer not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource already exists
    #[error("conflict: {0}")]
    Conflict(String),

    /// Rate limit exceeded
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Call flow driven out of order
    #[error("call state error: {0}")]
    CallState(String),

    /// Gateway reported an internal failure
    #[error("server error: {0}")]
    Server(String),
}

impl Error {
    /// Create a transport error from any displayable type.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Create a serialization error from any displayable type.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create an invalid input error from any displayable type.
    pub fn invalid_input(msg: impl std::fmt::Display) -> Self {
        Self::InvalidInput(msg.to_string())
    }

    /// Create an auth error from any displayable type.
    pub fn auth(msg: impl std::fmt::Display) -> Self {
        Self::Auth(msg.to_string())
    }

    /// Create a not found error from any displayable type.
    pub fn not_found(msg: impl std::fmt::Display) -> Self {
        Self::NotFound(msg.to_string())
    }

    /// Create a call state error from any displayable type.
    pub fn call_state(msg: impl std::fmt::Display) -> Self {
        Self::CallState(msg.to_string())
    }

    /// Map an HTTP status and the gateway's error message onto a variant.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 | 422 => Self::InvalidInput(message),
            401 | 403 => Self::Auth(message),
            404 => Self::NotFound(message),
            409 => Self::Conflict(message),
            429 => Self::RateLimited(message),
            500..=599 => Self::Server(message),
            _ => Self::Transport(format!("unexpected status {status}: {message}")),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_maps_client_errors() {
        assert!(matches!(Error::from_status(400, "x"), Error::InvalidInput(_)));
        assert!(matches!(Error::from_status(401, "x"), Error::Auth(_)));
        assert!(matches!(Error::from_status(404, "x"), Error::NotFound(_)));
        assert!(matches!(Error::from_status(409, "x"), Error::Conflict(_)));
        assert!(matches!(Error::from_status(429, "x"), Error::RateLimited(_)));
    }

    #[test]
    fn test_from_status_maps_server_errors() {
        match Error::from_status(503, "down") {
            Error::Server(msg) => assert_eq!(msg, "down"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_unexpected_status_keeps_code() {
        let err = Error::from_status(302, "moved");
        assert_eq!(err.to_string(), "transport error: unexpected status 302: moved");
    }
}
