//! Engine error types

use thiserror::Error;

/// Engine error with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Unavailable, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Network, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::RateLimit, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::ServerError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Auth, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::InvalidRequest, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Unknown, message)
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Capability absent or handle lost (local), endpoint not configured (remote)
    Unavailable,
    /// Network issues, timeouts
    Network,
    /// Rate limited (429)
    RateLimit,
    /// Server error (5xx)
    ServerError,
    /// Authentication failed (401, 403)
    Auth,
    /// Bad request (400)
    InvalidRequest,
    /// Unknown error
    Unknown,
}

impl EngineErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::ServerError => "server_error",
            Self::Auth => "auth",
            Self::InvalidRequest => "invalid_request",
            Self::Unknown => "unknown",
        }
    }
}
