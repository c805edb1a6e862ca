//! Errors reported by a single transport attempt.

use thiserror::Error;

/// Classification of an attempt error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Connection-level failure (reset, refused, broken pipe).
    Transport,
    /// Proxy is alive but refuses work (overloaded, shutting down).
    Unavailable,
    /// Transport-side deadline expired.
    Timeout,
    /// The attempt was cancelled before it produced a result.
    Cancelled,
    /// The peer broke the protocol contract.
    ProtocolViolation,
    /// Credentials were rejected.
    Authentication,
    NoSuchService,
    NoSuchMethod,
    /// Any other error produced by the server.
    Server,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Transport => "transport",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::ProtocolViolation => "protocol_violation",
            ErrorCode::Authentication => "authentication",
            ErrorCode::NoSuchService => "no_such_service",
            ErrorCode::NoSuchMethod => "no_such_method",
            ErrorCode::Server => "server",
        }
    }
}

/// Error delivered to a response sink by a transport channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{} error: {message}", .code.as_str())]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Transport, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "request cancelled")
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProtocolViolation, message)
    }

    /// Errors that say nothing about the request itself, only about the path to the proxy.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::Transport | ErrorCode::Unavailable | ErrorCode::Timeout
        )
    }

    /// Errors after which the destination must not be used again.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ProtocolViolation
                | ErrorCode::Authentication
                | ErrorCode::NoSuchService
                | ErrorCode::NoSuchMethod
        )
    }
}
