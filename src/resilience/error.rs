//! Errors of a logical call.

use std::time::Duration;

use thiserror::Error;

use crate::load_balancer::PoolError;
use crate::net::RpcError;

/// Stable tag for each [`CallError`] variant, used as a metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Rpc,
    ProtocolViolation,
    Timeout,
    Exhausted,
    Cancelled,
    Pool,
    Closed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Rpc => "rpc_error",
            ErrorKind::ProtocolViolation => "protocol_violation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Exhausted => "exhausted",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Pool => "pool_error",
            ErrorKind::Closed => "closed",
        }
    }
}

/// Terminal failure of a logical call.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// One attempt failed with an error the failover policy does not retry.
    #[error(transparent)]
    Rpc(RpcError),

    /// The proxy broke the call contract (e.g. replied to a one-way request).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The global deadline expired.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Every candidate failed before the deadline.
    #[error(
        "candidates exhausted after {attempts} attempt(s){}",
        .last.as_ref().map(|e| format!(", last error: {}", e)).unwrap_or_default()
    )]
    Exhausted {
        attempts: usize,
        last: Option<RpcError>,
    },

    #[error("request cancelled")]
    Cancelled,

    /// No candidate could be selected.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The client was closed before the call started.
    #[error("client is closed")]
    Closed,
}

impl CallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::Rpc(_) => ErrorKind::Rpc,
            CallError::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            CallError::Timeout(_) => ErrorKind::Timeout,
            CallError::Exhausted { .. } => ErrorKind::Exhausted,
            CallError::Cancelled => ErrorKind::Cancelled,
            CallError::Pool(_) => ErrorKind::Pool,
            CallError::Closed => ErrorKind::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_carries_last_error() {
        let err = CallError::Exhausted {
            attempts: 2,
            last: Some(RpcError::transport("retriable error")),
        };
        assert_eq!(err.kind(), ErrorKind::Exhausted);
        assert!(err.to_string().contains("retriable error"));
        assert!(err.to_string().contains("2 attempt"));
    }

    #[test]
    fn pool_errors_convert() {
        let err: CallError = PoolError::NoDatacenters.into();
        assert_eq!(err.kind(), ErrorKind::Pool);
        assert_eq!(err.kind().as_str(), "pool_error");
    }
}
