//! Failover policy.

use crate::net::{ErrorCode, RpcError, RpcRequest};

/// Decides whether a logical call may move on to the next candidate.
pub trait FailoverPolicy: Send + Sync {
    /// An attempt failed with `error`. `true` lets the call try another proxy.
    fn on_error(&self, request: &RpcRequest, error: &RpcError) -> bool;

    /// The failover timer fired on the active attempt. `false` settles the
    /// call with a timeout instead of sending the next attempt.
    fn on_timeout(&self) -> bool {
        true
    }
}

/// Retries transport-level failures, never errors produced by the request itself.
///
/// An attempt the transport dropped on its own (`Cancelled`) counts as a lost proxy.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFailoverPolicy;

impl FailoverPolicy for DefaultFailoverPolicy {
    fn on_error(&self, _request: &RpcRequest, error: &RpcError) -> bool {
        error.is_retriable() || error.code == ErrorCode::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_follows_error_classification() {
        let policy = DefaultFailoverPolicy;
        let request = RpcRequest::new("ApiService", "LookupRows");

        assert!(policy.on_error(&request, &RpcError::transport("connection reset")));
        assert!(policy.on_error(&request, &RpcError::unavailable("overloaded")));
        assert!(!policy.on_error(&request, &RpcError::new(ErrorCode::Server, "no such table")));
        assert!(!policy.on_error(&request, &RpcError::protocol("bad frame")));
        assert!(policy.on_error(&request, &RpcError::cancelled()));
        assert!(policy.on_timeout());
    }
}
