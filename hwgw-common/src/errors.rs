//! Error types shared across HWGW components.

use crate::types::HostId;
use thiserror::Error;

/// Failures surfaced by the RPC transport layer.
#[derive(Debug, Error)]
pub enum RpcError {
    /// No correlated response arrived within the configured timeout.
    #[error("no response within {0:?}")]
    Timeout(std::time::Duration),

    /// The requested dot-path does not resolve to a procedure.
    #[error("invalid procedure '{0}'")]
    InvalidProcedure(String),

    /// A response arrived for a different procedure than was called.
    #[error("procedure mismatch: expected '{expected}', got '{got}'")]
    ProcedureMismatch { expected: String, got: String },

    /// The resolver failed on the server side.
    #[error("procedure failed on the server: {0}")]
    Remote(String),

    /// A payload did not decode against the declared shape.
    #[error("payload mismatch: {0}")]
    BadPayload(String),
}

/// Failures dispatching a remote operation onto a worker host.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("unknown host '{0}'")]
    UnknownHost(HostId),

    #[error("unknown target '{0}'")]
    UnknownTarget(HostId),

    #[error("insufficient RAM on '{host}': need {needed:.1} GB, {free:.1} GB free")]
    InsufficientRam {
        host: HostId,
        needed: f64,
        free: f64,
    },

    #[error("zero threads requested for {op} on '{host}'")]
    ZeroThreads {
        host: HostId,
        op: crate::types::OpKind,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_messages() {
        let e = RpcError::ProcedureMismatch {
            expected: "reserve".into(),
            got: "drop".into(),
        };
        assert_eq!(e.to_string(), "procedure mismatch: expected 'reserve', got 'drop'");

        let e = RpcError::InvalidProcedure("no.such.path".into());
        assert!(e.to_string().contains("no.such.path"));
    }

    #[test]
    fn test_dispatch_error_formats_ram_shortfall() {
        let e = DispatchError::InsufficientRam {
            host: "alpha".into(),
            needed: 204.8,
            free: 12.0,
        };
        let msg = e.to_string();
        assert!(msg.contains("alpha"));
        assert!(msg.contains("204.8"));
        assert!(msg.contains("12.0"));
    }
}
