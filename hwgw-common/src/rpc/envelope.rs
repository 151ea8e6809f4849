//! RPC wire envelopes.
//!
//! Requests carry the caller's origin (which doubles as its reply port), a
//! dot-path procedure name, and an arbitrary JSON payload. Responses echo
//! the procedure and carry either a payload or an error string. Strictly
//! request-then-single-response; there are no unsolicited pushes.

use crate::types::Origin;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request envelope as posted to a server's inbound port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub origin: Origin,
    /// Dot path through the router tree, e.g. `"reserve"` or `"fleet.status"`.
    pub procedure: String,
    #[serde(default)]
    pub payload: Value,
}

/// A response envelope as posted to the caller's private port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub procedure: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(procedure: impl Into<String>, payload: Value) -> Self {
        Self {
            procedure: procedure.into(),
            success: true,
            payload,
            error: None,
        }
    }

    pub fn err(procedure: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
            success: false,
            payload: Value::Null,
            error: Some(error.into()),
        }
    }
}
