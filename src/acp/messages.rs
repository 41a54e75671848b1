//! JSON-RPC 2.0 envelopes exchanged with the agent process.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Protocol version string written into every outbound envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier as it appears on the wire.
///
/// The client only ever issues integer ids, but agents are free to echo them
/// back as strings and to use strings for their own requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id.
    Number(u64),
    /// String id.
    Text(String),
}

impl RequestId {
    /// Numeric value of the id, parsing string ids that hold an integer.
    #[must_use]
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.parse().ok(),
        }
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// `error` member of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Optional numeric error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    /// Human-readable message, surfaced to callers unchanged.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to one of our requests.
    Response {
        /// Echoed request id.
        id: RequestId,
        /// `result` on success, `error` on failure.
        outcome: std::result::Result<Value, RpcError>,
    },
    /// Fire-and-forget message from the agent.
    Notification {
        /// Notification method, e.g. `session/update`.
        method: String,
        /// Method payload; `null` when absent.
        params: Value,
    },
    /// Agent-initiated request that expects a response from us.
    Request {
        /// Agent-chosen id to echo in the response.
        id: RequestId,
        /// Request method.
        method: String,
        /// Method payload; `null` when absent.
        params: Value,
    },
}

#[derive(Serialize)]
struct OutboundRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

#[derive(Serialize)]
struct OutboundResponse<'a> {
    jsonrpc: &'static str,
    id: &'a RequestId,
    result: &'a Value,
}

/// Serialise a request envelope to a single JSON line (without `\n`).
///
/// # Errors
///
/// Returns [`AppError::Transport`](crate::AppError::Transport) if `params`
/// cannot be serialised.
pub fn encode_request(id: u64, method: &str, params: Option<&Value>) -> Result<String> {
    let envelope = OutboundRequest {
        jsonrpc: JSONRPC_VERSION,
        id,
        method,
        params,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Serialise a success response to an agent-initiated request.
///
/// # Errors
///
/// Returns [`AppError::Transport`](crate::AppError::Transport) if `result`
/// cannot be serialised.
pub fn encode_response(id: &RequestId, result: &Value) -> Result<String> {
    let envelope = OutboundResponse {
        jsonrpc: JSONRPC_VERSION,
        id,
        result,
    };
    Ok(serde_json::to_string(&envelope)?)
}
