// JSON-RPC 2.0 envelopes
//
// The wire format is one JSON document per line, symmetric on both
// transports. Requests carry an id and expect exactly one response;
// notifications carry no id and expect nothing back.

use std::fmt;

use serde::de::{Deserializer, Error as DeError};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version tag carried by every message
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC request ID.
///
/// Servers may echo either a string or a number; the kind must round-trip
/// losslessly (a numeric `42` must never come back out as `"42"`). Responses
/// are matched to pending calls by the textual form (`key()`), not the kind,
/// so a server that answers a numeric id with its string spelling still
/// correlates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl RequestId {
    /// Canonical string form used as the pending-table key
    pub fn key(&self) -> String {
        match self {
            RequestId::String(s) => s.clone(),
            RequestId::Number(n) => n.to_string(),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{}", s),
            RequestId::Number(n) => write!(f, "{}", n),
        }
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RequestId::String(s) => serializer.serialize_str(s),
            RequestId::Number(n) => serializer.serialize_i64(*n),
        }
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // String interpretation first, then numeric; anything else is a
        // decode error.
        match Value::deserialize(deserializer)? {
            Value::String(s) => Ok(RequestId::String(s)),
            Value::Number(n) => n
                .as_i64()
                .map(RequestId::Number)
                .ok_or_else(|| D::Error::custom("request id must be an integer, not a float")),
            other => Err(D::Error::custom(format!(
                "request id must be a string or number, got {}",
                other
            ))),
        }
    }
}

/// Outbound request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Outbound notification - same shape as a request minus the id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Error object carried by a failed response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Inbound response - exactly one of `result` / `error` is populated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Unwrap the result payload, surfacing a server error object as a
    /// typed protocol error rather than a payload
    pub fn into_result(self) -> Result<Value, crate::error::McpError> {
        if let Some(err) = self.error {
            return Err(crate::error::McpError::Protocol {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}
