//! JSON-RPC 2.0 envelope carried on plugin RPC subjects

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The protocol version string carried in every envelope
pub const JSONRPC_VERSION: &str = "2.0";

/// Reserved error code for transport-level failures
/// ("plugin not registered", "plugin timeout")
pub const ERR_UNAVAILABLE: i64 = -32000;

/// Standard JSON-RPC code for an unknown method
pub const ERR_METHOD_NOT_FOUND: i64 = -32601;

/// A JSON-RPC 2.0 request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Always `"2.0"`
    pub jsonrpc: String,
    /// Request ID; absent for notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name, e.g. `entities/list`
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: Value,
}

impl Request {
    /// Build a request with the given id
    pub fn new(id: Value, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }
}

/// A structured JSON-RPC error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code; `-32000` is reserved for transport failures
    pub code: i64,
    /// Human-readable message
    pub message: String,
}

/// A JSON-RPC 2.0 response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Always `"2.0"`
    pub jsonrpc: String,
    /// Echo of the request ID
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub id: Value,
    /// Result payload, present on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error, present on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Build a success response
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}
