//! JSON-RPC 2.0 types for the provider app-server protocol.
//!
//! Each message is a single line of JSON (newline-delimited).

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outgoing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A JSON-RPC 2.0 request (has an `id` — expects a response).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: i64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A response the daemon sends back for an upstream-originated request
/// (approval replies).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcReply {
    pub jsonrpc: String,
    pub id: i64,
    pub result: Value,
}

impl JsonRpcReply {
    pub fn new(id: i64, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Incoming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

/// Any incoming line from the provider. The field combination decides how it
/// is routed:
/// - `method` without `id` — notification
/// - `method` with `id` — request (the provider expects a response)
/// - `id` with `result`/`error` — response to one of our calls
#[derive(Debug, Clone, Deserialize)]
pub struct RpcMessage {
    #[allow(dead_code)]
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// Routing classification of an incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageShape {
    Notification,
    Request,
    Response,
    Unknown,
}

impl RpcMessage {
    pub fn shape(&self) -> MessageShape {
        match (&self.method, self.id) {
            (Some(_), None) => MessageShape::Notification,
            (Some(_), Some(_)) => MessageShape::Request,
            (None, Some(_)) if self.result.is_some() || self.error.is_some() => {
                MessageShape::Response
            }
            _ => MessageShape::Unknown,
        }
    }
}
