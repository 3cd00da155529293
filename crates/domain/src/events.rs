//! Event value types carried on subscriber channels.
//!
//! Every event carries a per-session monotonic sequence number (assigned by
//! the broadcasting hub) and a wall-clock RFC3339 timestamp with nanosecond
//! precision.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current wall-clock time in RFC3339 with nanoseconds, UTC.
pub fn now_rfc3339_nanos() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// A typed provider event: a normalized notification or request observed on
/// an upstream transport and fanned out to session subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Monotonic per-session sequence number; 0 until the hub stamps it.
    #[serde(default)]
    pub seq: u64,
    pub ts: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    /// Set for request messages that expect a response (approvals).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<i64>,
}

impl SessionEvent {
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            seq: 0,
            ts: now_rfc3339_nanos(),
            method: method.into(),
            params,
            request_id: None,
        }
    }

    pub fn request(method: impl Into<String>, params: Value, request_id: i64) -> Self {
        Self {
            request_id: Some(request_id),
            ..Self::notification(method, params)
        }
    }
}

/// Which raw byte stream a debug event was captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugStream {
    Stdin,
    Stdout,
    Stderr,
    Event,
}

/// A raw provider I/O record for the per-session debug stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugEvent {
    #[serde(default)]
    pub seq: u64,
    pub ts: String,
    pub stream: DebugStream,
    pub chunk: String,
}

impl DebugEvent {
    pub fn new(stream: DebugStream, chunk: impl Into<String>) -> Self {
        Self {
            seq: 0,
            ts: now_rfc3339_nanos(),
            stream,
            chunk: chunk.into(),
        }
    }
}
