//! Upstream provider transports.
//!
//! Two variants behind one consumption shape:
//! - [`stdio::StdioTransport`] — line-delimited JSON-RPC over a provider
//!   subprocess's stdin/stdout (codex app-server).
//! - [`http::OpencodeClient`] — HTTP client with an SSE event subscription
//!   (opencode server).
//!
//! Both surface incoming traffic as three channels — notifications, requests,
//! errors — carrying [`NormalizedEvent`] records, so the live-session pump is
//! variant-agnostic.

pub mod http;
pub mod protocol;
pub mod sse;
pub mod stdio;

use archon_domain::error::Error;
use serde_json::Value;
use tokio::sync::mpsc;

/// A provider event normalized to `method + params`, regardless of whether it
/// arrived as a JSON-RPC message or an SSE record.
#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    pub method: String,
    pub params: Value,
    /// Present on request messages that expect a response (approvals).
    pub request_id: Option<i64>,
}

impl NormalizedEvent {
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            request_id: None,
        }
    }

    pub fn request(method: impl Into<String>, params: Value, request_id: i64) -> Self {
        Self {
            method: method.into(),
            params,
            request_id: Some(request_id),
        }
    }
}

/// The three incoming streams every transport exposes. Receiving `None` on
/// any of them means the transport has shut down.
pub struct Channels {
    pub notifications: mpsc::Receiver<NormalizedEvent>,
    pub requests: mpsc::Receiver<NormalizedEvent>,
    pub errors: mpsc::Receiver<Error>,
}

/// Sink for raw provider I/O, consumed by the per-session debug stream.
/// Implementations must be non-blocking; a no-op sink is valid.
pub trait DebugSink: Send + Sync + 'static {
    fn record(&self, stream: archon_domain::events::DebugStream, chunk: &str);
}

/// No-op debug sink.
pub struct NullDebugSink;

impl DebugSink for NullDebugSink {
    fn record(&self, _stream: archon_domain::events::DebugStream, _chunk: &str) {}
}

/// Synthesize a stable positive request id from a permission identifier
/// (32-bit FNV-1a, masked into `i64`). Zero hashes fall back to 1 so the id
/// stays strictly positive.
pub fn synthesize_request_id(permission_id: &str) -> i64 {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let mut hash = FNV_OFFSET;
    for byte in permission_id.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    let id = i64::from(hash & 0x7fff_ffff);
    if id == 0 {
        1
    } else {
        id
    }
}
