use serde::Serialize;

/// Structured trace events emitted across all Archon crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionResolved {
        session_id: String,
        provider: String,
        is_new: bool,
    },
    SessionClosed {
        session_id: String,
        reason: String,
    },
    ThreadResumed {
        session_id: String,
        thread_id: String,
    },
    ThreadBootstrapped {
        session_id: String,
        old_thread_id: String,
        new_thread_id: String,
    },
    TurnStarted {
        session_id: String,
        turn_id: String,
    },
    TurnCompleted {
        session_id: String,
        turn_id: String,
        status: String,
        artifacts_persisted: bool,
    },
    ApprovalStored {
        session_id: String,
        request_id: i64,
        method: String,
    },
    ApprovalResolved {
        session_id: String,
        request_id: i64,
    },
    ItemsAppended {
        session_id: String,
        lines: usize,
    },
    StartTurnRetry {
        session_id: String,
        attempt: u32,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "archon_event");
    }
}
