//! Turn artifact synchronizer (opencode sessions).
//!
//! On turn completion, reconciles server-side message history with the
//! local append-only items log and computes the assistant-output payload
//! for the completion notification. Failures along the way are recorded on
//! the outcome but never raised — completion notifications must still fire.

use std::sync::Arc;

use serde_json::json;

use archon_transport::http::{OpencodeClient, RemoteMessage};

use crate::items::{
    assistant_count, has_assistant_text, item_ids, latest_assistant_text, ItemLog, DEFAULT_TAIL,
};

pub const SOURCE_RECONCILE: &str = "opencode_history_reconcile";
pub const SOURCE_NOOP: &str = "noop";
pub const SOURCE_UNAVAILABLE: &str = "unavailable";

/// Result of one reconciliation pass.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub output: String,
    pub artifacts_persisted: bool,
    pub assistant_artifact_count: usize,
    pub source: &'static str,
    /// `"id:<latestAssistantMessageID>"`, or empty when no assistant
    /// contribution is known (disables freshness deduplication).
    pub evidence_key: String,
    pub error: Option<String>,
}

/// Reconciles remote history into the local items log.
pub struct ArtifactSynchronizer {
    items: Arc<ItemLog>,
}

impl ArtifactSynchronizer {
    pub fn new(items: Arc<ItemLog>) -> Self {
        Self { items }
    }

    pub async fn reconcile(
        &self,
        client: &OpencodeClient,
        session_id: &str,
        provider_session_id: &str,
        directory: &str,
        claimed_output: &str,
    ) -> SyncOutcome {
        let mut error: Option<String> = None;

        // 1. Fetch the most recent remote messages. The client retries a
        //    refused `directory` filter without it.
        let (remote, source) = match client.list_messages(provider_session_id, directory).await {
            Ok(mut messages) => {
                if messages.len() > DEFAULT_TAIL {
                    messages.drain(..messages.len() - DEFAULT_TAIL);
                }
                (messages, SOURCE_RECONCILE)
            }
            Err(e) => {
                error = Some(format!("fetching remote history: {e}"));
                (Vec::new(), SOURCE_UNAVAILABLE)
            }
        };

        // 2. Tail the local log.
        let local = match self.items.tail(session_id, DEFAULT_TAIL) {
            Ok(items) => items,
            Err(e) => {
                record_error(&mut error, format!("reading items log: {e}"));
                Vec::new()
            }
        };

        // 3. Append remote items the log does not have yet, in order.
        let known = item_ids(&local);
        let missing: Vec<_> = remote
            .iter()
            .filter(|m| !known.contains(&m.id))
            .map(|m| json!({ "id": m.id, "type": "message", "role": m.role, "text": m.text }))
            .collect();
        if !missing.is_empty() {
            if let Err(e) = self.items.append(session_id, &missing) {
                record_error(&mut error, format!("appending reconciled items: {e}"));
            }
        }

        // 4. Re-read so persisted-state answers reflect this pass.
        let local = self
            .items
            .tail(session_id, DEFAULT_TAIL)
            .unwrap_or(local);

        // 5. Output: remote history wins, then local artifacts, then the
        //    claim carried on the completion event.
        let remote_assistant = latest_remote_assistant(&remote);
        let output = remote_assistant
            .map(|m| m.text.clone())
            .or_else(|| latest_assistant_text(&local))
            .unwrap_or_else(|| claimed_output.to_string());

        let evidence_key = remote_assistant
            .map(|m| m.id.clone())
            .or_else(|| latest_local_assistant_id(&local))
            .map(|id| format!("id:{id}"))
            .unwrap_or_default();

        SyncOutcome {
            output,
            artifacts_persisted: has_assistant_text(&local),
            assistant_artifact_count: assistant_count(&local),
            source,
            evidence_key,
            error,
        }
    }
}

fn latest_remote_assistant(remote: &[RemoteMessage]) -> Option<&RemoteMessage> {
    remote.iter().rev().find(|m| m.role == "assistant")
}

fn latest_local_assistant_id(local: &[serde_json::Value]) -> Option<String> {
    local
        .iter()
        .rev()
        .find(|i| i.get("role").and_then(serde_json::Value::as_str) == Some("assistant"))
        .and_then(|i| i.get("id").and_then(serde_json::Value::as_str))
        .map(str::to_string)
}

fn record_error(slot: &mut Option<String>, message: String) {
    match slot {
        Some(existing) => {
            existing.push_str("; ");
            existing.push_str(&message);
        }
        None => *slot = Some(message),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use archon_transport::http::Credentials;
    use axum::{extract::Path, routing::get, Json, Router};
    use serde_json::Value;
    use std::time::Duration;

    /// Serve a fixed message history on an ephemeral port.
    async fn mock_server(history: Vec<Value>) -> String {
        let app = Router::new().route(
            "/session/:id/message",
            get(move |Path(_id): Path<String>| {
                let history = history.clone();
                async move { Json(Value::Array(history)) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn remote_message(id: &str, role: &str, text: &str) -> Value {
        json!({
            "info": { "id": id, "role": role },
            "parts": [{ "type": "text", "text": text }],
        })
    }

    #[tokio::test]
    async fn reconcile_appends_missing_items_and_computes_output() {
        let base_url = mock_server(vec![
            remote_message("m-1", "user", "question"),
            remote_message("m-2", "assistant", "answer"),
        ])
        .await;
        let client =
            OpencodeClient::new(base_url, Credentials::None, Duration::from_secs(5));

        let dir = tempfile::tempdir().unwrap();
        let items = Arc::new(ItemLog::new(dir.path()));
        // The user side was persisted before the upstream call.
        items
            .append("s-1", &[json!({"id": "m-1", "role": "user", "text": "question"})])
            .unwrap();

        let sync = ArtifactSynchronizer::new(items.clone());
        let outcome = sync.reconcile(&client, "s-1", "ps-1", "/repo", "").await;

        assert_eq!(outcome.source, SOURCE_RECONCILE);
        assert_eq!(outcome.output, "answer");
        assert_eq!(outcome.evidence_key, "id:m-2");
        assert!(outcome.artifacts_persisted);
        assert_eq!(outcome.assistant_artifact_count, 1);
        assert!(outcome.error.is_none());

        // Only the assistant message was newly appended.
        let local = items.tail("s-1", 10).unwrap();
        assert_eq!(local.len(), 2);
        assert_eq!(local[1]["id"], "m-2");
    }

    #[tokio::test]
    async fn reconcile_is_idempotent_across_repeated_completions() {
        let base_url = mock_server(vec![remote_message("m-2", "assistant", "answer")]).await;
        let client =
            OpencodeClient::new(base_url, Credentials::None, Duration::from_secs(5));

        let dir = tempfile::tempdir().unwrap();
        let items = Arc::new(ItemLog::new(dir.path()));
        let sync = ArtifactSynchronizer::new(items.clone());

        let first = sync.reconcile(&client, "s-1", "ps-1", "", "").await;
        let second = sync.reconcile(&client, "s-1", "ps-1", "", "").await;
        assert_eq!(first.evidence_key, second.evidence_key);
        assert_eq!(items.tail("s-1", 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_falls_back_to_local_artifacts() {
        // Nothing is listening on this port.
        let client = OpencodeClient::new(
            "http://127.0.0.1:1",
            Credentials::None,
            Duration::from_secs(1),
        );

        let dir = tempfile::tempdir().unwrap();
        let items = Arc::new(ItemLog::new(dir.path()));
        items
            .append(
                "s-1",
                &[json!({"id": "m-9", "role": "assistant", "text": "cached"})],
            )
            .unwrap();

        let sync = ArtifactSynchronizer::new(items);
        let outcome = sync.reconcile(&client, "s-1", "ps-1", "", "claimed").await;

        assert_eq!(outcome.source, SOURCE_UNAVAILABLE);
        assert_eq!(outcome.output, "cached");
        assert_eq!(outcome.evidence_key, "id:m-9");
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn empty_history_uses_the_claimed_output() {
        let base_url = mock_server(Vec::new()).await;
        let client =
            OpencodeClient::new(base_url, Credentials::None, Duration::from_secs(5));

        let dir = tempfile::tempdir().unwrap();
        let sync = ArtifactSynchronizer::new(Arc::new(ItemLog::new(dir.path())));
        let outcome = sync.reconcile(&client, "s-1", "ps-1", "", "claimed").await;

        assert_eq!(outcome.output, "claimed");
        assert!(outcome.evidence_key.is_empty());
        assert!(!outcome.artifacts_persisted);
    }
}
