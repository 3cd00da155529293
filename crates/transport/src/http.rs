//! Variant B transport: the opencode HTTP API with an SSE event stream.
//!
//! Turns are driven with `POST /session/<id>/message`; events arrive on
//! `GET /event` as SSE records which are normalized into the same
//! `method + params` shape the JSON-RPC variant produces. The client also
//! tails server-side message history, both for artifact reconciliation and
//! for the empty-body / timeout recovery path on prompt submission.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use archon_domain::error::{Error, Result};
use archon_domain::events::DebugStream;

use crate::sse::drain_data_lines;
use crate::{synthesize_request_id, Channels, DebugSink, NormalizedEvent};

/// Approval method for command execution permissions.
pub const METHOD_COMMAND_APPROVAL: &str = "item/commandExecution/requestApproval";
/// Approval method for file change permissions.
pub const METHOD_FILE_APPROVAL: &str = "item/fileChange/requestApproval";

/// Upstream credential. One of basic auth or a bearer token; never both.
#[derive(Debug, Clone, Default)]
pub enum Credentials {
    #[default]
    None,
    Bearer(String),
    Basic {
        username: String,
        password: String,
    },
}

/// A `provider/model` reference resolved against the server catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub provider_id: String,
    pub model_id: String,
}

/// One remote session message, reduced to what the engine consumes.
#[derive(Debug, Clone)]
pub struct RemoteMessage {
    pub id: String,
    pub role: String,
    pub text: String,
}

/// Result of a prompt submission.
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub message_id: Option<String>,
    pub text: String,
}

/// HTTP client for one opencode server.
pub struct OpencodeClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    timeout: Duration,
    /// `/config/providers` catalog, fetched lazily and cached.
    catalog: parking_lot::Mutex<Option<Vec<(String, Vec<String>)>>>,
}

impl OpencodeClient {
    pub fn new(base_url: impl Into<String>, credentials: Credentials, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            timeout,
            catalog: parking_lot::Mutex::new(None),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .timeout(self.timeout);
        match &self.credentials {
            Credentials::None => builder,
            Credentials::Bearer(token) => builder.bearer_auth(token),
            Credentials::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
        }
    }

    // ── Prompt submission ────────────────────────────────────────────

    /// Submit a prompt and return the assistant reply.
    ///
    /// When the server answers 200 with an empty body, or the request
    /// exceeds the client timeout, the reply is recovered from message
    /// history: the newest assistant message whose id is not in
    /// `seen_assistant_ids`.
    pub async fn start_turn(
        &self,
        session_id: &str,
        directory: &str,
        model: Option<&ModelRef>,
        text: &str,
        seen_assistant_ids: &HashSet<String>,
    ) -> Result<TurnReply> {
        let path = format!("/session/{session_id}/message");
        let mut body = json!({
            "parts": [{ "type": "text", "text": text }],
        });
        if let Some(model) = model {
            body["model"] = json!({
                "providerID": model.provider_id,
                "modelID": model.model_id,
            });
        }

        let mut builder = self.request(reqwest::Method::POST, &path).json(&body);
        if !directory.is_empty() {
            builder = builder.query(&[("directory", directory)]);
        }

        match builder.send().await {
            Ok(resp) => {
                let status = resp.status();
                if !status.is_success() {
                    return Err(request_error("POST", &path, status.as_u16()));
                }
                let raw = resp.text().await.map_err(|e| classify("POST", &path, e))?;
                if raw.trim().is_empty() {
                    return self.recover_reply(session_id, directory, seen_assistant_ids).await;
                }
                let value: Value = serde_json::from_str(&raw)?;
                match parse_message(&value) {
                    Some(msg) if msg.role == "assistant" => Ok(TurnReply {
                        message_id: Some(msg.id),
                        text: msg.text,
                    }),
                    _ => self.recover_reply(session_id, directory, seen_assistant_ids).await,
                }
            }
            Err(e) if e.is_timeout() => {
                self.recover_reply(session_id, directory, seen_assistant_ids).await
            }
            Err(e) => Err(classify("POST", &path, e)),
        }
    }

    async fn recover_reply(
        &self,
        session_id: &str,
        directory: &str,
        seen_assistant_ids: &HashSet<String>,
    ) -> Result<TurnReply> {
        let messages = self.list_messages(session_id, directory).await?;
        match latest_unseen_assistant(&messages, seen_assistant_ids) {
            Some(msg) => Ok(TurnReply {
                message_id: Some(msg.id.clone()),
                text: msg.text.clone(),
            }),
            None => Err(Error::Timeout(format!(
                "session {session_id}: no fresh assistant reply in history"
            ))),
        }
    }

    // ── History ──────────────────────────────────────────────────────

    /// Tail server-side message history for a session. A 4xx against the
    /// `directory` filter is retried once without it.
    pub async fn list_messages(
        &self,
        session_id: &str,
        directory: &str,
    ) -> Result<Vec<RemoteMessage>> {
        match self.list_messages_inner(session_id, directory).await {
            Ok(messages) => Ok(messages),
            Err(Error::Transport { status, .. })
                if !directory.is_empty() && (400..500).contains(&status) =>
            {
                self.list_messages_inner(session_id, "").await
            }
            Err(e) => Err(e),
        }
    }

    async fn list_messages_inner(
        &self,
        session_id: &str,
        directory: &str,
    ) -> Result<Vec<RemoteMessage>> {
        let path = format!("/session/{session_id}/message");
        let mut builder = self.request(reqwest::Method::GET, &path);
        if !directory.is_empty() {
            builder = builder.query(&[("directory", directory)]);
        }

        let resp = builder.send().await.map_err(|e| classify("GET", &path, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(request_error("GET", &path, status.as_u16()));
        }

        let value: Value = resp.json().await.map_err(|e| classify("GET", &path, e))?;
        let items = value.as_array().cloned().unwrap_or_default();
        Ok(items.iter().filter_map(parse_message).collect())
    }

    // ── Permissions ──────────────────────────────────────────────────

    /// Reply to a pending permission on the session-scoped endpoint.
    pub async fn reply_permission(
        &self,
        session_id: &str,
        permission_id: &str,
        response: &Value,
    ) -> Result<()> {
        let path = format!("/session/{session_id}/permissions/{permission_id}");
        let resp = self
            .request(reqwest::Method::POST, &path)
            .json(response)
            .send()
            .await
            .map_err(|e| classify("POST", &path, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(request_error("POST", &path, status.as_u16()));
        }
        Ok(())
    }

    // ── Model resolution ─────────────────────────────────────────────

    /// Resolve `"provider/model"` (or legacy bare `"model"`) against the
    /// server's provider catalog. When the catalog is unavailable the raw
    /// value is passed through with an empty provider id.
    pub async fn resolve_model(&self, raw: &str) -> ModelRef {
        let (provider_hint, model_id) = match raw.split_once('/') {
            Some((provider, model)) => (Some(provider.to_string()), model.to_string()),
            None => (None, raw.to_string()),
        };

        let catalog = match self.provider_catalog().await {
            Some(catalog) => catalog,
            None => {
                return ModelRef {
                    provider_id: provider_hint.unwrap_or_default(),
                    model_id,
                }
            }
        };

        if let Some(provider) = &provider_hint {
            if catalog.iter().any(|(id, _)| id == provider) {
                return ModelRef {
                    provider_id: provider.clone(),
                    model_id,
                };
            }
        }
        // Legacy bare model id: find the first provider advertising it.
        for (provider_id, models) in &catalog {
            if models.iter().any(|m| m == &model_id) {
                return ModelRef {
                    provider_id: provider_id.clone(),
                    model_id,
                };
            }
        }
        ModelRef {
            provider_id: provider_hint.unwrap_or_default(),
            model_id,
        }
    }

    async fn provider_catalog(&self) -> Option<Vec<(String, Vec<String>)>> {
        if let Some(catalog) = self.catalog.lock().clone() {
            return Some(catalog);
        }

        let path = "/config/providers";
        let resp = self.request(reqwest::Method::GET, path).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let value: Value = resp.json().await.ok()?;
        let parsed = parse_catalog(&value);
        *self.catalog.lock() = Some(parsed.clone());
        Some(parsed)
    }

    // ── Events ───────────────────────────────────────────────────────

    /// Open the SSE event stream for a provider session. Returns the three
    /// incoming channels plus a cancellation handle. A 4xx against the
    /// `directory` filter is retried once without it.
    pub async fn subscribe_events(
        self: &Arc<Self>,
        provider_session_id: &str,
        directory: &str,
        debug: Arc<dyn DebugSink>,
    ) -> Result<(Channels, CancellationToken)> {
        let path = "/event";
        let mut query = vec![("parentID".to_string(), provider_session_id.to_string())];
        if !directory.is_empty() {
            query.push(("directory".to_string(), directory.to_string()));
        }

        let send = |query: Vec<(String, String)>| {
            // Event streams outlive the per-request timeout.
            self.request(reqwest::Method::GET, path)
                .timeout(Duration::from_secs(24 * 3600))
                .query(&query)
                .send()
        };

        let resp = match send(query.clone()).await {
            Ok(resp) if resp.status().is_client_error() && !directory.is_empty() => {
                send(vec![query.remove(0)])
                    .await
                    .map_err(|e| classify("GET", path, e))?
            }
            Ok(resp) => resp,
            Err(e) => return Err(classify("GET", path, e)),
        };
        let status = resp.status();
        if !status.is_success() {
            return Err(request_error("GET", path, status.as_u16()));
        }

        let (notif_tx, notif_rx) = mpsc::channel(256);
        let (req_tx, req_rx) = mpsc::channel(256);
        let (err_tx, err_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        tokio::spawn(pump_sse(
            resp,
            notif_tx,
            req_tx,
            err_tx,
            cancel.clone(),
            debug,
        ));

        Ok((
            Channels {
                notifications: notif_rx,
                requests: req_rx,
                errors: err_rx,
            },
            cancel,
        ))
    }
}

async fn pump_sse(
    mut resp: reqwest::Response,
    notif_tx: mpsc::Sender<NormalizedEvent>,
    req_tx: mpsc::Sender<NormalizedEvent>,
    err_tx: mpsc::Sender<Error>,
    cancel: CancellationToken,
    debug: Arc<dyn DebugSink>,
) {
    let mut buffer = String::new();

    let terminal: Option<Error> = loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break None,
            chunk = resp.chunk() => chunk,
        };

        match chunk {
            Ok(Some(bytes)) => {
                buffer.push_str(&String::from_utf8_lossy(&bytes));
                for payload in drain_data_lines(&mut buffer) {
                    debug.record(DebugStream::Event, &payload);
                    let record: Value = match serde_json::from_str(&payload) {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::debug!(error = %e, "skipping malformed SSE payload");
                            continue;
                        }
                    };
                    if let Some(event) = map_sse_record(&record) {
                        let tx = if event.request_id.is_some() {
                            &req_tx
                        } else {
                            &notif_tx
                        };
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Ok(None) => break Some(Error::ClosedPipe("event stream ended".into())),
            Err(e) => {
                break Some(if e.is_timeout() {
                    Error::Timeout("event stream timed out".into())
                } else {
                    Error::Other(format!("event stream: {e}"))
                })
            }
        }
    };

    if let Some(err) = terminal {
        let _ = err_tx.send(err).await;
    }
    // Dropping the senders closes all three channels.
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Map one SSE record into the engine's normalized event vocabulary.
/// Records the engine has no use for return `None`.
pub fn map_sse_record(record: &Value) -> Option<NormalizedEvent> {
    let kind = record.get("type")?.as_str()?;
    let props = record
        .get("properties")
        .cloned()
        .unwrap_or(Value::Null);

    match kind {
        "session.status" => {
            let busy = props
                .get("status")
                .and_then(Value::as_str)
                .map(|s| s == "busy")
                .unwrap_or(false);
            busy.then(|| NormalizedEvent::notification("turn/started", props))
        }
        "message.part.updated" => {
            let part = props.get("part")?;
            if part.get("type").and_then(Value::as_str) != Some("text") {
                return None;
            }
            Some(NormalizedEvent::notification(
                "item/agentMessage/delta",
                json!({
                    "messageID": part.get("messageID").cloned().unwrap_or(Value::Null),
                    "delta": part.get("text").cloned().unwrap_or(Value::Null),
                }),
            ))
        }
        "permission.updated" => {
            let permission_id = props
                .get("id")
                .or_else(|| props.get("permissionID"))
                .and_then(Value::as_str)?
                .to_string();
            let method = match props.get("type").and_then(Value::as_str) {
                Some(t) if t.contains("edit") || t.contains("write") || t.contains("patch") => {
                    METHOD_FILE_APPROVAL
                }
                _ => METHOD_COMMAND_APPROVAL,
            };
            let request_id = synthesize_request_id(&permission_id);
            let mut params = props.clone();
            if let Some(obj) = params.as_object_mut() {
                obj.insert("permission_id".into(), json!(permission_id));
            }
            Some(NormalizedEvent::request(method, params, request_id))
        }
        "permission.replied" => Some(NormalizedEvent::notification("permission/replied", props)),
        "session.idle" => Some(NormalizedEvent::notification("turn/completed", props)),
        "session.error" => Some(NormalizedEvent::notification("error", props)),
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parsing helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse a remote message from either the enveloped (`{info, parts}`) or the
/// flat (`{id, role, parts}`) server shape.
fn parse_message(value: &Value) -> Option<RemoteMessage> {
    let info = value.get("info").unwrap_or(value);
    let id = info.get("id")?.as_str()?.to_string();
    let role = info
        .get("role")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let parts = value
        .get("parts")
        .or_else(|| info.get("parts"))
        .and_then(Value::as_array);
    let text = match parts {
        Some(parts) => parts
            .iter()
            .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        None => info
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    };

    Some(RemoteMessage { id, role, text })
}

/// Newest assistant message not yet observed. History is chronological, so
/// the last match wins.
pub fn latest_unseen_assistant<'a>(
    messages: &'a [RemoteMessage],
    seen: &HashSet<String>,
) -> Option<&'a RemoteMessage> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "assistant" && !seen.contains(&m.id))
}

fn parse_catalog(value: &Value) -> Vec<(String, Vec<String>)> {
    let providers = value
        .get("providers")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    providers
        .iter()
        .filter_map(|p| {
            let id = p.get("id")?.as_str()?.to_string();
            let models = match p.get("models") {
                Some(Value::Object(map)) => map.keys().cloned().collect(),
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|m| {
                        m.as_str()
                            .map(str::to_string)
                            .or_else(|| m.get("id")?.as_str().map(str::to_string))
                    })
                    .collect(),
                _ => Vec::new(),
            };
            Some((id, models))
        })
        .collect()
}

fn request_error(method: &str, path: &str, status: u16) -> Error {
    Error::Transport {
        method: method.to_string(),
        path: path.to_string(),
        status,
    }
}

fn classify(method: &str, path: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("{method} {path}: {e}"))
    } else if let Some(status) = e.status() {
        request_error(method, path, status.as_u16())
    } else {
        Error::Other(format!("{method} {path}: {e}"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
