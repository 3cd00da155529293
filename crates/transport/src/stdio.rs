//! Variant A transport: line-delimited JSON-RPC over a provider subprocess.
//!
//! Spawns the provider binary (codex app-server), writes requests to its
//! stdin, and runs a reader task that demultiplexes stdout lines:
//! notifications and upstream requests go to their channels, responses
//! resolve the pending call registered by the outbound method. EOF or a
//! decode failure propagates to the errors channel and then closes all
//! three streams.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, oneshot, Mutex};

use archon_domain::error::{Error, Result};
use archon_domain::events::DebugStream;
use archon_domain::policy::RuntimeOptions;

use crate::protocol::{JsonRpcReply, JsonRpcRequest, MessageShape, RpcMessage};
use crate::{Channels, DebugSink, NormalizedEvent};

/// How long an outbound call waits for its response.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Grace period between closing stdin and killing the child.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// Capacity of the notification/request channels feeding the pump.
const CHANNEL_CAPACITY: usize = 256;

/// Launch parameters for the provider subprocess.
#[derive(Debug, Clone)]
pub struct StdioConfig {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

type PendingMap = parking_lot::Mutex<HashMap<i64, oneshot::Sender<Result<Value>>>>;

/// Subprocess JSON-RPC transport.
pub struct StdioTransport {
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Child>,
    pending: Arc<PendingMap>,
    next_id: AtomicI64,
    closed: AtomicBool,
}

impl StdioTransport {
    /// Spawn the provider binary and start the reader tasks. Returns the
    /// transport plus the three incoming streams.
    pub fn spawn(config: StdioConfig, debug: Arc<dyn DebugSink>) -> Result<(Arc<Self>, Channels)> {
        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args)
            .current_dir(&config.cwd)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(Error::Io)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdin",
            ))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdout",
            ))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stderr",
            ))
        })?;

        let transport = Arc::new(Self {
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(child),
            pending: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            next_id: AtomicI64::new(1),
            closed: AtomicBool::new(false),
        });

        let (notif_tx, notif_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (req_tx, req_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel(4);

        tokio::spawn(read_stdout(
            BufReader::new(stdout),
            transport.pending.clone(),
            notif_tx,
            req_tx,
            err_tx,
            debug.clone(),
        ));
        tokio::spawn(read_stderr(BufReader::new(stderr), debug));

        Ok((
            transport,
            Channels {
                notifications: notif_rx,
                requests: req_rx,
                errors: err_rx,
            },
        ))
    }

    /// Issue a JSON-RPC call and wait for the matching response.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ClosedPipe("transport is closed".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let req = JsonRpcRequest::new(id, method, params);
        if let Err(e) = self.write_line(&serde_json::to_string(&req)?).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped: the reader task died before answering.
            Ok(Err(_)) => Err(Error::ClosedPipe(format!(
                "{method}: transport closed before response"
            ))),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(Error::Timeout(format!("{method}: no response")))
            }
        }
    }

    /// Start a fresh upstream thread; returns the new thread id.
    pub async fn start_thread(
        &self,
        cwd: &std::path::Path,
        options: &RuntimeOptions,
    ) -> Result<String> {
        let result = self
            .call("thread/start", Some(thread_params(cwd, options)))
            .await?;
        thread_id_from(&result).ok_or_else(|| {
            Error::Other(format!("thread/start returned no thread id: {result}"))
        })
    }

    /// Resume an existing upstream thread.
    pub async fn resume_thread(&self, thread_id: &str) -> Result<()> {
        self.call("thread/resume", Some(json!({ "threadId": thread_id })))
            .await?;
        Ok(())
    }

    /// Start a turn on the given thread. The daemon mints the turn id; the
    /// provider may echo back its own, which wins.
    pub async fn start_turn(
        &self,
        thread_id: &str,
        turn_id: &str,
        input: &str,
        options: &RuntimeOptions,
    ) -> Result<String> {
        let mut params = json!({
            "threadId": thread_id,
            "turnId": turn_id,
            "input": [{ "type": "text", "text": input }],
        });
        merge_options(&mut params, options);

        let result = self.call("turn/start", Some(params)).await?;
        Ok(result
            .get("turnId")
            .or_else(|| result.get("turn_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| turn_id.to_string()))
    }

    /// Interrupt the active turn on a thread.
    pub async fn interrupt_turn(&self, thread_id: &str, turn_id: &str) -> Result<()> {
        self.call(
            "turn/interrupt",
            Some(json!({ "threadId": thread_id, "turnId": turn_id })),
        )
        .await?;
        Ok(())
    }

    /// Send the response for an upstream-originated request (approvals).
    pub async fn respond(&self, request_id: i64, result: Value) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ClosedPipe("transport is closed".into()));
        }
        let reply = JsonRpcReply::new(request_id, result);
        self.write_line(&serde_json::to_string(&reply)?).await
    }

    /// Tear down the subprocess: close stdin, give it a grace period, then
    /// kill. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        fail_pending(&self.pending, "transport closed");

        if let Some(mut stdin) = self.stdin.lock().await.take() {
            if let Err(e) = stdin.shutdown().await {
                tracing::debug!(error = %e, "error closing provider stdin");
            }
        }

        let mut child = self.child.lock().await;
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(?status, "provider process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "error waiting for provider process");
            }
            Err(_) => {
                tracing::warn!("provider process did not exit within grace period, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill provider process");
                }
            }
        }
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| Error::ClosedPipe("stdin already closed".into()))?;
        stdin.write_all(line.as_bytes()).await.map_err(Error::Io)?;
        stdin.write_all(b"\n").await.map_err(Error::Io)?;
        stdin.flush().await.map_err(Error::Io)?;
        Ok(())
    }
}

fn thread_params(cwd: &std::path::Path, options: &RuntimeOptions) -> Value {
    let mut params = json!({ "cwd": cwd.to_string_lossy() });
    merge_options(&mut params, options);
    params
}

fn merge_options(params: &mut Value, options: &RuntimeOptions) {
    let Some(obj) = params.as_object_mut() else {
        return;
    };
    if let Some(model) = &options.model {
        obj.insert("model".into(), json!(model));
    }
    if let Some(policy) = &options.approval_policy {
        obj.insert("approvalPolicy".into(), json!(policy));
    }
    if let Some(sandbox) = &options.sandbox_policy {
        obj.insert("sandboxPolicy".into(), json!(sandbox.as_wire()));
    }
    if let Some(network) = options.network_access {
        obj.insert("networkAccess".into(), json!(network));
    }
}

fn thread_id_from(result: &Value) -> Option<String> {
    result
        .get("threadId")
        .or_else(|| result.get("thread_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn fail_pending(pending: &PendingMap, reason: &str) {
    let drained: Vec<_> = pending.lock().drain().collect();
    for (_, tx) in drained {
        let _ = tx.send(Err(Error::ClosedPipe(reason.into())));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reader tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn read_stdout<R>(
    mut stdout: BufReader<R>,
    pending: Arc<PendingMap>,
    notif_tx: mpsc::Sender<NormalizedEvent>,
    req_tx: mpsc::Sender<NormalizedEvent>,
    err_tx: mpsc::Sender<Error>,
    debug: Arc<dyn DebugSink>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let terminal: Error = loop {
        let mut line = String::new();
        match stdout.read_line(&mut line).await {
            Ok(0) => break Error::ClosedPipe("provider stdout closed".into()),
            Ok(_) => {}
            Err(e) => break Error::Io(e),
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        debug.record(DebugStream::Stdout, trimmed);

        let msg: RpcMessage = match serde_json::from_str(trimmed) {
            Ok(msg) => msg,
            Err(e) => break Error::Other(format!("decoding provider message: {e}")),
        };

        match msg.shape() {
            MessageShape::Notification => {
                let event = NormalizedEvent::notification(
                    msg.method.unwrap_or_default(),
                    msg.params.unwrap_or(Value::Null),
                );
                if notif_tx.send(event).await.is_err() {
                    return;
                }
            }
            MessageShape::Request => {
                let event = NormalizedEvent::request(
                    msg.method.unwrap_or_default(),
                    msg.params.unwrap_or(Value::Null),
                    msg.id.unwrap_or_default(),
                );
                if req_tx.send(event).await.is_err() {
                    return;
                }
            }
            MessageShape::Response => {
                let id = msg.id.unwrap_or_default();
                let waiter = pending.lock().remove(&id);
                match waiter {
                    Some(tx) => {
                        let outcome = match msg.error {
                            Some(err) => Err(Error::from_upstream_message(err.message)),
                            None => Ok(msg.result.unwrap_or(Value::Null)),
                        };
                        let _ = tx.send(outcome);
                    }
                    None => {
                        tracing::debug!(id, "response for unknown call id, dropping");
                    }
                }
            }
            MessageShape::Unknown => {
                tracing::debug!(line = %trimmed, "unroutable provider message, dropping");
            }
        }
    };

    tracing::debug!(error = %terminal, "provider stdout reader terminating");
    fail_pending(&pending, "provider stream ended");
    let _ = err_tx.send(terminal).await;
    // Dropping the senders closes all three channels.
}

async fn read_stderr<R>(mut stderr: BufReader<R>, debug: Arc<dyn DebugSink>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match stderr.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {
                let trimmed = line.trim_end();
                if !trimmed.is_empty() {
                    debug.record(DebugStream::Stderr, trimmed);
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
