//! Per-session debug streams.
//!
//! Raw provider stdio/SSE traffic is captured three ways: appended to
//! `<baseDir>/<sessionID>/debug.jsonl`, kept in a bounded in-memory ring
//! for snapshots, and fanned out to live followers through a hub. The
//! snapshot-then-subscribe pair is what makes the debug SSE endpoint
//! loss-free despite the hub's bounded buffers.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use archon_domain::events::{DebugEvent, DebugStream};

use crate::hub::{Canceller, EventHub};

/// Buffered events retained per session for snapshots.
const RING_CAPACITY: usize = 512;

struct SessionDebug {
    ring: Mutex<VecDeque<DebugEvent>>,
    hub: EventHub<DebugEvent>,
}

impl SessionDebug {
    fn new() -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            hub: EventHub::new(),
        }
    }
}

/// Registry of per-session debug buffers.
pub struct DebugCenter {
    base_dir: PathBuf,
    sessions: Mutex<HashMap<String, Arc<SessionDebug>>>,
}

impl DebugCenter {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn session(&self, session_id: &str) -> Arc<SessionDebug> {
        self.sessions
            .lock()
            .entry(session_id.to_owned())
            .or_insert_with(|| Arc::new(SessionDebug::new()))
            .clone()
    }

    /// Record one raw chunk: file sink (best effort), ring, live hub.
    pub fn record(&self, session_id: &str, stream: DebugStream, chunk: &str) {
        let event = DebugEvent::new(stream, chunk);
        self.append_file(session_id, &event);

        let session = self.session(session_id);
        {
            let mut ring = session.ring.lock();
            if ring.len() == RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(event.clone());
        }
        session.hub.broadcast(event);
    }

    /// Snapshot of the buffered events, oldest first.
    pub fn snapshot(&self, session_id: &str) -> Vec<DebugEvent> {
        self.session(session_id)
            .ring
            .lock()
            .iter()
            .cloned()
            .collect()
    }

    /// Subscribe to live events for a session.
    pub fn subscribe(
        &self,
        session_id: &str,
    ) -> (mpsc::Receiver<DebugEvent>, Canceller<DebugEvent>) {
        self.session(session_id).hub.add()
    }

    pub fn follower_count(&self, session_id: &str) -> usize {
        self.session(session_id).hub.count()
    }

    /// Close a session's debug stream: current followers end, the ring and
    /// the on-disk file remain readable, and a later bring-up of the same
    /// session starts a fresh follower hub.
    pub fn close_session(&self, session_id: &str) {
        let mut sessions = self.sessions.lock();
        if let Some(old) = sessions.get(session_id).cloned() {
            old.hub.shutdown();
            let ring = old.ring.lock().clone();
            sessions.insert(
                session_id.to_owned(),
                Arc::new(SessionDebug {
                    ring: Mutex::new(ring),
                    hub: EventHub::new(),
                }),
            );
        }
    }

    fn append_file(&self, session_id: &str, event: &DebugEvent) {
        let path = self.base_dir.join(session_id).join("debug.jsonl");
        let write = || -> std::io::Result<()> {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            let line = serde_json::to_string(event).unwrap_or_default();
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
            Ok(())
        };
        if let Err(e) = write() {
            tracing::debug!(session_id, error = %e, "debug sink append failed");
        }
    }
}

/// Adapter binding a transport's debug output to one session's buffers.
pub struct SessionDebugSink {
    center: Arc<DebugCenter>,
    session_id: String,
}

impl SessionDebugSink {
    pub fn new(center: Arc<DebugCenter>, session_id: impl Into<String>) -> Self {
        Self {
            center,
            session_id: session_id.into(),
        }
    }
}

impl archon_transport::DebugSink for SessionDebugSink {
    fn record(&self, stream: DebugStream, chunk: &str) {
        self.center.record(&self.session_id, stream, chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_then_subscribe_sees_both_halves() {
        let dir = tempfile::tempdir().unwrap();
        let center = DebugCenter::new(dir.path());

        center.record("s-1", DebugStream::Stdout, "snap");
        let snapshot = center.snapshot("s-1");
        let (mut rx, _c) = center.subscribe("s-1");
        center.record("s-1", DebugStream::Stdout, "live");

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].chunk, "snap");
        assert_eq!(rx.recv().await.unwrap().chunk, "live");
    }

    #[test]
    fn ring_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let center = DebugCenter::new(dir.path());

        for i in 0..(RING_CAPACITY + 10) {
            center.record("s-1", DebugStream::Stderr, &format!("line-{i}"));
        }

        let snapshot = center.snapshot("s-1");
        assert_eq!(snapshot.len(), RING_CAPACITY);
        assert_eq!(snapshot[0].chunk, "line-10");
    }

    #[test]
    fn events_land_in_the_jsonl_file() {
        let dir = tempfile::tempdir().unwrap();
        let center = DebugCenter::new(dir.path());
        center.record("s-1", DebugStream::Stdout, "hello");

        let raw =
            std::fs::read_to_string(dir.path().join("s-1").join("debug.jsonl")).unwrap();
        assert!(raw.contains("\"hello\""));
        assert!(raw.contains("\"stdout\""));
    }

    #[tokio::test]
    async fn close_session_ends_followers_but_keeps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let center = DebugCenter::new(dir.path());
        center.record("s-1", DebugStream::Stdout, "snap");

        let (mut rx, _c) = center.subscribe("s-1");
        center.close_session("s-1");

        assert!(rx.recv().await.is_none());
        assert_eq!(center.snapshot("s-1").len(), 1);
    }
}
