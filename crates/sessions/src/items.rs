//! Append-only turn artifact log.
//!
//! Each session gets `<baseDir>/<sessionID>/items.jsonl`, one JSON object
//! per line. Every line is prepared before it hits the disk: stamped with a
//! monotonic timestamp and, for items that lack one, a synthesized `id`.
//! Readers tail the last N lines.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};

use archon_domain::error::{Error, Result};
use archon_domain::trace::TraceEvent;

/// Default tail depth used by the reconciler.
pub const DEFAULT_TAIL: usize = 200;

/// Writes and tails per-session `items.jsonl` files.
pub struct ItemLog {
    base_dir: PathBuf,
    /// Last stamped timestamp in nanoseconds; appends never reuse or
    /// regress it even if the wall clock does.
    last_stamp_nanos: Mutex<i64>,
}

impl ItemLog {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            last_stamp_nanos: Mutex::new(0),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(session_id).join("items.jsonl")
    }

    /// Append prepared items to a session's log. Returns how many lines
    /// were written.
    pub fn append(&self, session_id: &str, items: &[Value]) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }

        let path = self.path_for(session_id);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(Error::Io)?;
        }

        let mut buf = String::new();
        for item in items {
            let prepared = self.prepare(item.clone());
            buf.push_str(&serde_json::to_string(&prepared)?);
            buf.push('\n');
        }

        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(Error::Io)?;
        file.write_all(buf.as_bytes()).map_err(Error::Io)?;
        file.sync_data().map_err(Error::Io)?;

        TraceEvent::ItemsAppended {
            session_id: session_id.to_owned(),
            lines: items.len(),
        }
        .emit();

        Ok(items.len())
    }

    /// Convenience: persist the user side of a turn before the upstream
    /// call, so reconnecting clients see it even if the transport fails
    /// mid-request.
    pub fn append_user_message(&self, session_id: &str, turn_id: &str, text: &str) -> Result<()> {
        self.append(
            session_id,
            &[json!({
                "type": "message",
                "role": "user",
                "text": text,
                "turnId": turn_id,
            })],
        )?;
        Ok(())
    }

    /// Read the last `n` parseable lines of a session's log. Missing files
    /// read as empty; malformed lines are skipped with a warning.
    pub fn tail(&self, session_id: &str, n: usize) -> Result<Vec<Value>> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        let mut items = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(item) => items.push(item),
                Err(e) => {
                    tracing::warn!(
                        session_id = session_id,
                        error = %e,
                        "skipping malformed items line"
                    );
                }
            }
        }

        if items.len() > n {
            items.drain(..items.len() - n);
        }
        Ok(items)
    }

    /// Stamp `ts` (strictly increasing) and synthesize an `id` when absent.
    fn prepare(&self, mut item: Value) -> Value {
        let stamp = {
            let mut last = self.last_stamp_nanos.lock();
            let now = Utc::now()
                .timestamp_nanos_opt()
                .unwrap_or(*last);
            *last = now.max(*last + 1);
            *last
        };
        let ts = Utc
            .timestamp_nanos(stamp)
            .to_rfc3339_opts(SecondsFormat::Nanos, true);

        if let Some(obj) = item.as_object_mut() {
            obj.insert("ts".into(), json!(ts));
            let has_id = obj
                .get("id")
                .and_then(Value::as_str)
                .map(|s| !s.is_empty())
                .unwrap_or(false);
            if !has_id {
                obj.insert(
                    "id".into(),
                    json!(format!("item-{}", uuid::Uuid::new_v4().simple())),
                );
            }
            item
        } else {
            // Non-object lines are wrapped so every record carries a stamp.
            json!({
                "id": format!("item-{}", uuid::Uuid::new_v4().simple()),
                "ts": ts,
                "value": item,
            })
        }
    }
}

/// Ids of all items in a tail, for membership checks during reconciliation.
pub fn item_ids(items: &[Value]) -> std::collections::HashSet<String> {
    items
        .iter()
        .filter_map(|i| i.get("id").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

/// Text of the newest assistant item, if any.
pub fn latest_assistant_text(items: &[Value]) -> Option<String> {
    items
        .iter()
        .rev()
        .find(|i| i.get("role").and_then(Value::as_str) == Some("assistant"))
        .and_then(|i| i.get("text").and_then(Value::as_str))
        .map(str::to_string)
}

/// Whether any assistant item with non-empty text is present.
pub fn has_assistant_text(items: &[Value]) -> bool {
    items.iter().any(|i| {
        i.get("role").and_then(Value::as_str) == Some("assistant")
            && i.get("text")
                .and_then(Value::as_str)
                .map(|t| !t.is_empty())
                .unwrap_or(false)
    })
}

/// Count of assistant items.
pub fn assistant_count(items: &[Value]) -> usize {
    items
        .iter()
        .filter(|i| i.get("role").and_then(Value::as_str) == Some("assistant"))
        .count()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
