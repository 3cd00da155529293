//! Evidence freshness tracking.
//!
//! Deduplicates stale assistant outputs across repeated completions of the
//! same conversation head: an idle session whose provider keeps emitting
//! `turn/completed` for the same reply must not republish that text.

use std::collections::HashMap;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

#[derive(Default, Clone)]
struct Evidence {
    key: String,
    output_hash: String,
}

/// Per-session `(lastEvidenceKey, lastOutputHash)` state.
#[derive(Default)]
pub struct FreshnessTracker {
    state: Mutex<HashMap<String, Evidence>>,
}

impl FreshnessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the `(evidence_key, output)` pair for a completion and report
    /// whether it is fresh.
    ///
    /// Fresh when the key differs from the stored one, or — with no key —
    /// when the output differs from the stored output. State always advances
    /// to the latest pair.
    pub fn mark_fresh(&self, session_id: &str, evidence_key: &str, output: &str) -> bool {
        let output_hash = hash_output(output);

        let mut state = self.state.lock();
        let previous = state.get(session_id);
        let fresh = match previous {
            None => true,
            Some(prev) => {
                if evidence_key.is_empty() {
                    prev.output_hash != output_hash
                } else {
                    prev.key != evidence_key
                }
            }
        };

        state.insert(
            session_id.to_owned(),
            Evidence {
                key: evidence_key.to_owned(),
                output_hash,
            },
        );
        fresh
    }

    /// Forget a session's evidence (session killed).
    pub fn forget(&self, session_id: &str) {
        self.state.lock().remove(session_id);
    }
}

fn hash_output(output: &str) -> String {
    let digest = Sha256::digest(output.as_bytes());
    format!("{digest:x}")
}
