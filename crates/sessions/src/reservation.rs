//! Turn reservation: at-most-one in-flight turn per live session.
//!
//! The slot holds two flags under one mutex: `active_turn` (a turn the
//! upstream accepted and has not yet terminated) and `starting` (a
//! reservation whose upstream call is still in flight). A new turn may only
//! be reserved when both are clear. A supplied probe can reclaim a zombie
//! reservation left behind by a provider that never delivered a terminal
//! event.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use archon_domain::error::{Error, Result};

/// Upper bound on a single probe round trip.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Answer to "is this turn still active upstream?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    Active,
    Inactive,
    Unknown,
}

/// An RPC against the upstream that checks whether a busy turn is still
/// running. Used to reclaim a leaked reservation.
#[async_trait]
pub trait TurnProbe: Send + Sync {
    async fn probe(&self, thread_id: &str, busy_turn_id: &str) -> ProbeVerdict;
}

#[derive(Default)]
struct SlotState {
    active_turn: String,
    starting: bool,
    last_active: Option<DateTime<Utc>>,
}

/// The single active-turn slot for a live session.
#[derive(Default)]
pub struct TurnSlot {
    state: Mutex<SlotState>,
}

enum Claim {
    Begun,
    Busy(String),
}

impl TurnSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the slot and run `start` to launch the turn upstream.
    ///
    /// When the slot is busy and a probe is supplied, a definite `Inactive`
    /// verdict clears the stale turn and the reservation retries once;
    /// anything else refuses with [`Error::TurnInProgress`].
    pub async fn reserve<F, Fut>(
        &self,
        thread_id: &str,
        probe: Option<&dyn TurnProbe>,
        start: F,
    ) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        match self.try_claim() {
            Claim::Begun => {}
            Claim::Busy(busy_turn) => {
                let reclaimed = match probe {
                    // A reservation whose start call is still in flight has
                    // no turn id to probe for; refuse outright.
                    Some(probe) if !busy_turn.is_empty() => {
                        let verdict =
                            tokio::time::timeout(PROBE_TIMEOUT, probe.probe(thread_id, &busy_turn))
                                .await
                                .unwrap_or(ProbeVerdict::Unknown);
                        verdict == ProbeVerdict::Inactive
                    }
                    _ => false,
                };

                if !reclaimed {
                    return Err(Error::TurnInProgress(busy_turn));
                }

                // Clear the zombie, provided it has not changed underneath
                // the probe, and retry the claim exactly once.
                self.complete(&busy_turn);
                match self.try_claim() {
                    Claim::Begun => {}
                    Claim::Busy(turn) => return Err(Error::TurnInProgress(turn)),
                }
            }
        }

        match start().await {
            Ok(turn_id) => {
                let mut state = self.state.lock();
                state.active_turn = turn_id.clone();
                state.starting = false;
                state.last_active = Some(Utc::now());
                Ok(turn_id)
            }
            Err(e) => {
                self.state.lock().starting = false;
                Err(e)
            }
        }
    }

    fn try_claim(&self) -> Claim {
        let mut state = self.state.lock();
        if state.active_turn.is_empty() && !state.starting {
            state.starting = true;
            Claim::Begun
        } else {
            Claim::Busy(state.active_turn.clone())
        }
    }

    /// Clear the active turn for a terminal event. An empty `event_turn`
    /// matches whatever is active. Returns the cleared turn id when the
    /// slot changed.
    pub fn complete(&self, event_turn: &str) -> Option<String> {
        let mut state = self.state.lock();
        if state.active_turn.is_empty() {
            return None;
        }
        if event_turn.is_empty() || event_turn == state.active_turn {
            state.last_active = Some(Utc::now());
            return Some(std::mem::take(&mut state.active_turn));
        }
        None
    }

    pub fn active_turn(&self) -> Option<String> {
        let state = self.state.lock();
        if state.active_turn.is_empty() {
            None
        } else {
            Some(state.active_turn.clone())
        }
    }

    /// Neither an accepted turn nor an in-flight reservation.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.active_turn.is_empty() && !state.starting
    }

    pub fn touch(&self) {
        self.state.lock().last_active = Some(Utc::now());
    }

    pub fn last_active(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_active
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
