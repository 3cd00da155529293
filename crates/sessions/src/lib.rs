//! The Live Session Engine.
//!
//! Per-session runtime objects that reserve and track the single in-flight
//! turn, pump an upstream transport's event streams, fan events out to
//! bounded subscribers, mediate approvals, and reconcile persisted artifacts
//! with remote history after each turn. One live session exists per active
//! `(sessionID, provider)` pair; the [`manager::SessionManager`] is the
//! process-wide registry with lazy bring-up and teardown.

pub mod approvals;
pub mod debug;
pub mod freshness;
pub mod hub;
pub mod items;
pub mod live;
pub mod manager;
pub mod meta;
pub mod notifier;
pub mod reservation;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use approvals::{Approval, ApprovalStore};
pub use debug::DebugCenter;
pub use freshness::FreshnessTracker;
pub use hub::{Canceller, EventHub};
pub use items::ItemLog;
pub use live::{ApprovalCapableSession, LiveSession, ManagedSession, TurnCapableSession};
pub use manager::SessionManager;
pub use meta::{SessionMeta, SessionMetaStore};
pub use notifier::{CompletionNotifier, DomainNotification, NotificationPublisher};
pub use reservation::{ProbeVerdict, TurnProbe, TurnSlot};
pub use store::{Session, SessionStatus, SessionStore};
