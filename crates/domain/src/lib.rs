//! Shared domain types for the Archon daemon.
//!
//! Everything here is provider-agnostic: the workspace-wide error type,
//! provider identity and turn-id minting, runtime option handling with
//! sandbox-policy translation, event value types carried on subscriber
//! channels, structured trace events, and the configuration model.

pub mod config;
pub mod error;
pub mod events;
pub mod policy;
pub mod provider;
pub mod trace;

pub use error::{Error, Result};
pub use events::{DebugEvent, DebugStream, SessionEvent};
pub use policy::{RuntimeOptions, SandboxPolicy};
pub use provider::{new_turn_id, normalize_provider};
