//! Runtime options and sandbox-policy translation.
//!
//! Upstream providers disagree on policy vocabulary: the wire protocol wants
//! camelCase (`workspaceWrite`) while the environment and config use the
//! hyphenated form (`workspace-write`). Translation is total — unknown
//! values pass through unchanged — and bidirectional.

use serde::{Deserialize, Serialize};

/// Environment variable carrying the approval policy override.
pub const ENV_APPROVAL_POLICY: &str = "ARCHON_CODEX_APPROVAL_POLICY";
/// Environment variable carrying the sandbox policy override.
pub const ENV_SANDBOX_POLICY: &str = "ARCHON_CODEX_SANDBOX_POLICY";
/// Environment variable toggling network access inside the sandbox.
pub const ENV_NETWORK_ACCESS: &str = "ARCHON_CODEX_NETWORK_ACCESS";

/// Per-session runtime options, merged incoming-over-existing with `None`
/// preserving the current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_policy: Option<SandboxPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_access: Option<bool>,
}

impl RuntimeOptions {
    /// Merge `incoming` over `self`: set fields win, `None` preserves.
    pub fn merged_with(&self, incoming: &RuntimeOptions) -> RuntimeOptions {
        RuntimeOptions {
            model: incoming.model.clone().or_else(|| self.model.clone()),
            access: incoming.access.clone().or_else(|| self.access.clone()),
            approval_policy: incoming
                .approval_policy
                .clone()
                .or_else(|| self.approval_policy.clone()),
            sandbox_policy: incoming
                .sandbox_policy
                .clone()
                .or_else(|| self.sandbox_policy.clone()),
            network_access: incoming.network_access.or(self.network_access),
        }
    }

    /// Read policy overrides from the environment. Unset variables leave the
    /// corresponding field `None`.
    pub fn from_env() -> RuntimeOptions {
        let sandbox_policy = std::env::var(ENV_SANDBOX_POLICY)
            .ok()
            .filter(|v| !v.is_empty())
            .map(|v| SandboxPolicy::parse(&v));
        let network_access = std::env::var(ENV_NETWORK_ACCESS)
            .ok()
            .and_then(|v| match v.to_lowercase().as_str() {
                "1" | "true" | "yes" => Some(true),
                "0" | "false" | "no" => Some(false),
                _ => None,
            });
        RuntimeOptions {
            model: None,
            access: None,
            approval_policy: std::env::var(ENV_APPROVAL_POLICY)
                .ok()
                .filter(|v| !v.is_empty()),
            sandbox_policy,
            network_access,
        }
    }
}

/// Sandbox policy in its hyphenated (config/env) vocabulary.
///
/// `Other` carries unrecognized values through untouched so a newer upstream
/// vocabulary never breaks older daemons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SandboxPolicy {
    WorkspaceWrite,
    ReadOnly,
    DangerFullAccess,
    ExternalSandbox,
    Other(String),
}

impl SandboxPolicy {
    /// Parse either vocabulary (hyphenated or camelCase).
    pub fn parse(value: &str) -> SandboxPolicy {
        match value {
            "workspace-write" | "workspaceWrite" => SandboxPolicy::WorkspaceWrite,
            "read-only" | "readOnly" => SandboxPolicy::ReadOnly,
            "danger-full-access" | "dangerFullAccess" => SandboxPolicy::DangerFullAccess,
            "external-sandbox" | "externalSandbox" => SandboxPolicy::ExternalSandbox,
            other => SandboxPolicy::Other(other.to_string()),
        }
    }

    /// Hyphenated form used in config and environment.
    pub fn as_hyphenated(&self) -> &str {
        match self {
            SandboxPolicy::WorkspaceWrite => "workspace-write",
            SandboxPolicy::ReadOnly => "read-only",
            SandboxPolicy::DangerFullAccess => "danger-full-access",
            SandboxPolicy::ExternalSandbox => "external-sandbox",
            SandboxPolicy::Other(v) => v,
        }
    }

    /// camelCase form sent at the turn/thread boundary.
    pub fn as_wire(&self) -> &str {
        match self {
            SandboxPolicy::WorkspaceWrite => "workspaceWrite",
            SandboxPolicy::ReadOnly => "readOnly",
            SandboxPolicy::DangerFullAccess => "dangerFullAccess",
            SandboxPolicy::ExternalSandbox => "externalSandbox",
            SandboxPolicy::Other(v) => v,
        }
    }
}

impl From<String> for SandboxPolicy {
    fn from(value: String) -> Self {
        SandboxPolicy::parse(&value)
    }
}

impl From<SandboxPolicy> for String {
    fn from(value: SandboxPolicy) -> Self {
        value.as_hyphenated().to_string()
    }
}
