//! Provider identity and turn-id minting.
//!
//! Session turns are identified by `"<provider>-turn-<opaque>"` where the
//! provider segment is normalized (lowercased, never empty) and the opaque
//! suffix is a 32-char random hex string.

/// Known provider names. Free-form names are accepted everywhere; these
/// constants exist so call sites don't scatter string literals.
pub const PROVIDER_CODEX: &str = "codex";
pub const PROVIDER_OPENCODE: &str = "opencode";
pub const PROVIDER_EXEC: &str = "exec";

/// Normalize a provider name for use in identifiers: lowercase, with the
/// empty string mapped to `"provider"`.
pub fn normalize_provider(provider: &str) -> String {
    let trimmed = provider.trim();
    if trimmed.is_empty() {
        return "provider".to_string();
    }
    trimmed.to_lowercase()
}

/// Mint a fresh turn id for the given provider.
pub fn new_turn_id(provider: &str) -> String {
    format!(
        "{}-turn-{}",
        normalize_provider(provider),
        uuid::Uuid::new_v4().simple()
    )
}
