//! Daemon configuration model.
//!
//! Loaded from `archond.toml`; every section is optional and falls back to
//! defaults, so a zero-config `archond serve` works out of the box.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Env var holding the API bearer token (read once at startup).
    #[serde(default = "d_api_token_env")]
    pub api_token_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            api_token_env: d_api_token_env(),
        }
    }
}

fn d_host() -> String {
    "127.0.0.1".into()
}

fn d_port() -> u16 {
    7700
}

fn d_api_token_env() -> String {
    "ARCHON_API_TOKEN".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root for session state: `<state_path>/<sessionID>/items.jsonl`,
    /// `sessions.json`, `session_meta.json`, `approvals.json`, workspaces.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
        }
    }
}

fn d_state_path() -> PathBuf {
    PathBuf::from("./data")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub codex: CodexConfig,
    #[serde(default)]
    pub opencode: OpencodeConfig,
}

/// Codex app-server: a subprocess speaking line-delimited JSON-RPC on stdio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodexConfig {
    #[serde(default = "d_codex_command")]
    pub command: String,
    #[serde(default = "d_codex_args")]
    pub args: Vec<String>,
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            command: d_codex_command(),
            args: d_codex_args(),
        }
    }
}

fn d_codex_command() -> String {
    "codex".into()
}

fn d_codex_args() -> Vec<String> {
    vec!["app-server".into()]
}

/// Opencode server: HTTP API with an SSE event stream.
///
/// `base_url` / `token` can be set directly or via the named env vars
/// (`OPENCODE_BASE_URL`, `OPENCODE_TOKEN`); env wins when both are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpencodeConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "d_opencode_base_url_env")]
    pub base_url_env: String,
    #[serde(default = "d_opencode_token_env")]
    pub token_env: String,
    #[serde(default = "d_opencode_timeout")]
    pub timeout_secs: u64,
}

impl Default for OpencodeConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            base_url_env: d_opencode_base_url_env(),
            token_env: d_opencode_token_env(),
            timeout_secs: d_opencode_timeout(),
        }
    }
}

impl OpencodeConfig {
    /// Effective base URL: env var first, then the config value.
    pub fn resolved_base_url(&self) -> Option<String> {
        std::env::var(&self.base_url_env)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| self.base_url.clone())
    }

    /// Effective credential: env var first, then the config value.
    pub fn resolved_token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| self.token.clone())
    }
}

fn d_opencode_base_url_env() -> String {
    "OPENCODE_BASE_URL".into()
}

fn d_opencode_token_env() -> String {
    "OPENCODE_TOKEN".into()
}

fn d_opencode_timeout() -> u64 {
    60
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Notifications
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifyConfig {
    /// Optional webhook that receives turn-completed / approval-required
    /// notifications as JSON POSTs.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.providers.codex.command.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "providers.codex.command".into(),
                message: "command must not be empty".into(),
            });
        }

        if let Some(url) = &self.providers.opencode.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "providers.opencode.base_url".into(),
                    message: format!(
                        "base_url must start with http:// or https:// (got \"{url}\")"
                    ),
                });
            }
        } else if std::env::var(&self.providers.opencode.base_url_env).is_err() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "providers.opencode.base_url".into(),
                message: format!(
                    "no opencode base URL configured — set it or export {}",
                    self.providers.opencode.base_url_env
                ),
            });
        }

        if let Some(url) = &self.notify.webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "notify.webhook_url".into(),
                    message: "webhook_url must start with http:// or https://".into(),
                });
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        let errors: Vec<_> = config
            .validate()
            .into_iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn parses_minimal_toml() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9900

            [providers.opencode]
            base_url = "http://localhost:4096"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9900);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(
            config.providers.opencode.base_url.as_deref(),
            Some("http://localhost:4096")
        );
        assert_eq!(config.providers.codex.command, "codex");
    }

    #[test]
    fn rejects_zero_port() {
        let config: Config = toml::from_str("[server]\nport = 0\n").unwrap();
        assert!(config
            .validate()
            .iter()
            .any(|e| e.severity == ConfigSeverity::Error && e.field == "server.port"));
    }

    #[test]
    fn rejects_bad_opencode_url() {
        let config: Config =
            toml::from_str("[providers.opencode]\nbase_url = \"localhost:4096\"\n").unwrap();
        assert!(config
            .validate()
            .iter()
            .any(|e| e.field == "providers.opencode.base_url"
                && e.severity == ConfigSeverity::Error));
    }
}
