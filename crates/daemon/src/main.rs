use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sha2::{Digest, Sha256};
use tracing_subscriber::EnvFilter;

use archon_daemon::api;
use archon_daemon::cli::{Cli, Command, ConfigCommand};
use archon_daemon::notify::WebhookPublisher;
use archon_daemon::service::SessionService;
use archon_daemon::state::{AppState, ShutdownHook};
use archon_daemon::stores::{open_group_store, open_workspace_store, open_worktree_store};
use archon_domain::config::{Config, ConfigSeverity};
use archon_sessions::live::EngineDeps;
use archon_sessions::manager::CodexLaunch;
use archon_sessions::notifier::CompletionNotifier;
use archon_sessions::{
    ApprovalStore, DebugCenter, FreshnessTracker, ItemLog, SessionManager, SessionMetaStore,
    SessionStore,
};
use archon_transport::http::{Credentials, OpencodeClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = archon_daemon::cli::load_config()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = archon_daemon::cli::load_config()?;
            let valid =
                archon_daemon::cli::config::validate(&config, config_path.as_deref());
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Version) => {
            println!("archond {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,archon_daemon=debug")),
        )
        .json()
        .init();
}

/// Start the daemon with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("archond starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let state_path = &config.storage.state_path;

    // ── Engine stores ────────────────────────────────────────────────
    let sessions =
        Arc::new(SessionStore::new(state_path).context("initializing session store")?);
    let meta =
        Arc::new(SessionMetaStore::new(state_path).context("initializing session-meta store")?);
    let approvals =
        Arc::new(ApprovalStore::new(state_path).context("initializing approval store")?);
    let items = Arc::new(ItemLog::new(state_path));
    let debug = Arc::new(DebugCenter::new(state_path));
    tracing::info!(path = %state_path.display(), "session state stores ready");

    // ── Notifier ─────────────────────────────────────────────────────
    let publisher = Arc::new(WebhookPublisher::new(config.notify.webhook_url.clone()));
    let notifier = Arc::new(CompletionNotifier::new(publisher));
    if config.notify.webhook_url.is_some() {
        tracing::info!("notification webhook enabled");
    }

    // ── Opencode transport ───────────────────────────────────────────
    let opencode = config.providers.opencode.resolved_base_url().map(|url| {
        let credentials = match config.providers.opencode.resolved_token() {
            Some(token) => Credentials::Bearer(token),
            None => Credentials::None,
        };
        tracing::info!(base_url = %url, "opencode transport ready");
        Arc::new(OpencodeClient::new(
            url,
            credentials,
            Duration::from_secs(config.providers.opencode.timeout_secs),
        ))
    });
    if opencode.is_none() {
        tracing::warn!(
            "no opencode base URL configured — opencode sessions will be unavailable"
        );
    }

    // ── Session manager ──────────────────────────────────────────────
    let deps = EngineDeps {
        sessions: sessions.clone(),
        meta: meta.clone(),
        approvals: approvals.clone(),
        items: items.clone(),
        notifier,
        freshness: Arc::new(FreshnessTracker::new()),
        debug: debug.clone(),
    };
    let manager = Arc::new(SessionManager::new(
        deps,
        CodexLaunch {
            command: config.providers.codex.command.clone(),
            args: config.providers.codex.args.clone(),
        },
        opencode,
    ));
    tracing::info!(
        codex_command = %config.providers.codex.command,
        "session manager ready"
    );

    // ── Workspace stores + service facade ────────────────────────────
    let workspaces =
        Arc::new(open_workspace_store(state_path).context("initializing workspace store")?);
    let worktrees =
        Arc::new(open_worktree_store(state_path).context("initializing worktree store")?);
    let groups =
        Arc::new(open_group_store(state_path).context("initializing workspace-group store")?);
    let service = Arc::new(SessionService::new(
        manager.clone(),
        workspaces.clone(),
        worktrees.clone(),
    ));
    tracing::info!("session service ready");

    // ── API token (read once, hash for constant-time comparison) ─────
    let api_token_hash = {
        let env_var = &config.server.api_token_env;
        match std::env::var(env_var) {
            Ok(token) if !token.is_empty() => {
                tracing::info!(env_var = %env_var, "API bearer-token auth enabled");
                Some(Sha256::digest(token.as_bytes()).to_vec())
            }
            _ => {
                tracing::warn!(
                    env_var = %env_var,
                    "API bearer-token auth DISABLED — set {env_var} to enable"
                );
                None
            }
        }
    };

    // ── Shutdown plumbing ────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let shutdown = Arc::new(ShutdownHook::new(Box::new(move || {
        let _ = shutdown_tx.send(());
    })));

    let state = AppState {
        config: config.clone(),
        service,
        manager,
        debug,
        items,
        approvals: approvals.clone(),
        workspaces: workspaces.clone(),
        worktrees: worktrees.clone(),
        groups: groups.clone(),
        api_token_hash,
        shutdown,
    };

    // ── Periodic store flush ─────────────────────────────────────────
    {
        let sessions = sessions.clone();
        let meta = meta.clone();
        let approvals = approvals.clone();
        let workspaces = workspaces.clone();
        let worktrees = worktrees.clone();
        let groups = groups.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                for (name, result) in [
                    ("sessions", sessions.flush()),
                    ("session_meta", meta.flush()),
                    ("approvals", approvals.flush()),
                    ("workspaces", workspaces.flush()),
                    ("worktrees", worktrees.flush()),
                    ("workspace_groups", groups.flush()),
                ] {
                    if let Err(e) = result {
                        tracing::warn!(store = name, error = %e, "store flush failed");
                    }
                }
            }
        });
    }

    // ── Concurrency limit (backpressure protection) ──────────────────
    let max_concurrent = std::env::var("ARCHON_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    tracing::info!(max_concurrent, "concurrency limit set");

    // ── Router + bind ────────────────────────────────────────────────
    let app = api::router(state.clone())
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "archond listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_rx => tracing::info!("shutdown requested via API"),
                _ = tokio::signal::ctrl_c() => tracing::info!("shutdown requested via signal"),
            }
        })
        .await
        .context("axum server error")?;

    // Final persistence pass before exit.
    for (name, result) in [
        ("sessions", sessions.flush()),
        ("session_meta", meta.flush()),
        ("approvals", approvals.flush()),
        ("workspaces", workspaces.flush()),
        ("worktrees", worktrees.flush()),
        ("workspace_groups", groups.flush()),
    ] {
        if let Err(e) = result {
            tracing::warn!(store = name, error = %e, "final store flush failed");
        }
    }

    tracing::info!("archond stopped");
    Ok(())
}
