//! CLI and config loading.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use archon_domain::config::Config;

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV: &str = "ARCHON_CONFIG";
/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "archond.toml";

#[derive(Parser)]
#[command(name = "archond", about = "Local control daemon for AI coding-assistant sessions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the daemon (default).
    Serve,
    /// Config inspection helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the configuration and report issues.
    Validate,
}

/// Load the configuration: `$ARCHON_CONFIG` if set, else `./archond.toml`,
/// else defaults. Returns the config plus the path it was read from.
pub fn load_config() -> anyhow::Result<(Config, Option<PathBuf>)> {
    let path = match std::env::var(CONFIG_ENV) {
        Ok(explicit) if !explicit.is_empty() => Some(PathBuf::from(explicit)),
        _ => {
            let default = PathBuf::from(CONFIG_FILE);
            default.exists().then_some(default)
        }
    };

    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let config: Config = toml::from_str(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?;
            Ok((config, Some(path)))
        }
        None => Ok((Config::default(), None)),
    }
}

pub mod config {
    use archon_domain::config::{Config, ConfigSeverity};

    /// Print validation issues; returns whether the config is usable.
    pub fn validate(config: &Config, path: Option<&std::path::Path>) -> bool {
        match path {
            Some(path) => println!("validating {}", path.display()),
            None => println!("validating built-in defaults (no config file found)"),
        }

        let issues = config.validate();
        if issues.is_empty() {
            println!("ok");
            return true;
        }
        for issue in &issues {
            println!("{issue}");
        }
        !issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::parse_from(["archond"]);
        assert!(cli.command.is_none());

        let cli = Cli::parse_from(["archond", "serve"]);
        assert!(matches!(cli.command, Some(Command::Serve)));

        let cli = Cli::parse_from(["archond", "config", "validate"]);
        assert!(matches!(
            cli.command,
            Some(Command::Config(ConfigCommand::Validate))
        ));
    }
}
