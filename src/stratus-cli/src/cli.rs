//! CLI argument structures and dispatch.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use stratus_keyring_store::BackendKind;

use crate::auth_cmd;

/// Log verbosity level for CLI output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    /// Default: warnings such as a keyring fallback stay visible
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Parse from string (case-insensitive).
    pub fn from_str_loose(s: &str) -> Option<LogLevel> {
        match s.trim().to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

/// Color output mode for CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    #[default]
    Auto,
    Always,
    Never,
}

/// Stratus - identity chains and credentials for infrastructure tooling
#[derive(Debug, Parser)]
#[command(name = "stratus", version, about, long_about = None)]
pub struct Cli {
    /// Auth configuration file
    #[arg(long, global = true, env = "STRATUS_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Identity to act on
    #[arg(long, short = 'i', global = true, env = "STRATUS_IDENTITY")]
    pub identity: Option<String>,

    /// Credential store backend: system, file or memory
    #[arg(long, global = true, value_name = "BACKEND", value_parser = parse_backend)]
    pub keyring: Option<BackendKind>,

    /// Enable verbose output (same as --log-level debug)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Enable trace-level logging
    #[arg(long, global = true)]
    pub trace: bool,

    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Warn)]
    pub log_level: LogLevel,

    #[arg(long, global = true, value_enum, default_value_t = ColorMode::Auto)]
    pub color: ColorMode,

    #[command(subcommand)]
    pub command: Commands,
}

fn parse_backend(raw: &str) -> std::result::Result<BackendKind, String> {
    raw.parse().map_err(|e: stratus_keyring_store::StoreError| e.to_string())
}

impl Cli {
    /// Effective log level: `--trace`, then `--verbose`, then
    /// `STRATUS_LOG_LEVEL`, then `--log-level`.
    pub fn effective_log_level(&self) -> LogLevel {
        if self.trace {
            LogLevel::Trace
        } else if self.verbose {
            LogLevel::Debug
        } else if let Ok(env_level) = std::env::var("STRATUS_LOG_LEVEL") {
            LogLevel::from_str_loose(&env_level).unwrap_or(self.log_level)
        } else {
            self.log_level
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Authenticate an identity (or a provider) and materialize its credentials
    Login(LoginArgs),
    /// Clear session credentials and generated files
    Logout(LogoutArgs),
    /// Show the active credential for an identity
    Whoami(WhoamiArgs),
    /// Print or inject environment variables for an identity
    Env(EnvArgs),
    /// List configured identities and their chains
    Identities,
    /// Check the configuration for errors
    Validate,
}

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Authenticate this provider on its own instead of an identity
    #[arg(long)]
    pub provider: Option<String>,
}

#[derive(Debug, Args)]
pub struct LogoutArgs {
    /// Identity or provider to log out; defaults to the selected identity
    pub name: Option<String>,

    /// Log out every provider and identity
    #[arg(long, conflicts_with = "name")]
    pub all: bool,

    /// Also delete long-lived stored credentials
    #[arg(long)]
    pub delete: bool,

    /// Skip the deletion confirmation
    #[arg(long, short = 'f', alias = "yes", requires = "delete")]
    pub force: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum WhoamiFormat {
    #[default]
    Human,
    Json,
}

#[derive(Debug, Args)]
pub struct WhoamiArgs {
    #[arg(long, value_enum, default_value_t = WhoamiFormat::Human)]
    pub format: WhoamiFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum EnvFormat {
    #[default]
    Shell,
    Dotenv,
    Json,
}

#[derive(Debug, Args)]
pub struct EnvArgs {
    #[arg(long, value_enum, default_value_t = EnvFormat::Shell)]
    pub format: EnvFormat,

    /// Run this command with the environment applied instead of printing it
    #[arg(last = true, value_name = "COMMAND")]
    pub exec: Vec<String>,
}

/// Dispatch a parsed command line.
pub async fn dispatch_command(cli: Cli) -> Result<()> {
    let ctx = auth_cmd::CommandContext::from_cli(&cli);
    match cli.command {
        Commands::Login(args) => auth_cmd::run_login(&ctx, args).await,
        Commands::Logout(args) => auth_cmd::run_logout(&ctx, args).await,
        Commands::Whoami(args) => auth_cmd::run_whoami(&ctx, args).await,
        Commands::Env(args) => auth_cmd::run_env(&ctx, args).await,
        Commands::Identities => auth_cmd::run_identities(&ctx),
        Commands::Validate => auth_cmd::run_validate(&ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_logout_flags() {
        let cli = Cli::try_parse_from(["stratus", "logout", "prod", "--delete", "--yes"]).unwrap();
        match cli.command {
            Commands::Logout(args) => {
                assert_eq!(args.name.as_deref(), Some("prod"));
                assert!(args.delete);
                assert!(args.force);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_force_requires_delete() {
        assert!(Cli::try_parse_from(["stratus", "logout", "--force"]).is_err());
    }

    #[test]
    fn test_env_exec_and_globals() {
        let cli = Cli::try_parse_from([
            "stratus", "env", "-i", "dev", "--keyring", "file", "--", "terraform", "plan",
        ])
        .unwrap();
        assert_eq!(cli.identity.as_deref(), Some("dev"));
        assert_eq!(cli.keyring, Some(BackendKind::File));
        match cli.command {
            Commands::Env(args) => assert_eq!(args.exec, vec!["terraform", "plan"]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_bad_keyring_rejected() {
        assert!(Cli::try_parse_from(["stratus", "--keyring", "vault", "whoami"]).is_err());
    }

    #[test]
    fn test_log_level_precedence() {
        let cli = Cli::try_parse_from(["stratus", "--trace", "-v", "validate"]).unwrap();
        assert_eq!(cli.effective_log_level(), LogLevel::Trace);
        let cli = Cli::try_parse_from(["stratus", "-v", "--log-level", "error", "validate"]).unwrap();
        assert_eq!(cli.effective_log_level(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str_loose("WARNING"), Some(LogLevel::Warn));
    }
}
