//! Stratus CLI - Main entry point.
//!
//! - `cli` - Command-line argument parsing and dispatch
//! - `auth_cmd` - login, logout, whoami, env, identities, validate
//! - `config` - locating and loading the auth configuration

use anyhow::{Result, bail};
use clap::Parser;

use stratus_cli::cli::{Cli, ColorMode, dispatch_command};
use stratus_cli::styled_output::print_error;

/// Check that STRATUS_HOME, when set, is writable.
fn check_stratus_home_writable() -> Result<()> {
    let Ok(home) = std::env::var(stratus_common::dirs::HOME_ENV) else {
        return Ok(());
    };
    let home_path = std::path::Path::new(&home);
    if !home_path.exists() {
        return Ok(());
    }
    let test_file = home_path.join(".write_test");
    match std::fs::File::create(&test_file) {
        Ok(_) => {
            let _ = std::fs::remove_file(&test_file);
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            bail!(
                "Cannot write to STRATUS_HOME: Permission denied\n\n\
                STRATUS_HOME is set to: {home}\n\
                Change its permissions or unset the variable to use the default location."
            );
        }
        Err(_) => {}
    }
    Ok(())
}

fn init_logging(cli: &Cli) {
    let level = cli.effective_log_level().as_filter_str();
    let filter = match std::env::var("RUST_LOG") {
        Ok(rust_log) if !rust_log.trim().is_empty() => rust_log,
        _ => format!(
            "error,stratus_cli={level},stratus_auth={level},stratus_keyring_store={level},stratus_common={level}"
        ),
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // SAFETY: Environment variable mutations happen before any task is spawned
    match cli.color {
        ColorMode::Never => unsafe { std::env::set_var("NO_COLOR", "1") },
        ColorMode::Always => unsafe { std::env::remove_var("NO_COLOR") },
        ColorMode::Auto => {}
    }

    init_logging(&cli);
    check_stratus_home_writable()?;

    if let Err(e) = dispatch_command(cli).await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
    Ok(())
}
