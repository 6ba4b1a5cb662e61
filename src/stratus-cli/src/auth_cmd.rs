//! Auth command handlers: login, logout, whoami, env, identities, validate.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use stratus_auth::{
    AuthConfig, AuthManager, AuthOptions, LogoutOptions, LogoutReport, WhoamiInfo, default_prompter,
    resolve_chain,
};
use stratus_keyring_store::{BackendKind, MemoryCredentialStore, PasswordPrompt, open_store};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cli::{EnvArgs, EnvFormat, LoginArgs, LogoutArgs, WhoamiArgs, WhoamiFormat};
use crate::config::load_auth_config;
use crate::styled_output::{print_dim, print_field, print_info, print_success, print_warning};

/// Global options shared by every auth command.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config_path: Option<PathBuf>,
    pub identity: Option<String>,
    pub keyring: Option<BackendKind>,
    pub cancel: CancellationToken,
}

impl CommandContext {
    pub fn from_cli(cli: &crate::cli::Cli) -> Self {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Interrupted, cancelling");
                on_interrupt.cancel();
            }
        });
        Self {
            config_path: cli.config.clone(),
            identity: cli.identity.clone().filter(|i| !i.trim().is_empty()),
            keyring: cli.keyring,
            cancel,
        }
    }

    fn options(&self) -> AuthOptions {
        AuthOptions::default().with_cancel(self.cancel.clone())
    }

    fn load_config(&self) -> Result<AuthConfig> {
        load_auth_config(self.config_path.as_deref())
    }

    /// Manager backed by the selected credential store.
    fn manager(&self) -> Result<AuthManager> {
        let config = self.load_config()?;
        let prompter = default_prompter();

        let password_prompter = prompter.clone();
        let ask_password = move |message: &str| {
            password_prompter
                .password(message)
                .map_err(|e| e.to_string())
        };
        let prompt: &PasswordPrompt = &ask_password;
        let store = open_store(&config.keyring, self.keyring, Some(prompt))
            .context("failed to open the credential store")?;

        Ok(AuthManager::builder(config, store).prompter(prompter).build()?)
    }

    /// Identity named on the command line or picked by the default rules.
    async fn identity(&self, manager: &AuthManager, explicit: Option<&str>) -> Result<String> {
        let explicit = explicit.or(self.identity.as_deref());
        Ok(manager.default_identity(explicit, &self.options()).await?)
    }
}

pub async fn run_login(ctx: &CommandContext, args: LoginArgs) -> Result<()> {
    let manager = ctx.manager()?;
    let session = match args.provider {
        Some(provider) => manager.authenticate_provider(&provider, ctx.options()).await?,
        None => {
            let identity = ctx.identity(&manager, None).await?;
            manager.authenticate_with(&identity, ctx.options()).await?
        }
    };

    if session.from_cache() {
        print_success(&format!("Already authenticated as `{}`", session.identity));
    } else {
        print_success(&format!("Authenticated as `{}`", session.identity));
    }
    print_dim(&format!("Chain: {}", session.chain));
    if let Some(expiration) = session.credential.expiration() {
        print_dim(&format!("Expires: {}", format_expiration(Some(expiration), Utc::now())));
    }
    for failure in &session.materialization.failures {
        print_warning(&format!("Could not {:?}: {}", failure.action, failure.message).to_lowercase());
    }
    Ok(())
}

pub async fn run_logout(ctx: &CommandContext, args: LogoutArgs) -> Result<()> {
    let manager = ctx.manager()?;
    let options = LogoutOptions {
        delete_stored: args.delete,
        skip_confirmation: args.force,
    };

    let report = if args.all {
        manager.logout_all(options, &ctx.cancel).await?
    } else {
        let target = match args.name.or_else(|| ctx.identity.clone()) {
            Some(name) => name,
            None => ctx.identity(&manager, None).await?,
        };
        manager.logout(&target, options, &ctx.cancel).await?
    };

    print_logout_report(&report);
    if !report.errors.is_empty() {
        bail!("logout finished with {} error(s)", report.errors.len());
    }
    Ok(())
}

fn print_logout_report(report: &LogoutReport) {
    if report.removed_credentials.is_empty() && report.removed_files.is_empty() {
        print_info("Nothing to log out");
    } else {
        print_success(&format!(
            "Logged out: removed {} credential(s) and {} file(s)",
            report.removed_credentials.len(),
            report.removed_files.len()
        ));
    }
    for alias in &report.removed_credentials {
        print_dim(&format!("removed {alias}"));
    }
    if !report.kept.is_empty() {
        print_info(&format!(
            "Kept long-lived credentials: {} (use --delete to remove them)",
            report.kept.join(", ")
        ));
    }
    for error in &report.errors {
        print_warning(error);
    }
}

pub async fn run_whoami(ctx: &CommandContext, args: WhoamiArgs) -> Result<()> {
    let manager = ctx.manager()?;
    let identity = ctx.identity(&manager, None).await?;
    let info = manager.whoami(&identity, ctx.cancel.clone()).await?;

    match args.format {
        WhoamiFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
        WhoamiFormat::Human => print_whoami(&info),
    }
    Ok(())
}

fn print_whoami(info: &WhoamiInfo) {
    print_field("Identity", &info.identity);
    print_field("Provider", &info.provider);
    print_field("Chain", &info.chain.join(" -> "));
    if let Some(principal) = &info.principal {
        print_field("Principal", principal);
    }
    if let Some(account) = &info.account {
        print_field("Account", account);
    }
    if let Some(region) = &info.region {
        print_field("Region", region);
    }
    print_field("Credential", &info.kind.to_string());
    print_field("Expires", &format_expiration(info.expiration, Utc::now()));
}

pub async fn run_env(ctx: &CommandContext, args: EnvArgs) -> Result<()> {
    let manager = ctx.manager()?;
    let identity = ctx.identity(&manager, None).await?;
    let session = manager.authenticate_with(&identity, ctx.options()).await?;

    if args.exec.is_empty() {
        print!("{}", format_env(&session.environment, args.format)?);
        return Ok(());
    }

    let base: Vec<String> = std::env::vars().map(|(k, v)| format!("{k}={v}")).collect();
    let env = manager.prepare_shell_environment(&identity, &base).await?;
    let (program, rest) = args
        .exec
        .split_first()
        .context("no command given to run")?;
    debug!(program, identity = %identity, "Running command with identity environment");

    let status = tokio::process::Command::new(program)
        .args(rest)
        .env_clear()
        .envs(env.iter().filter_map(|entry| entry.split_once('=')))
        .status()
        .await
        .with_context(|| format!("failed to run `{program}`"))?;
    std::process::exit(status.code().unwrap_or(1));
}

pub fn run_identities(ctx: &CommandContext) -> Result<()> {
    let config = ctx.load_config()?;
    if config.identities.is_empty() {
        print_info("No identities configured");
        return Ok(());
    }
    let selected = config.defaults.identity.as_deref();
    for (name, identity) in &config.identities {
        let marker = if Some(name.as_str()) == selected {
            "*"
        } else if identity.default {
            "+"
        } else {
            " "
        };
        let chain = match resolve_chain(&config, name) {
            Ok(chain) => chain.to_string(),
            Err(e) => format!("<{e}>"),
        };
        println!("{marker} {name:<24} {:<16} {chain}", identity.kind);
    }
    Ok(())
}

pub fn run_validate(ctx: &CommandContext) -> Result<()> {
    let config = ctx.load_config()?;
    let manager = AuthManager::builder(config, Arc::new(MemoryCredentialStore::new()))
        .build()
        .context("configuration is invalid")?;

    let problems = manager.validate();
    if problems.is_empty() {
        print_success(&format!(
            "Configuration is valid ({} provider(s), {} identity(ies))",
            manager.list_providers().len(),
            manager.list_identities().len()
        ));
        return Ok(());
    }
    for (name, problem) in &problems {
        print_warning(&format!("{name}: {problem}"));
    }
    bail!("found {} configuration problem(s)", problems.len())
}

/// Quote `value` for POSIX shells.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

pub fn format_env(env: &BTreeMap<String, String>, format: EnvFormat) -> Result<String> {
    Ok(match format {
        EnvFormat::Json => format!("{}\n", serde_json::to_string_pretty(env)?),
        EnvFormat::Shell => env
            .iter()
            .map(|(k, v)| format!("export {k}={}\n", shell_quote(v)))
            .collect(),
        EnvFormat::Dotenv => env
            .iter()
            .map(|(k, v)| format!("{k}={}\n", serde_json::to_string(v).unwrap_or_default()))
            .collect(),
    })
}

pub fn format_expiration(expiration: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(expiration) = expiration else {
        return "never (long-lived)".to_string();
    };
    let stamp = expiration.format("%Y-%m-%d %H:%M:%S UTC");
    let left = expiration - now;
    if left <= chrono::Duration::zero() {
        format!("{stamp} (expired)")
    } else if left < chrono::Duration::hours(1) {
        format!("{stamp} (in {}m)", left.num_minutes().max(1))
    } else {
        format!("{stamp} (in {}h{:02}m)", left.num_hours(), left.num_minutes() % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_format_env() {
        let env = BTreeMap::from([
            ("B".to_string(), "two words".to_string()),
            ("A".to_string(), "x\"y".to_string()),
        ]);
        assert_eq!(
            format_env(&env, EnvFormat::Shell).unwrap(),
            "export A='x\"y'\nexport B='two words'\n"
        );
        assert_eq!(
            format_env(&env, EnvFormat::Dotenv).unwrap(),
            "A=\"x\\\"y\"\nB=\"two words\"\n"
        );
        let json: BTreeMap<String, String> =
            serde_json::from_str(&format_env(&env, EnvFormat::Json).unwrap()).unwrap();
        assert_eq!(json, env);
    }

    #[test]
    fn test_format_expiration() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(format_expiration(None, now), "never (long-lived)");
        assert_eq!(
            format_expiration(Some(now + chrono::Duration::minutes(42)), now),
            "2026-03-01 12:42:00 UTC (in 42m)"
        );
        assert_eq!(
            format_expiration(Some(now + chrono::Duration::minutes(150)), now),
            "2026-03-01 14:30:00 UTC (in 2h30m)"
        );
        assert_eq!(
            format_expiration(Some(now - chrono::Duration::seconds(1)), now),
            "2026-03-01 11:59:59 UTC (expired)"
        );
    }
}
