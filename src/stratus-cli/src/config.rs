//! Locating and loading the auth configuration file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use stratus_auth::AuthConfig;
use stratus_common::StratusDirs;
use tracing::debug;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "STRATUS_CONFIG";

/// The file to read: an explicit path (flag or `STRATUS_CONFIG`), else
/// `auth.toml` in the config directory.
pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    StratusDirs::new()
        .map(|dirs| dirs.auth_config_file())
        .context("could not determine the config directory; pass --config")
}

/// Load the configuration. A missing file at the default location yields an
/// empty configuration; a missing explicit file is an error.
pub fn load_auth_config(explicit: Option<&Path>) -> Result<AuthConfig> {
    let path = config_path(explicit)?;
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && explicit.is_none() => {
            debug!(path = %path.display(), "No auth configuration found");
            return Ok(AuthConfig::default());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    let config: AuthConfig =
        toml::from_str(&raw).with_context(|| format!("invalid configuration in {}", path.display()))?;
    debug!(
        path = %path.display(),
        providers = config.providers.len(),
        identities = config.identities.len(),
        "Loaded auth configuration"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_load_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.toml");
        std::fs::write(
            &path,
            r#"
[keyring]
type = "file"
namespace = "work"

[providers.sso]
kind = "env/token"

[identities.dev]
kind = "static/forward"
via = { provider = "sso" }
default = true
"#,
        )
        .unwrap();

        let config = load_auth_config(Some(path.as_path())).unwrap();
        assert_eq!(config.favorites(), vec!["dev".to_string()]);
        assert_eq!(config.keyring.namespace(), "work");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(load_auth_config(Some(dir.path().join("nope.toml").as_path())).is_err());
    }

    #[test]
    #[serial]
    fn test_missing_default_file_is_empty() {
        let dir = TempDir::new().unwrap();
        unsafe { std::env::set_var("STRATUS_HOME", dir.path()) };
        let config = load_auth_config(None);
        unsafe { std::env::remove_var("STRATUS_HOME") };
        assert_eq!(config.unwrap(), AuthConfig::default());
    }

    #[test]
    fn test_typo_is_reported_with_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.toml");
        std::fs::write(&path, "[identities.dev]\nkind = \"x\"\nvai = { provider = \"sso\" }\n").unwrap();
        let err = load_auth_config(Some(path.as_path())).unwrap_err();
        assert!(format!("{err:#}").contains("auth.toml"));
    }
}
