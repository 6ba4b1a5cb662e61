//! Application directories for Stratus.
//!
//! Two roots matter:
//! - the **data** directory, which holds the encrypted credential store
//! - the **config** directory, which holds `auth.toml` and the tool-managed
//!   credential artifacts written after authentication
//!
//! Both follow the platform convention from the `dirs` crate and can be
//! overridden, in priority order, by `STRATUS_HOME` (both roots),
//! `STRATUS_DATA_HOME` / `STRATUS_CONFIG_HOME`, then `XDG_DATA_HOME` /
//! `XDG_CONFIG_HOME`.

use std::path::{Path, PathBuf};

/// Application name used as the directory component under each base.
pub const APP_NAME: &str = "stratus";

/// Overrides both the data and config roots.
pub const HOME_ENV: &str = "STRATUS_HOME";
/// Overrides the base directory for persistent data.
pub const DATA_HOME_ENV: &str = "STRATUS_DATA_HOME";
/// Overrides the base directory for configuration.
pub const CONFIG_HOME_ENV: &str = "STRATUS_CONFIG_HOME";

const XDG_DATA_HOME: &str = "XDG_DATA_HOME";
const XDG_CONFIG_HOME: &str = "XDG_CONFIG_HOME";

/// Resolved application directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StratusDirs {
    /// Configuration root (`<config base>/stratus`).
    pub config_dir: PathBuf,
    /// Data root (`<data base>/stratus`).
    pub data_dir: PathBuf,
}

impl StratusDirs {
    /// Resolve directories from the environment and platform defaults.
    pub fn new() -> Option<Self> {
        if let Some(home) = env_path(HOME_ENV) {
            return Some(Self {
                config_dir: home.clone(),
                data_dir: home,
            });
        }

        Some(Self {
            config_dir: config_base_dir()?.join(APP_NAME),
            data_dir: data_base_dir()?.join(APP_NAME),
        })
    }

    /// Build directories rooted at an explicit location. Used by tests and
    /// embedders that manage their own layout.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            config_dir: root.join("config").join(APP_NAME),
            data_dir: root.join("data").join(APP_NAME),
        }
    }

    /// Default location of the declarative auth configuration.
    pub fn auth_config_file(&self) -> PathBuf {
        self.config_dir.join("auth.toml")
    }

    /// Encrypted keyring directory for one logical namespace.
    pub fn keyring_dir(&self, namespace: &str) -> PathBuf {
        self.data_dir.join("keyring").join(namespace)
    }

    /// Cross-process lock files, one per credential alias.
    pub fn locks_dir(&self) -> PathBuf {
        self.data_dir.join("locks")
    }

    /// Root of the tool-managed credential artifact namespace.
    pub fn credentials_dir(&self) -> PathBuf {
        self.config_dir.join("credentials")
    }
}

/// Base directory for persistent data, before the application component.
pub fn data_base_dir() -> Option<PathBuf> {
    env_path(DATA_HOME_ENV)
        .or_else(|| env_path(XDG_DATA_HOME))
        .or_else(dirs::data_dir)
}

/// Base directory for configuration, before the application component.
pub fn config_base_dir() -> Option<PathBuf> {
    env_path(CONFIG_HOME_ENV)
        .or_else(|| env_path(XDG_CONFIG_HOME))
        .or_else(dirs::config_dir)
}

/// Read a directory override, ignoring empty values and anchoring relative
/// paths at the current directory.
fn env_path(var: &str) -> Option<PathBuf> {
    let raw = std::env::var_os(var)?;
    if raw.is_empty() {
        return None;
    }
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        return Some(path);
    }
    match std::env::current_dir() {
        Ok(cwd) => Some(crate::path_utils::normalize_path(&cwd.join(path))),
        Err(e) => {
            tracing::warn!(var, error = %e, "Ignoring relative directory override");
            None
        }
    }
}
