//! Backend selection.
//!
//! Precedence: explicit override (flag or `STRATUS_KEYRING_TYPE`) >
//! `keyring.type` in configuration > system keyring. A backend that fails to
//! initialize is replaced by the system keyring with a warning, so storage
//! trouble alone never blocks authentication.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stratus_common::StratusDirs;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::file::{FileCredentialStore, PasswordPrompt};
use crate::memory::MemoryCredentialStore;
use crate::store::CredentialStore;
use crate::system::SystemKeyringStore;

/// Environment variable overriding the backend type.
pub const KEYRING_TYPE_ENV: &str = "STRATUS_KEYRING_TYPE";
/// Default environment variable holding the file backend password.
pub const KEYRING_PASSWORD_ENV: &str = "STRATUS_KEYRING_PASSWORD";
/// Environment variable overriding the file backend base directory.
pub const KEYRING_DIR_ENV: &str = "STRATUS_KEYRING_DIR";
/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Available credential store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    System,
    File,
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::System => "system",
            Self::File => "file",
            Self::Memory => "memory",
        })
    }
}

impl FromStr for BackendKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" | "system-keyring" | "keyring" => Ok(Self::System),
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(StoreError::UnsupportedBackend(other.to_string())),
        }
    }
}

/// `[keyring]` configuration block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeyringConfig {
    /// Backend to use when no runtime override is given.
    #[serde(rename = "type")]
    pub backend: Option<BackendKind>,
    /// Logical credential set; separate namespaces never share storage.
    pub namespace: Option<String>,
    /// Base directory for the file backend.
    pub path: Option<PathBuf>,
    /// Environment variable holding the file backend password.
    pub password_env: Option<String>,
}

impl KeyringConfig {
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    pub fn password_env(&self) -> &str {
        self.password_env.as_deref().unwrap_or(KEYRING_PASSWORD_ENV)
    }

    /// Directory holding the file backend for this namespace.
    /// `STRATUS_KEYRING_DIR` wins over `keyring.path`.
    pub fn file_dir(&self) -> Result<PathBuf> {
        let base = match std::env::var_os(KEYRING_DIR_ENV).filter(|v| !v.is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => match &self.path {
                Some(path) => path.clone(),
                None => StratusDirs::new()
                    .ok_or(StoreError::NoDataDir)?
                    .data_dir
                    .join("keyring"),
            },
        };
        Ok(base.join(self.namespace()))
    }
}

/// Resolve which backend to use, without constructing it.
pub fn select_backend(config: &KeyringConfig, explicit: Option<BackendKind>) -> BackendKind {
    if let Some(kind) = explicit {
        return kind;
    }
    if let Ok(raw) = std::env::var(KEYRING_TYPE_ENV) {
        match raw.parse() {
            Ok(kind) => return kind,
            Err(e) => warn!(var = KEYRING_TYPE_ENV, error = %e, "Ignoring invalid keyring override"),
        }
    }
    config.backend.unwrap_or_default()
}

/// Construct the selected credential store, falling back to the system
/// keyring if the selected backend cannot be initialized.
pub fn open_store(
    config: &KeyringConfig,
    explicit: Option<BackendKind>,
    prompt: Option<&PasswordPrompt>,
) -> Result<Arc<dyn CredentialStore>> {
    let kind = select_backend(config, explicit);
    match construct(kind, config, prompt) {
        Ok(store) => {
            debug!(backend = %kind, namespace = config.namespace(), "Credential store ready");
            Ok(store)
        }
        Err(e) if kind != BackendKind::System => {
            warn!(
                backend = %kind,
                error = %e,
                "Credential store unavailable, falling back to system keyring"
            );
            construct(BackendKind::System, config, prompt)
        }
        Err(e) => Err(e),
    }
}

fn construct(
    kind: BackendKind,
    config: &KeyringConfig,
    prompt: Option<&PasswordPrompt>,
) -> Result<Arc<dyn CredentialStore>> {
    Ok(match kind {
        BackendKind::System => Arc::new(SystemKeyringStore::open(config.namespace())?),
        BackendKind::Memory => Arc::new(MemoryCredentialStore::new()),
        BackendKind::File => {
            let dir = config.file_dir()?;
            let password = FileCredentialStore::resolve_password(config.password_env(), prompt)?;
            Arc::new(FileCredentialStore::open(dir, &password)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        unsafe {
            std::env::remove_var(KEYRING_TYPE_ENV);
            std::env::remove_var(KEYRING_DIR_ENV);
        }
    }

    #[test]
    fn test_parse_backend_kind() {
        assert_eq!("system".parse::<BackendKind>().unwrap(), BackendKind::System);
        assert_eq!("FILE".parse::<BackendKind>().unwrap(), BackendKind::File);
        assert_eq!("system-keyring".parse::<BackendKind>().unwrap(), BackendKind::System);
        assert!(matches!(
            "vault".parse::<BackendKind>(),
            Err(StoreError::UnsupportedBackend(_))
        ));
    }

    #[test]
    #[serial]
    fn test_precedence() {
        clear_env();
        let config = KeyringConfig {
            backend: Some(BackendKind::File),
            ..Default::default()
        };

        assert_eq!(select_backend(&KeyringConfig::default(), None), BackendKind::System);
        assert_eq!(select_backend(&config, None), BackendKind::File);

        unsafe { std::env::set_var(KEYRING_TYPE_ENV, "memory") };
        assert_eq!(select_backend(&config, None), BackendKind::Memory);
        assert_eq!(
            select_backend(&config, Some(BackendKind::System)),
            BackendKind::System
        );

        unsafe { std::env::set_var(KEYRING_TYPE_ENV, "bogus") };
        assert_eq!(select_backend(&config, None), BackendKind::File);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_file_dir_resolution() {
        clear_env();
        let explicit = KeyringConfig {
            path: Some(PathBuf::from("/srv/creds")),
            namespace: Some("team-a".into()),
            ..Default::default()
        };
        assert_eq!(explicit.file_dir().unwrap(), PathBuf::from("/srv/creds/team-a"));

        unsafe { std::env::set_var(KEYRING_DIR_ENV, "/tmp/kr") };
        assert_eq!(
            KeyringConfig::default().file_dir().unwrap(),
            PathBuf::from("/tmp/kr/default")
        );
        assert_eq!(explicit.file_dir().unwrap(), PathBuf::from("/tmp/kr/team-a"));

        unsafe { std::env::set_var(KEYRING_DIR_ENV, "") };
        assert_eq!(explicit.file_dir().unwrap(), PathBuf::from("/srv/creds/team-a"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_open_memory() {
        clear_env();
        let store = open_store(&KeyringConfig::default(), Some(BackendKind::Memory), None).unwrap();
        assert_eq!(store.backend(), BackendKind::Memory);
    }

    #[test]
    fn test_config_deserializes() {
        let config: KeyringConfig =
            serde_json::from_value(serde_json::json!({"type": "file", "password_env": "PW"}))
                .unwrap();
        assert_eq!(config.backend, Some(BackendKind::File));
        assert_eq!(config.password_env(), "PW");
        assert_eq!(config.namespace(), DEFAULT_NAMESPACE);
    }
}
