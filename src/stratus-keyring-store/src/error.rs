//! Error types for credential storage.

use std::path::PathBuf;

use stratus_common::FileLockError;
use thiserror::Error;

/// Errors that can occur during credential storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Nothing stored under this alias. Distinct from every other failure so
    /// callers can fall back to other credential sources.
    #[error("no credential stored for '{0}'")]
    NotFound(String),

    #[error("keyring password must be at least {min} characters")]
    PasswordTooShort { min: usize },

    #[error("keyring password required: set {env} or run in an interactive terminal")]
    PasswordRequired { env: String },

    #[error("password prompt failed: {0}")]
    Prompt(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("failed to decrypt '{alias}' (wrong password or corrupted store)")]
    Decryption { alias: String },

    #[error("corrupted credential store at {path}: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Lock(#[from] FileLockError),

    #[error("access to system keyring denied: {0}")]
    AccessDenied(String),

    #[error("system keyring error: {0}")]
    Keyring(String),

    #[error("cannot determine a data directory for the credential store")]
    NoDataDir,

    #[error("unsupported keyring backend '{0}' (expected system, file or memory)")]
    UnsupportedBackend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Map a keyring error for `alias`, turning a missing entry into
    /// [`StoreError::NotFound`].
    pub(crate) fn from_keyring(alias: &str, err: keyring::Error) -> Self {
        match err {
            keyring::Error::NoEntry => Self::NotFound(alias.to_string()),
            keyring::Error::NoStorageAccess(e) => Self::AccessDenied(e.to_string()),
            keyring::Error::PlatformFailure(e) => Self::Keyring(e.to_string()),
            other => Self::Keyring(other.to_string()),
        }
    }
}

/// Result type for credential storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_distinct() {
        assert!(StoreError::NotFound("dev".into()).is_not_found());
        assert!(!StoreError::Decryption { alias: "dev".into() }.is_not_found());
        assert!(!StoreError::AccessDenied("locked".into()).is_not_found());
    }

    #[test]
    fn test_keyring_no_entry_maps_to_not_found() {
        let err = StoreError::from_keyring("prod", keyring::Error::NoEntry);
        assert!(matches!(err, StoreError::NotFound(ref a) if a == "prod"));
    }
}
