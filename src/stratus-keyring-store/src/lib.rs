//! Credential storage for Stratus.
//!
//! A credential is stored as a [`CredentialEnvelope`], a tagged
//! `{kind, payload}` value keyed by the alias of the identity or provider
//! that produced it. Three interchangeable backends implement the
//! [`CredentialStore`] contract:
//! - **system**: the OS keychain (Keychain, Credential Manager, Secret Service)
//! - **file**: AES-256-GCM encrypted file, key derived with Argon2id from a password
//! - **memory**: process-local map for tests and automation
//!
//! [`open_store`] picks a backend from an explicit override, configuration, or
//! the system default, falling back to the system keyring when the chosen
//! backend cannot be constructed.

// Core types
pub mod envelope;
pub mod error;
pub mod store;

// Backends
pub mod file;
pub mod memory;
pub mod system;

// Backend selection
pub mod selection;

pub use envelope::{
    CloudCredentials, CredentialEnvelope, CredentialKind, TokenCredentials, safe_format_key,
};
pub use error::{Result, StoreError};
pub use file::{FileCredentialStore, MIN_PASSWORD_LEN, PasswordPrompt};
pub use memory::MemoryCredentialStore;
pub use selection::{
    BackendKind, DEFAULT_NAMESPACE, KEYRING_DIR_ENV, KEYRING_PASSWORD_ENV, KEYRING_TYPE_ENV,
    KeyringConfig, open_store,
};
pub use store::CredentialStore;
pub use system::SystemKeyringStore;
