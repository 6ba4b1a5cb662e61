//! Encrypted file backend.
//!
//! Every envelope is sealed with AES-256-GCM under a key derived from a
//! password with Argon2id. The alias is bound as associated data, so a sealed
//! entry cannot be moved to a different alias undetected.
//!
//! Layout inside the namespace directory (mode 0700):
//! - `credentials.json`: sealed entries and metadata (mode 0600)
//! - `credentials.salt`: random Argon2 salt (mode 0600)
//! - `credentials.lock`: advisory lock shared by all processes
//!
//! Each operation re-reads the file under the lock, so concurrent processes
//! never lose each other's writes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, OsRng, Payload, rand_core::RngCore},
};
use argon2::Argon2;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stratus_common::{
    LockConfig, LockMode, OWNER_ONLY_FILE_MODE, acquire_lock, atomic_write_with_mode,
    create_private_dir_all,
};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::envelope::CredentialEnvelope;
use crate::error::{Result, StoreError};
use crate::selection::BackendKind;
use crate::store::CredentialStore;

/// Minimum accepted password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 8;

const DATA_FILE: &str = "credentials.json";
const SALT_FILE: &str = "credentials.salt";
const LOCK_FILE: &str = "credentials.lock";
const FORMAT_VERSION: u32 = 1;
const NONCE_SIZE: usize = 12;
const SALT_SIZE: usize = 16;
const KEY_SIZE: usize = 32;
const METADATA_AAD_PREFIX: &str = "meta:";

/// Interactive password source. Receives the prompt text.
pub type PasswordPrompt = dyn Fn(&str) -> std::result::Result<SecretString, String> + Send + Sync;

#[derive(Zeroize, ZeroizeOnDrop)]
struct EncryptionKey([u8; KEY_SIZE]);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sealed {
    nonce: String,
    ciphertext: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, Sealed>,
    #[serde(default)]
    metadata: BTreeMap<String, Sealed>,
}

impl Default for StoreFile {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            entries: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }
}

pub struct FileCredentialStore {
    dir: PathBuf,
    data_path: PathBuf,
    lock_path: PathBuf,
    key: EncryptionKey,
    lock_config: LockConfig,
}

impl std::fmt::Debug for FileCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCredentialStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl FileCredentialStore {
    /// Open (or create) the store in `dir`.
    ///
    /// The password length is checked before anything is created on disk.
    pub fn open(dir: impl Into<PathBuf>, password: &SecretString) -> Result<Self> {
        validate_password(password)?;

        let dir = dir.into();
        create_private_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let lock_path = dir.join(LOCK_FILE);
        let lock_config = LockConfig::default();
        let salt = {
            let _guard = acquire_lock(&lock_path, LockMode::Exclusive, &lock_config)?;
            load_or_create_salt(&dir.join(SALT_FILE))?
        };
        let key = derive_key(password, &salt)?;

        debug!(dir = %dir.display(), "Opened encrypted credential store");
        Ok(Self {
            data_path: dir.join(DATA_FILE),
            lock_path,
            dir,
            key,
            lock_config,
        })
    }

    /// Read the password from `env_var`, or ask `prompt` if one is available.
    pub fn resolve_password(
        env_var: &str,
        prompt: Option<&PasswordPrompt>,
    ) -> Result<SecretString> {
        if let Ok(value) = std::env::var(env_var) {
            if !value.is_empty() {
                return Ok(SecretString::from(value));
            }
        }
        match prompt {
            Some(prompt) => prompt("Credential store password").map_err(StoreError::Prompt),
            None => Err(StoreError::PasswordRequired {
                env: env_var.to_string(),
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn load(&self) -> Result<StoreFile> {
        let raw = match std::fs::read(&self.data_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StoreFile::default()),
            Err(e) => return Err(StoreError::io(&self.data_path, e)),
        };
        let file: StoreFile =
            serde_json::from_slice(&raw).map_err(|e| StoreError::Corrupted {
                path: self.data_path.clone(),
                reason: e.to_string(),
            })?;
        if file.version != FORMAT_VERSION {
            return Err(StoreError::Corrupted {
                path: self.data_path.clone(),
                reason: format!("unsupported format version {}", file.version),
            });
        }
        Ok(file)
    }

    fn save(&self, file: &StoreFile) -> Result<()> {
        let raw = serde_json::to_vec_pretty(file)?;
        atomic_write_with_mode(&self.data_path, &raw, OWNER_ONLY_FILE_MODE)?;
        Ok(())
    }

    fn read_locked<T>(&self, f: impl FnOnce(&StoreFile) -> Result<T>) -> Result<T> {
        let _guard = acquire_lock(&self.lock_path, LockMode::Shared, &self.lock_config)?;
        f(&self.load()?)
    }

    fn modify_locked<T>(&self, f: impl FnOnce(&mut StoreFile) -> Result<(T, bool)>) -> Result<T> {
        let _guard = acquire_lock(&self.lock_path, LockMode::Exclusive, &self.lock_config)?;
        let mut file = self.load()?;
        let (result, dirty) = f(&mut file)?;
        if dirty {
            self.save(&file)?;
        }
        Ok(result)
    }

    fn seal(&self, aad: &str, plaintext: &[u8]) -> Result<Sealed> {
        let cipher = Aes256Gcm::new_from_slice(&self.key.0)
            .map_err(|e| StoreError::Encryption(format!("cipher init failed: {e}")))?;
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|e| StoreError::Encryption(e.to_string()))?;
        Ok(Sealed {
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
        })
    }

    fn open_sealed(&self, aad: &str, sealed: &Sealed) -> Result<Vec<u8>> {
        let corrupted = |reason: String| StoreError::Corrupted {
            path: self.data_path.clone(),
            reason,
        };
        let nonce = BASE64
            .decode(&sealed.nonce)
            .map_err(|e| corrupted(format!("bad nonce for '{aad}': {e}")))?;
        if nonce.len() != NONCE_SIZE {
            return Err(corrupted(format!("bad nonce length for '{aad}'")));
        }
        let ciphertext = BASE64
            .decode(&sealed.ciphertext)
            .map_err(|e| corrupted(format!("bad ciphertext for '{aad}': {e}")))?;

        let cipher = Aes256Gcm::new_from_slice(&self.key.0)
            .map_err(|e| StoreError::Encryption(format!("cipher init failed: {e}")))?;
        cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| StoreError::Decryption {
                alias: aad.to_string(),
            })
    }

    fn decode<T: serde::de::DeserializeOwned>(&self, aad: &str, sealed: &Sealed) -> Result<T> {
        let mut plaintext = self.open_sealed(aad, sealed)?;
        let decoded = serde_json::from_slice(&plaintext);
        plaintext.zeroize();
        decoded.map_err(|e| StoreError::Corrupted {
            path: self.data_path.clone(),
            reason: format!("undecodable entry '{aad}': {e}"),
        })
    }
}

impl CredentialStore for FileCredentialStore {
    fn backend(&self) -> BackendKind {
        BackendKind::File
    }

    fn store(&self, alias: &str, envelope: &CredentialEnvelope) -> Result<()> {
        let mut plaintext = serde_json::to_vec(envelope)?;
        let sealed = self.seal(alias, &plaintext);
        plaintext.zeroize();
        let sealed = sealed?;

        self.modify_locked(|file| {
            file.entries.insert(alias.to_string(), sealed);
            Ok(((), true))
        })?;
        debug!(alias, kind = %envelope.kind(), "Stored credential in encrypted file");
        Ok(())
    }

    fn retrieve(&self, alias: &str) -> Result<CredentialEnvelope> {
        self.read_locked(|file| {
            let sealed = file
                .entries
                .get(alias)
                .ok_or_else(|| StoreError::NotFound(alias.to_string()))?;
            self.decode(alias, sealed)
        })
    }

    fn delete(&self, alias: &str) -> Result<bool> {
        self.modify_locked(|file| {
            let removed = file.entries.remove(alias).is_some();
            Ok((removed, removed))
        })
    }

    fn list(&self) -> Result<Vec<String>> {
        self.read_locked(|file| Ok(file.entries.keys().cloned().collect()))
    }

    fn get_any(&self, key: &str) -> Result<Value> {
        let aad = format!("{METADATA_AAD_PREFIX}{key}");
        self.read_locked(|file| {
            let sealed = file
                .metadata
                .get(key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            self.decode(&aad, sealed)
        })
    }

    fn set_any(&self, key: &str, value: &Value) -> Result<()> {
        let aad = format!("{METADATA_AAD_PREFIX}{key}");
        let sealed = self.seal(&aad, &serde_json::to_vec(value)?)?;
        self.modify_locked(|file| {
            file.metadata.insert(key.to_string(), sealed);
            Ok(((), true))
        })
    }
}

fn validate_password(password: &SecretString) -> Result<()> {
    if password.expose_secret().chars().count() < MIN_PASSWORD_LEN {
        return Err(StoreError::PasswordTooShort {
            min: MIN_PASSWORD_LEN,
        });
    }
    Ok(())
}

fn load_or_create_salt(path: &Path) -> Result<[u8; SALT_SIZE]> {
    match std::fs::read(path) {
        Ok(raw) => raw.as_slice().try_into().map_err(|_| StoreError::Corrupted {
            path: path.to_path_buf(),
            reason: format!("salt must be {SALT_SIZE} bytes, found {}", raw.len()),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let mut salt = [0u8; SALT_SIZE];
            OsRng.fill_bytes(&mut salt);
            atomic_write_with_mode(path, &salt, OWNER_ONLY_FILE_MODE)?;
            Ok(salt)
        }
        Err(e) => Err(StoreError::io(path, e)),
    }
}

fn derive_key(password: &SecretString, salt: &[u8]) -> Result<EncryptionKey> {
    let mut key = [0u8; KEY_SIZE];
    Argon2::default()
        .hash_password_into(password.expose_secret().as_bytes(), salt, &mut key)
        .map_err(|e| StoreError::KeyDerivation(e.to_string()))?;
    Ok(EncryptionKey(key))
}
