//! OS keychain backend.
//!
//! Storage and encryption are delegated entirely to the platform facility:
//! - Windows: Credential Manager
//! - macOS: Keychain
//! - Linux: Secret Service (GNOME Keyring, KWallet)
//!
//! Keychains cannot enumerate entries, so an index entry holding the alias
//! list is maintained next to the credentials.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::envelope::CredentialEnvelope;
use crate::error::{Result, StoreError};
use crate::selection::BackendKind;
use crate::store::CredentialStore;

/// Prefix of the keychain service name; the namespace is appended.
pub const SERVICE_PREFIX: &str = "stratus-cli";

const INDEX_ACCOUNT: &str = "__index__";
const CREDENTIAL_PREFIX: &str = "cred:";
const METADATA_PREFIX: &str = "meta:";

pub struct SystemKeyringStore {
    service: String,
    index_lock: Mutex<()>,
}

impl SystemKeyringStore {
    /// Open the keychain service for `namespace`.
    ///
    /// Fails only if the platform rejects the service name outright; an
    /// unreachable keychain daemon surfaces on first use.
    pub fn open(namespace: &str) -> Result<Self> {
        let service = format!("{SERVICE_PREFIX}:{namespace}");
        keyring::Entry::new(&service, INDEX_ACCOUNT)
            .map_err(|e| StoreError::from_keyring(INDEX_ACCOUNT, e))?;
        debug!(service = %service, "Opened system keyring");
        Ok(Self {
            service,
            index_lock: Mutex::new(()),
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, account: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, account).map_err(|e| StoreError::from_keyring(account, e))
    }

    fn read(&self, account: &str, alias: &str) -> Result<String> {
        self.entry(account)?
            .get_password()
            .map_err(|e| StoreError::from_keyring(alias, e))
    }

    fn write(&self, account: &str, alias: &str, value: &str) -> Result<()> {
        self.entry(account)?.set_password(value).map_err(|e| {
            warn!(alias, error = %e, "Failed to write to system keyring");
            StoreError::from_keyring(alias, e)
        })
    }

    fn read_index(&self) -> Result<BTreeSet<String>> {
        match self.read(INDEX_ACCOUNT, INDEX_ACCOUNT) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.is_not_found() => Ok(BTreeSet::new()),
            Err(e) => Err(e),
        }
    }

    fn update_index(&self, f: impl FnOnce(&mut BTreeSet<String>) -> bool) -> Result<()> {
        let _guard = self.index_lock.lock();
        let mut index = self.read_index()?;
        if f(&mut index) {
            let raw = serde_json::to_string(&index)?;
            self.write(INDEX_ACCOUNT, INDEX_ACCOUNT, &raw)?;
        }
        Ok(())
    }
}

impl CredentialStore for SystemKeyringStore {
    fn backend(&self) -> BackendKind {
        BackendKind::System
    }

    fn store(&self, alias: &str, envelope: &CredentialEnvelope) -> Result<()> {
        let raw = serde_json::to_string(envelope)?;
        self.write(&format!("{CREDENTIAL_PREFIX}{alias}"), alias, &raw)?;
        self.update_index(|index| index.insert(alias.to_string()))?;
        debug!(alias, kind = %envelope.kind(), "Stored credential in system keyring");
        Ok(())
    }

    fn retrieve(&self, alias: &str) -> Result<CredentialEnvelope> {
        let raw = self.read(&format!("{CREDENTIAL_PREFIX}{alias}"), alias)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn delete(&self, alias: &str) -> Result<bool> {
        let removed = match self
            .entry(&format!("{CREDENTIAL_PREFIX}{alias}"))?
            .delete_credential()
        {
            Ok(()) => true,
            Err(keyring::Error::NoEntry) => false,
            Err(e) => return Err(StoreError::from_keyring(alias, e)),
        };
        self.update_index(|index| index.remove(alias))?;
        Ok(removed)
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.read_index()?.into_iter().collect())
    }

    fn get_any(&self, key: &str) -> Result<Value> {
        let raw = self.read(&format!("{METADATA_PREFIX}{key}"), key)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn set_any(&self, key: &str, value: &Value) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.write(&format!("{METADATA_PREFIX}{key}"), key, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::TokenCredentials;

    // These tests need a working keychain on the host and are ignored by default.

    #[test]
    #[ignore]
    fn test_store_retrieve_delete() {
        let store = SystemKeyringStore::open("stratus-test").unwrap();
        let envelope: CredentialEnvelope = TokenCredentials::new("value-12345").into();

        store.store("test-alias", &envelope).unwrap();
        assert_eq!(store.retrieve("test-alias").unwrap(), envelope);
        assert!(store.list().unwrap().contains(&"test-alias".to_string()));

        assert!(store.delete("test-alias").unwrap());
        assert!(store.retrieve("test-alias").unwrap_err().is_not_found());
        assert!(!store.list().unwrap().contains(&"test-alias".to_string()));
    }

    #[test]
    #[ignore]
    fn test_metadata() {
        let store = SystemKeyringStore::open("stratus-test").unwrap();
        store
            .set_any("last-login", &serde_json::json!({"identity": "dev"}))
            .unwrap();
        assert_eq!(
            store.get_any("last-login").unwrap()["identity"],
            serde_json::json!("dev")
        );
    }
}
