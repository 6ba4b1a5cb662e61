//! In-memory credential store.
//!
//! Nothing is persisted; contents vanish with the process. Used for tests and
//! short-lived automation where touching the keychain or disk is unwanted.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

use crate::envelope::CredentialEnvelope;
use crate::error::{Result, StoreError};
use crate::selection::BackendKind;
use crate::store::CredentialStore;

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, CredentialEnvelope>>,
    metadata: Mutex<HashMap<String, Value>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn store(&self, alias: &str, envelope: &CredentialEnvelope) -> Result<()> {
        self.entries
            .lock()
            .insert(alias.to_string(), envelope.clone());
        Ok(())
    }

    fn retrieve(&self, alias: &str) -> Result<CredentialEnvelope> {
        self.entries
            .lock()
            .get(alias)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(alias.to_string()))
    }

    fn delete(&self, alias: &str) -> Result<bool> {
        Ok(self.entries.lock().remove(alias).is_some())
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut aliases: Vec<String> = self.entries.lock().keys().cloned().collect();
        aliases.sort();
        Ok(aliases)
    }

    fn get_any(&self, key: &str) -> Result<Value> {
        self.metadata
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn set_any(&self, key: &str, value: &Value) -> Result<()> {
        self.metadata.lock().insert(key.to_string(), value.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::TokenCredentials;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    #[test]
    fn test_missing_alias_is_not_found() {
        let store = MemoryCredentialStore::new();
        assert!(store.retrieve("nope").unwrap_err().is_not_found());
        assert!(store.is_expired("nope").unwrap_err().is_not_found());
        assert!(!store.delete("nope").unwrap());
    }

    #[test]
    fn test_expired_envelope_still_retrievable() {
        let store = MemoryCredentialStore::new();
        let mut token = TokenCredentials::new("t");
        token.expiration = Some(Utc::now() - Duration::seconds(1));
        store.store("dev", &token.into()).unwrap();

        assert!(store.is_expired("dev").unwrap());
        assert!(store.retrieve("dev").is_ok());
    }

    #[test]
    fn test_concurrent_writers() {
        let store = Arc::new(MemoryCredentialStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .store(&format!("id-{i}"), &TokenCredentials::new(format!("t{i}")).into())
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.list().unwrap().len(), 8);
    }
}
