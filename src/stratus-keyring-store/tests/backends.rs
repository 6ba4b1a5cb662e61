//! Contract tests run against every backend that works without a host keychain.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serial_test::serial;
use stratus_keyring_store::{
    BackendKind, CloudCredentials, CredentialEnvelope, CredentialStore, FileCredentialStore,
    KEYRING_PASSWORD_ENV, KEYRING_TYPE_ENV, KeyringConfig, MemoryCredentialStore, StoreError,
    TokenCredentials, open_store,
};
use tempfile::TempDir;

fn backends() -> Vec<(Arc<dyn CredentialStore>, Option<TempDir>)> {
    let dir = tempfile::tempdir().unwrap();
    let file = FileCredentialStore::open(
        dir.path().join("default"),
        &SecretString::from("test-password".to_string()),
    )
    .unwrap();
    vec![
        (Arc::new(MemoryCredentialStore::new()), None),
        (Arc::new(file), Some(dir)),
    ]
}

fn every_kind(expiration: Option<chrono::DateTime<Utc>>) -> Vec<CredentialEnvelope> {
    let mut metadata = BTreeMap::new();
    metadata.insert("principal".to_string(), "arn:aws:iam::123:role/admin".to_string());

    let mut token = TokenCredentials::new("eyJhbGciOi.payload.sig");
    token.issuer = Some("https://sso.example.com".into());
    token.refresh_token = Some("refresh".into());
    token.expiration = expiration;

    vec![
        CloudCredentials {
            access_key_id: "ASIAEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI".into(),
            session_token: Some("FwoGZXIvYXdzE".into()),
            region: Some("eu-west-1".into()),
            expiration,
            metadata,
        }
        .into(),
        token.into(),
    ]
}

mod contract {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_round_trip_every_kind_every_backend() {
        for (store, _guard) in backends() {
            for (i, envelope) in every_kind(Some(Utc::now() + Duration::hours(1)))
                .into_iter()
                .enumerate()
            {
                let alias = format!("alias-{i}");
                store.store(&alias, &envelope).unwrap();
                assert_eq!(store.retrieve(&alias).unwrap(), envelope, "{}", store.backend());
            }
            assert_eq!(
                store.list().unwrap(),
                vec!["alias-0".to_string(), "alias-1".to_string()]
            );
        }
    }

    #[test]
    fn test_is_expired_reads_timestamp_every_backend() {
        for (store, _guard) in backends() {
            for envelope in every_kind(Some(Utc::now() - Duration::seconds(5))) {
                store.store("stale", &envelope).unwrap();
                assert!(store.is_expired("stale").unwrap(), "{}", store.backend());
                assert_eq!(store.retrieve("stale").unwrap(), envelope);
            }
            for envelope in every_kind(None) {
                store.store("forever", &envelope).unwrap();
                assert!(!store.is_expired("forever").unwrap());
            }
        }
    }

    #[test]
    fn test_refresh_replaces_wholesale() {
        for (store, _guard) in backends() {
            let mut first = TokenCredentials::new("first");
            first.issuer = Some("issuer".into());
            store.store("dev", &first.into()).unwrap();

            let second: CredentialEnvelope = TokenCredentials::new("second").into();
            store.store("dev", &second).unwrap();

            assert_eq!(store.retrieve("dev").unwrap(), second);
        }
    }

    #[test]
    fn test_delete_then_not_found() {
        for (store, _guard) in backends() {
            store
                .store("dev", &TokenCredentials::new("t").into())
                .unwrap();
            assert!(store.delete("dev").unwrap());
            assert!(!store.delete("dev").unwrap());
            assert!(matches!(
                store.retrieve("dev").unwrap_err(),
                StoreError::NotFound(alias) if alias == "dev"
            ));
        }
    }

    #[test]
    fn test_get_set_any_every_backend() {
        for (store, _guard) in backends() {
            assert!(store.get_any("k").unwrap_err().is_not_found());
            store.set_any("k", &serde_json::json!([1, 2, 3])).unwrap();
            assert_eq!(store.get_any("k").unwrap(), serde_json::json!([1, 2, 3]));
            assert!(store.list().unwrap().is_empty());
        }
    }
}

mod file_backend {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_namespaces_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let pw = SecretString::from("test-password".to_string());
        let a = FileCredentialStore::open(dir.path().join("team-a"), &pw).unwrap();
        let b = FileCredentialStore::open(dir.path().join("team-b"), &pw).unwrap();

        a.store("dev", &TokenCredentials::new("a").into()).unwrap();

        assert!(b.retrieve("dev").unwrap_err().is_not_found());
        assert!(b.list().unwrap().is_empty());
    }

    #[test]
    fn test_two_handles_see_each_others_writes() {
        let dir = tempfile::tempdir().unwrap();
        let pw = SecretString::from("test-password".to_string());
        let first = FileCredentialStore::open(dir.path(), &pw).unwrap();
        let second = FileCredentialStore::open(dir.path(), &pw).unwrap();

        first.store("a", &TokenCredentials::new("1").into()).unwrap();
        second.store("b", &TokenCredentials::new("2").into()).unwrap();

        assert_eq!(first.list().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_concurrent_writers_leave_well_formed_file() {
        let dir = tempfile::tempdir().unwrap();
        let pw = SecretString::from("test-password".to_string());
        let stores: Vec<_> = (0..4)
            .map(|_| Arc::new(FileCredentialStore::open(dir.path(), &pw).unwrap()))
            .collect();

        let handles: Vec<_> = stores
            .iter()
            .enumerate()
            .map(|(i, store)| {
                let store = Arc::clone(store);
                std::thread::spawn(move || {
                    for j in 0..5 {
                        store
                            .store(&format!("w{i}-{j}"), &TokenCredentials::new("t").into())
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stores[0].list().unwrap().len(), 20);
    }
}

mod selection {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    #[serial]
    fn test_file_backend_from_config() {
        let dir = tempfile::tempdir().unwrap();
        unsafe {
            std::env::remove_var(KEYRING_TYPE_ENV);
            std::env::set_var(KEYRING_PASSWORD_ENV, "long-enough-password");
        }
        let config = KeyringConfig {
            backend: Some(BackendKind::File),
            path: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let store = open_store(&config, None, None).unwrap();
        assert_eq!(store.backend(), BackendKind::File);
        assert!(dir.path().join("default").exists());

        unsafe { std::env::remove_var(KEYRING_PASSWORD_ENV) };
    }

    #[test]
    #[serial]
    fn test_file_backend_failure_falls_back_to_system() {
        let dir = tempfile::tempdir().unwrap();
        unsafe {
            std::env::remove_var(KEYRING_TYPE_ENV);
            std::env::set_var(KEYRING_PASSWORD_ENV, "short");
        }
        let config = KeyringConfig {
            backend: Some(BackendKind::File),
            path: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let store = open_store(&config, None, None).unwrap();
        assert_eq!(store.backend(), BackendKind::System);
        assert!(!dir.path().join("default").exists());

        unsafe { std::env::remove_var(KEYRING_PASSWORD_ENV) };
    }
}
