//! Per-key mutual exclusion, within the process and across processes.
//!
//! At most one task authenticates a given chain step at a time; the others
//! wait on the same lock and then find the freshly stored credential. With a
//! lock directory configured, an advisory lock on `<dir>/<key>.lock` extends
//! the exclusion to other running CLI processes.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use stratus_common::{
    FileLockError, FileLockGuard, LockConfig, LockMode, acquire_lock, create_private_dir_all,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Held while a key is owned. The file lock is released first.
#[derive(Debug)]
pub(crate) struct KeyGuard {
    _file: Option<FileLockGuard>,
    _local: OwnedMutexGuard<()>,
}

#[derive(Debug, Default)]
pub(crate) struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
    dir: Option<PathBuf>,
    wait: Duration,
}

impl KeyedLocks {
    /// In-process locking only.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Also take a file lock under `dir`, waiting at most `wait` for it.
    pub(crate) fn with_lock_dir(dir: impl Into<PathBuf>, wait: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            dir: Some(dir.into()),
            wait,
        }
    }

    pub(crate) fn lock_dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Wait for exclusive ownership of `key`.
    pub(crate) async fn lock(&self, key: &str) -> Result<KeyGuard, FileLockError> {
        // Clone out of the map so no shard guard is held across the await.
        let local = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
            .lock_owned()
            .await;

        let file = match &self.dir {
            Some(dir) => Some(self.lock_file(dir.clone(), key).await?),
            None => None,
        };
        Ok(KeyGuard {
            _file: file,
            _local: local,
        })
    }

    async fn lock_file(&self, dir: PathBuf, key: &str) -> Result<FileLockGuard, FileLockError> {
        let path = dir.join(format!("{}.lock", lock_file_stem(key)));
        let config = LockConfig::with_timeout(self.wait);
        // Polling for the lock sleeps, so keep it off the runtime threads.
        tokio::task::spawn_blocking(move || {
            create_private_dir_all(&dir)?;
            acquire_lock(&path, LockMode::Exclusive, &config)
        })
        .await
        .map_err(|e| FileLockError::Io(io::Error::other(e)))?
    }
}

fn lock_file_stem(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("sso").await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a").await.unwrap();
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b")).await;
        assert!(b.is_ok());
    }

    // Two managers in one process stand in for two CLI processes: they share
    // nothing but the lock directory.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lock_file_excludes_other_owners() {
        let dir = TempDir::new().unwrap();
        let first = KeyedLocks::with_lock_dir(dir.path(), Duration::from_secs(5));
        let second = KeyedLocks::with_lock_dir(dir.path(), Duration::from_millis(200));

        let held = first.lock("ps").await.unwrap();
        assert!(dir.path().join("ps.lock").exists());
        assert!(matches!(
            second.lock("ps").await,
            Err(FileLockError::Timeout { .. })
        ));

        drop(held);
        assert!(second.lock("ps").await.is_ok());
    }

    #[test]
    fn test_lock_file_stem_is_flat() {
        assert_eq!(lock_file_stem("team/admin role"), "team_admin_role");
        assert_eq!(lock_file_stem("sso-prod.eu"), "sso-prod.eu");
    }
}
