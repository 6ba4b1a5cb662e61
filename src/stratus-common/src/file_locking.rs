//! Cross-process advisory locking and atomic file replacement.
//!
//! Stores that are shared between concurrently running CLI processes take an
//! exclusive lock on a sibling lock file for the full read-modify-write cycle
//! and replace the data file with a temp-file-then-rename, so readers never
//! observe a partially written file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// Errors from locking and atomic writes.
#[derive(Debug, Error)]
pub enum FileLockError {
    #[error("timed out after {timeout:?} waiting for lock on {path}")]
    Timeout { path: PathBuf, timeout: Duration },

    #[error("failed to lock {path}: {source}")]
    Lock { path: PathBuf, source: io::Error },

    #[error("atomic write to {path} failed: {source}")]
    AtomicWrite { path: PathBuf, source: io::Error },

    #[error("{path} has no parent directory")]
    NoParent { path: PathBuf },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type FileLockResult<T> = Result<T, FileLockError>;

/// Lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Multiple readers.
    Shared,
    /// Single writer.
    Exclusive,
}

/// Lock acquisition settings.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Give up after this long.
    pub timeout: Duration,
    /// Sleep between non-blocking attempts.
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry_interval: Duration::from_millis(50),
        }
    }
}

impl LockConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

/// Holds an advisory lock until dropped.
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl FileLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Err(e) = unlock_file(&self.file) {
            tracing::debug!(path = %self.path.display(), error = %e, "Failed to release file lock");
        }
    }
}

/// Acquire an advisory lock on `path`, creating the lock file if needed.
///
/// The lock file is created with owner-only permissions and is never removed,
/// since deleting it while another process waits would split the lock.
pub fn acquire_lock(
    path: impl AsRef<Path>,
    mode: LockMode,
    config: &LockConfig,
) -> FileLockResult<FileLockGuard> {
    let path = path.as_ref().to_path_buf();

    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true).truncate(false);
    #[cfg(unix)]
    options.mode(crate::file_permissions::OWNER_ONLY_FILE_MODE);
    let file = options.open(&path)?;

    let started = Instant::now();
    loop {
        let acquired = try_lock_file(&file, mode).map_err(|source| FileLockError::Lock {
            path: path.clone(),
            source,
        })?;
        if acquired {
            return Ok(FileLockGuard { file, path, mode });
        }
        if started.elapsed() >= config.timeout {
            return Err(FileLockError::Timeout {
                path,
                timeout: config.timeout,
            });
        }
        std::thread::sleep(config.retry_interval);
    }
}

#[cfg(unix)]
fn try_lock_file(file: &File, mode: LockMode) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let operation = match mode {
        LockMode::Shared => libc::LOCK_SH,
        LockMode::Exclusive => libc::LOCK_EX,
    } | libc::LOCK_NB;

    // SAFETY: the descriptor is owned by `file` and valid for the call
    if unsafe { libc::flock(file.as_raw_fd(), operation) } == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and valid for the call
    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(windows)]
fn try_lock_file(file: &File, mode: LockMode) -> io::Result<bool> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
    use windows_sys::Win32::Storage::FileSystem::{
        LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx,
    };

    let flags = match mode {
        LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
        LockMode::Exclusive => LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
    };
    // SAFETY: zeroed OVERLAPPED is valid for synchronous handles
    let mut overlapped =
        unsafe { std::mem::zeroed::<windows_sys::Win32::System::IO::OVERLAPPED>() };
    let handle = file.as_raw_handle() as HANDLE;

    // SAFETY: handle is owned by `file`
    if unsafe { LockFileEx(handle, flags, 0, u32::MAX, u32::MAX, &mut overlapped) } != 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(windows)]
fn unlock_file(file: &File) -> io::Result<()> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::Storage::FileSystem::UnlockFileEx;

    // SAFETY: zeroed OVERLAPPED is valid for synchronous handles
    let mut overlapped =
        unsafe { std::mem::zeroed::<windows_sys::Win32::System::IO::OVERLAPPED>() };
    let handle = file.as_raw_handle() as HANDLE;

    // SAFETY: handle is owned by `file`
    if unsafe { UnlockFileEx(handle, 0, u32::MAX, u32::MAX, &mut overlapped) } != 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Replace `path` with `content` via a temp file in the same directory.
pub fn atomic_write(path: impl AsRef<Path>, content: &[u8]) -> FileLockResult<()> {
    write_replace(path.as_ref(), content, None)
}

/// Like [`atomic_write`], but the file is created with `mode` (Unix) before
/// any content lands in it.
pub fn atomic_write_with_mode(
    path: impl AsRef<Path>,
    content: &[u8],
    mode: u32,
) -> FileLockResult<()> {
    write_replace(path.as_ref(), content, Some(mode))
}

fn write_replace(path: &Path, content: &[u8], mode: Option<u32>) -> FileLockResult<()> {
    let parent = path.parent().ok_or_else(|| FileLockError::NoParent {
        path: path.to_path_buf(),
    })?;
    if !parent.as_os_str().is_empty() && !parent.exists() {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let temp_path = parent.join(format!(".{file_name}.tmp.{}", std::process::id()));

    let written = (|| -> io::Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        if let Some(mode) = mode {
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        let mut temp = options.open(&temp_path)?;
        temp.write_all(content)?;
        temp.sync_all()?;
        Ok(())
    })();

    if let Err(source) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(FileLockError::AtomicWrite {
            path: path.to_path_buf(),
            source,
        });
    }

    // rename replaces an existing target on both unix and windows (MoveFileEx
    // with MOVEFILE_REPLACE_EXISTING under the hood)
    fs::rename(&temp_path, path).map_err(|source| {
        let _ = fs::remove_file(&temp_path);
        FileLockError::AtomicWrite {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write_creates_and_overwrites() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("data.json");

        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_atomic_write_with_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("secret");
        atomic_write_with_mode(&path, b"x", 0o600).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_shared_locks_coexist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.lock");
        let config = LockConfig::default();

        let a = acquire_lock(&path, LockMode::Shared, &config).unwrap();
        let b = acquire_lock(&path, LockMode::Shared, &config).unwrap();
        assert_eq!(a.mode(), LockMode::Shared);
        assert_eq!(b.path(), path.as_path());
    }

    #[test]
    fn test_exclusive_lock_times_out_while_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.lock");

        let _held = acquire_lock(&path, LockMode::Exclusive, &LockConfig::default()).unwrap();
        let config = LockConfig {
            timeout: Duration::from_millis(120),
            retry_interval: Duration::from_millis(20),
        };
        let err = acquire_lock(&path, LockMode::Exclusive, &config).unwrap_err();
        assert!(matches!(err, FileLockError::Timeout { .. }));
    }

    #[test]
    fn test_exclusive_lock_serializes_threads() {
        let dir = tempdir().unwrap();
        let path = Arc::new(dir.path().join("store.lock"));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = Arc::clone(&path);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                std::thread::spawn(move || {
                    let _guard =
                        acquire_lock(path.as_path(), LockMode::Exclusive, &LockConfig::default())
                            .unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(10));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
