//! Owner-only file and directory helpers.
//!
//! Credential material must never be readable by other local users, so
//! these helpers set explicit modes instead of relying on the umask.

use std::io;
use std::path::Path;

/// `rw-------`
pub const OWNER_ONLY_FILE_MODE: u32 = 0o600;
/// `rwx------`
pub const OWNER_ONLY_DIR_MODE: u32 = 0o700;

/// Create `path` and any missing parents. Every directory this call creates
/// gets [`OWNER_ONLY_DIR_MODE`], and the leaf is tightened even if it already
/// existed.
pub fn create_private_dir_all(path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        use std::os::unix::fs::{DirBuilderExt, PermissionsExt};

        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(OWNER_ONLY_DIR_MODE)
            .create(path)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(OWNER_ONLY_DIR_MODE))
    }

    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(path)
    }
}

/// Restrict an existing file to [`OWNER_ONLY_FILE_MODE`]. No-op off Unix.
pub fn set_owner_only(path: impl AsRef<Path>) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(
            path.as_ref(),
            std::fs::Permissions::from_mode(OWNER_ONLY_FILE_MODE),
        )
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn mode_of(path: &Path) -> u32 {
        std::fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn test_private_dir_created_with_owner_only_mode() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a").join("b");

        create_private_dir_all(&target).unwrap();

        assert_eq!(mode_of(&target), 0o700);
        assert_eq!(mode_of(&dir.path().join("a")), 0o700);
    }

    #[test]
    fn test_existing_dir_is_tightened() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("open");
        std::fs::create_dir(&target).unwrap();
        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755)).unwrap();

        create_private_dir_all(&target).unwrap();
        assert_eq!(mode_of(&target), 0o700);
    }

    #[test]
    fn test_set_owner_only() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("token");
        std::fs::write(&file, "x").unwrap();

        set_owner_only(&file).unwrap();
        assert_eq!(mode_of(&file), 0o600);
    }
}
