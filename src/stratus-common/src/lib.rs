//! Common utilities shared across Stratus crates.
//!
//! - Directory resolution with environment overrides
//! - Cross-process advisory file locks and atomic writes
//! - Owner-only file and directory creation
//! - Namespace-confined path resolution
//! - Interactive terminal / CI detection

pub mod dirs;
pub mod file_locking;
pub mod file_permissions;
pub mod path_utils;
pub mod terminal;

pub use dirs::{APP_NAME, StratusDirs, config_base_dir, data_base_dir};
pub use file_locking::{
    FileLockError, FileLockGuard, FileLockResult, LockConfig, LockMode, acquire_lock,
    atomic_write, atomic_write_with_mode,
};
pub use file_permissions::{
    OWNER_ONLY_DIR_MODE, OWNER_ONLY_FILE_MODE, create_private_dir_all, set_owner_only,
};
pub use path_utils::{PathError, normalize_path, resolve_within};
pub use terminal::{is_ci, is_interactive};
