//! Path helpers for confining generated files to a managed namespace.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path '{0}' must be relative to the managed directory")]
    Absolute(String),

    #[error("path '{0}' escapes the managed directory")]
    Escapes(String),

    #[error("path is empty")]
    Empty,
}

/// Lexically normalize a path, removing `.` and resolving `..` where a
/// previous component exists. Does not touch the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() && !path.is_absolute() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Join `relative` onto `root`, refusing absolute paths and any path that
/// would climb out of `root`.
pub fn resolve_within(root: &Path, relative: impl AsRef<Path>) -> Result<PathBuf, PathError> {
    let relative = relative.as_ref();
    let display = relative.display().to_string();

    if relative.as_os_str().is_empty() {
        return Err(PathError::Empty);
    }
    if relative.has_root() || relative.is_absolute() {
        return Err(PathError::Absolute(display));
    }

    let mut depth: usize = 0;
    for component in relative.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| PathError::Escapes(display.clone()))?;
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(PathError::Absolute(display));
            }
        }
    }
    if depth == 0 {
        return Err(PathError::Escapes(display));
    }

    Ok(normalize_path(&root.join(relative)))
}
