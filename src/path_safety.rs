use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{FeedError, SecurityViolation};

/// Reject entry names that are empty, absolute, home-relative or climb upward.
pub fn validate_entry_name(name: &str) -> Result<(), SecurityViolation> {
    let unsafe_name = name.is_empty()
        || name.starts_with('/')
        || name.starts_with('\\')
        || name.contains('~')
        || name.split(['/', '\\']).any(|segment| segment == "..");
    if unsafe_name {
        return Err(SecurityViolation::UnsafeName(name.to_string()));
    }

    // Drive prefixes and the like, which the string checks above do not cover.
    let only_normal = Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !only_normal {
        return Err(SecurityViolation::UnsafeName(name.to_string()));
    }
    Ok(())
}

/// Destination for `name` under `root`, guaranteed to stay inside `root`.
///
/// The name is vetted first. The joined path is then resolved through its
/// deepest existing ancestor, so a symlink planted inside the root cannot
/// redirect the write. Nothing is created on disk here.
pub fn safe_destination(root: &Path, name: &str) -> Result<PathBuf, FeedError> {
    validate_entry_name(name)?;

    let root = root.canonicalize()?;
    let candidate = root.join(name);
    let resolved = canonicalize_existing_prefix(&candidate)?;

    if !resolved.starts_with(&root) {
        return Err(SecurityViolation::PathEscape(name.to_string()).into());
    }
    Ok(resolved)
}

/// Canonicalize the longest existing prefix of `path` and re-append the rest.
fn canonicalize_existing_prefix(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut rest = Vec::new();

    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(file_name), Some(parent)) => {
                rest.push(file_name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => break,
        }
    }

    let mut resolved = existing.canonicalize()?;
    for part in rest.into_iter().rev() {
        resolved.push(part);
    }
    Ok(resolved)
}
