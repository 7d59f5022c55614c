//! Destination path sanitizer
//!
//! Archive entry names are attacker-controlled. Before anything is written, every
//! entry is resolved against the destination root with [`resolve`], which rejects
//! absolute names, parent-directory segments and anything that would land outside
//! the root after normalization ("zip slip").

use crate::config::CollisionPolicy;
use crate::error::PathError;
use std::path::{Component, Path, PathBuf};

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Resolve an archive entry path against `root`.
///
/// The entry is split on both `/` and `\`, empty and `.` segments are dropped, and
/// the remaining segments are appended to the normalized root one at a time. The
/// raw entry string is never handed to [`Path::join`].
///
/// # Examples
///
/// ```
/// use unpack_queue::sanitize::resolve;
/// use std::path::Path;
///
/// let root = Path::new("/srv/out");
/// assert_eq!(
///     resolve("folder/file.txt", root).unwrap(),
///     Path::new("/srv/out/folder/file.txt")
/// );
/// assert!(resolve("../../secret.txt", root).is_err());
/// assert!(resolve("C:/windows/system32", root).is_err());
/// ```
pub fn resolve(entry: &str, root: &Path) -> Result<PathBuf, PathError> {
    if entry.starts_with('/') || entry.starts_with('\\') || has_drive_prefix(entry) {
        return Err(PathError::AbsolutePath {
            entry: entry.to_string(),
        });
    }

    let segments: Vec<&str> = entry
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();

    if segments.iter().any(|s| is_dot_run(s)) {
        return Err(PathError::Traversal {
            entry: entry.to_string(),
        });
    }
    if segments.is_empty() {
        return Err(PathError::Empty);
    }

    let root = normalize(&absolute(root));
    let mut resolved = root.clone();
    for segment in segments {
        resolved.push(segment);
    }
    let resolved = normalize(&resolved);

    if resolved == root || !resolved.starts_with(&root) {
        return Err(PathError::EscapedRoot {
            entry: entry.to_string(),
            resolved,
        });
    }

    Ok(resolved)
}

/// Apply a collision policy to a sanitized destination path
///
/// `Overwrite` and `Skip` return the path unchanged; with `Skip` the caller checks
/// for an existing file and decides not to write. `Rename` probes `name (1).ext`,
/// `name (2).ext`, … until an unused name is found.
pub fn apply_collision_policy(path: &Path, policy: CollisionPolicy) -> Result<PathBuf, PathError> {
    match policy {
        CollisionPolicy::Overwrite | CollisionPolicy::Skip => Ok(path.to_path_buf()),
        CollisionPolicy::Rename => {
            if !path.exists() {
                return Ok(path.to_path_buf());
            }

            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let extension = path.extension().map(|e| e.to_string_lossy().into_owned());
            let parent = path.parent().unwrap_or_else(|| Path::new(""));

            for i in 1..=MAX_RENAME_ATTEMPTS {
                let new_name = match &extension {
                    Some(ext) => format!("{} ({}).{}", stem, i, ext),
                    None => format!("{} ({})", stem, i),
                };
                let new_path = parent.join(new_name);
                if !new_path.exists() {
                    return Ok(new_path);
                }
            }

            Err(PathError::CollisionExhausted {
                path: path.to_path_buf(),
                attempts: MAX_RENAME_ATTEMPTS,
            })
        }
    }
}

fn has_drive_prefix(entry: &str) -> bool {
    let bytes = entry.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

// "..", "...", "...." and so on
fn is_dot_run(segment: &str) -> bool {
    segment.len() >= 2 && segment.bytes().all(|b| b == b'.')
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Lexically normalize a path: drop `.` components and fold `..` into its parent.
/// Does not touch the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
