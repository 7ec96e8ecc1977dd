//! Security and safety checks for archive extraction.
//!
//! This module provides functions to validate archive entry paths and enforce
//! security policies to prevent attacks like zip-slip (path traversal) and
//! archive bombs.

use crate::error::{ExtractError, SecurityError};
use crate::types::ExtractLimits;
use std::io;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

/// Entry type for filtering special file types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
    /// Hard link
    Hardlink,
    /// Other special file types (device, socket, etc.)
    Other,
}

/// Validates and normalizes an archive entry path to prevent security vulnerabilities.
///
/// This function performs the following checks:
/// - Converts backslash separators so Windows-built archives are judged the same way
/// - Rejects paths starting with a separator and absolute paths in any form,
///   including drive prefixes such as `C:`
/// - Rejects paths containing ".." components (path traversal)
/// - Normalizes the path to remove redundant separators and "." components
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use extractor::safety::validate_entry_path;
///
/// // Valid relative path
/// let safe_path = validate_entry_path("dir/file.txt").unwrap();
/// assert_eq!(safe_path, Path::new("dir/file.txt"));
///
/// // Path traversal attempt - rejected
/// assert!(validate_entry_path("../../etc/passwd").is_err());
///
/// // Absolute path - rejected
/// assert!(validate_entry_path("/etc/passwd").is_err());
/// ```
pub fn validate_entry_path(raw: &str) -> Result<PathBuf, SecurityError> {
    let unified = raw.replace('\\', "/");

    if unified.starts_with('/') {
        return Err(SecurityError::AbsolutePath(raw.to_string()));
    }

    // Drive letters ("C:", "c:/Windows") are absolute on Windows even though
    // a Unix `Path` would call them relative.
    let bytes = unified.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err(SecurityError::AbsolutePath(raw.to_string()));
    }

    let path = Path::new(&unified);
    if path.is_absolute() {
        return Err(SecurityError::AbsolutePath(raw.to_string()));
    }

    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(part) => {
                normalized.push(part);
            }
            Component::CurDir => {
                // Skip "." components
                continue;
            }
            Component::ParentDir => {
                return Err(SecurityError::PathTraversal(format!(
                    "Path contains '..' component: {}",
                    raw
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(SecurityError::AbsolutePath(raw.to_string()));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(SecurityError::PathTraversal(format!(
            "Path normalizes to empty: '{}'",
            raw
        )));
    }

    Ok(normalized)
}

/// Applies the per-entry name rules: path length, blocked extensions and
/// blocked base names. Comparisons are case-insensitive.
///
/// ```
/// use std::path::Path;
/// use extractor::safety::check_entry_name;
/// use extractor::ExtractLimits;
///
/// let limits = ExtractLimits::default();
/// assert!(check_entry_name("site/index.html", Path::new("site/index.html"), &limits).is_ok());
/// assert!(check_entry_name("tools/setup.EXE", Path::new("tools/setup.EXE"), &limits).is_err());
/// ```
pub fn check_entry_name(
    raw: &str,
    normalized: &Path,
    limits: &ExtractLimits,
) -> Result<(), SecurityError> {
    if raw.len() > limits.max_path_length {
        return Err(SecurityError::PathTooLong {
            entry: raw.to_string(),
            length: raw.len(),
            limit: limits.max_path_length,
        });
    }

    let file_name = normalized
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("")
        .to_lowercase();

    if limits
        .blocked_filenames
        .iter()
        .any(|blocked| blocked.to_lowercase() == file_name)
    {
        return Err(SecurityError::BlockedFilename {
            entry: raw.to_string(),
        });
    }

    let extension = normalized
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    if !extension.is_empty()
        && limits
            .blocked_extensions
            .iter()
            .any(|blocked| blocked.trim_start_matches('.').to_lowercase() == extension)
    {
        return Err(SecurityError::BlockedExtension {
            entry: raw.to_string(),
            extension,
        });
    }

    Ok(())
}

/// Joins a validated relative path onto the extraction root and proves the
/// result stays inside it.
///
/// `root` must already be canonical. The candidate's deepest existing
/// ancestor is canonicalized (following any symlink planted earlier) and the
/// not-yet-created remainder appended; the result must equal `root` or start
/// with `root` followed by a separator.
pub fn resolve_within(root: &Path, relative: &Path, raw: &str) -> Result<PathBuf, ExtractError> {
    let candidate = root.join(relative);
    let resolved = canonicalize_existing_prefix(&candidate)?;

    let root_str = root.to_string_lossy();
    let resolved_str = resolved.to_string_lossy();
    let boundary = format!("{}{}", root_str.trim_end_matches(MAIN_SEPARATOR), MAIN_SEPARATOR);

    if resolved_str == root_str || resolved_str.starts_with(&boundary) {
        Ok(resolved)
    } else {
        Err(SecurityError::PathTraversal(format!(
            "Entry '{}' resolves outside the extraction directory",
            raw
        ))
        .into())
    }
}

fn canonicalize_existing_prefix(candidate: &Path) -> io::Result<PathBuf> {
    let mut existing = candidate.to_path_buf();
    let mut pending = Vec::new();

    loop {
        match existing.canonicalize() {
            Ok(mut resolved) => {
                for part in pending.iter().rev() {
                    resolved.push(part);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let name = existing.file_name().map(|n| n.to_os_string()).ok_or(e)?;
                pending.push(name);
                if !existing.pop() {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        "no existing ancestor for candidate path",
                    ));
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Checks the running total of extracted bytes against the aggregate ceiling.
///
/// # Examples
///
/// ```
/// use extractor::safety::check_total_size;
///
/// assert!(check_total_size("a.txt", 1000, 2000).is_ok());
/// assert!(check_total_size("a.txt", 3000, 2000).is_err());
/// ```
pub fn check_total_size(entry: &str, total: u64, limit: u64) -> Result<(), SecurityError> {
    if total > limit {
        return Err(SecurityError::TotalSizeExceeded {
            entry: entry.to_string(),
            total,
            limit,
        });
    }
    Ok(())
}

/// Only regular files and directories are ever written; links and special
/// files are refused outright.
pub fn is_safe_entry_type(entry_type: EntryType) -> bool {
    matches!(entry_type, EntryType::File | EntryType::Directory)
}
