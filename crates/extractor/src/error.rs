//! Error types for archive extraction operations.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for extraction operations.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Archive file not found at the specified path.
    #[error("Archive not found: {0}")]
    NotFound(PathBuf),

    /// The archive format is not supported.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A security violation was detected during extraction.
    #[error("Security violation: {0}")]
    Security(#[from] SecurityError),

    /// The archive is corrupted or malformed.
    #[error("Corrupted archive: {0}")]
    Corrupted(String),

    /// An I/O error occurred during extraction.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    /// Whether this error is a policy violation rather than a read/write failure.
    pub fn is_security(&self) -> bool {
        matches!(self, Self::Security(_))
    }
}

/// Security-related errors during extraction.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Path traversal attempt detected (e.g., "../../../etc/passwd").
    #[error("Path traversal attempt: {0}")]
    PathTraversal(String),

    /// Absolute path not allowed in archive entries.
    #[error("Absolute path not allowed: {0}")]
    AbsolutePath(String),

    /// Unsafe entry type detected (symlink, hard link, device).
    #[error("Unsafe entry type: {0}")]
    UnsafeEntryType(String),

    /// The archive holds more entries than allowed.
    #[error("Too many entries: more than {limit} entries in archive")]
    TooManyEntries {
        /// Configured entry ceiling
        limit: u64,
    },

    /// A single entry decompresses to more than allowed.
    #[error("Entry too large: '{entry}' exceeds {limit} bytes ({size} bytes written)")]
    EntryTooLarge {
        entry: String,
        size: u64,
        limit: u64,
    },

    /// The running total of decompressed bytes passed the aggregate ceiling.
    #[error("Total extracted size exceeded: {total} bytes > {limit} bytes (at '{entry}')")]
    TotalSizeExceeded {
        entry: String,
        total: u64,
        limit: u64,
    },

    /// An entry path is longer than allowed.
    #[error("Path too long: '{entry}' is {length} bytes (limit {limit})")]
    PathTooLong {
        entry: String,
        length: usize,
        limit: usize,
    },

    /// An entry's extension is on the denylist.
    #[error("Blocked file extension '.{extension}': {entry}")]
    BlockedExtension { entry: String, extension: String },

    /// An entry's base name is on the denylist.
    #[error("Blocked file name: {entry}")]
    BlockedFilename { entry: String },
}
