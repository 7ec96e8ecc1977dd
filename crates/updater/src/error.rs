//! Error types for the update pipeline.

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::record::UpdateStatus;

/// Why the scanner refused a file. Carried in verdicts and surfaced to the
/// uploader verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanRejection {
    #[error("File does not exist")]
    Missing,

    #[error("File is empty")]
    Empty,

    #[error("File too large: {size} bytes (limit: {limit} bytes)")]
    TooLarge { size: u64, limit: u64 },

    #[error("Dangerous file extension: .{extension}")]
    DangerousExtension { extension: String },

    #[error("Unrecognized file type")]
    UnknownType,

    #[error("File type mismatch: declared {declared}, detected {detected}")]
    TypeMismatch { declared: String, detected: String },

    #[error("Executable detected: {0}")]
    Executable(String),

    #[error("Malicious content detected: {pattern}")]
    MaliciousContent { pattern: String },

    #[error("Not a supported archive: detected {detected}")]
    NotAnArchive { detected: String },

    #[error("File could not be read: {0}")]
    Unreadable(String),
}

/// Pipeline-level failures.
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Operator session is missing, invalid or expired")]
    Unauthorized,

    #[error("Update not found: {0}")]
    NotFound(Uuid),

    #[error("Update {id} is {status}, only pending updates can be applied")]
    NotPending { id: Uuid, status: UpdateStatus },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: UpdateStatus, to: UpdateStatus },

    #[error("Upload rejected: {0}")]
    Rejected(ScanRejection),

    #[error("No completed update with a backup is available for rollback")]
    NoEligibleBackup,

    #[error("Update {0} is being applied and cannot be deleted")]
    StillProcessing(Uuid),

    #[error(transparent)]
    Extract(#[from] extractor::ExtractError),

    #[error("Backup failed: {0}")]
    Backup(io::Error),

    #[error("Merge failed: {0}")]
    Merge(io::Error),

    #[error("Restore failed: {0}")]
    Restore(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Record store failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Store document is malformed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(Uuid),

    #[error("Record already exists: {0}")]
    Duplicate(Uuid),
}

/// Configuration loading failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl UpdateError {
    /// Whether this failure came from a scanner rejection or an extractor
    /// security rule.
    pub fn is_security(&self) -> bool {
        match self {
            Self::Rejected(_) => true,
            Self::Extract(e) => e.is_security(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_messages_name_values() {
        let msg = ScanRejection::TooLarge { size: 11, limit: 10 }.to_string();
        assert!(msg.contains("11") && msg.contains("10"));

        let msg = ScanRejection::TypeMismatch {
            declared: "image/jpeg".into(),
            detected: "image/png".into(),
        }
        .to_string();
        assert!(msg.contains("image/jpeg") && msg.contains("image/png"));
    }

    #[test]
    fn test_is_security() {
        assert!(UpdateError::Rejected(ScanRejection::UnknownType).is_security());
        assert!(!UpdateError::NoEligibleBackup.is_security());
        let traversal = extractor::ExtractError::Security(
            extractor::SecurityError::PathTraversal("../x".into()),
        );
        assert!(UpdateError::from(traversal).is_security());
    }
}
