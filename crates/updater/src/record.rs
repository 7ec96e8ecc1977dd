//! Update records and the DTOs exchanged with the upload boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::UpdateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../../admin/bindings/")]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.pad(name)
    }
}

/// A staged update awaiting, undergoing or finished with application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../../admin/bindings/")]
#[serde(rename_all = "camelCase")]
pub struct PendingUpdate {
    #[ts(type = "string")]
    pub id: Uuid,

    pub version: String,

    pub source_file_name: String,

    #[ts(type = "string")]
    pub source_path: PathBuf,

    #[ts(type = "number")]
    pub source_size_bytes: u64,

    #[ts(optional)]
    pub description: Option<String>,

    pub status: UpdateStatus,

    #[ts(optional)]
    pub error_message: Option<String>,

    #[ts(optional, type = "string")]
    pub backup_path: Option<PathBuf>,

    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,

    #[ts(optional, type = "string")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl PendingUpdate {
    /// New `pending` record for an accepted upload. A missing or blank version
    /// gets a timestamp label.
    pub fn new(file: &UploadedFile, version: Option<String>, description: Option<String>) -> Self {
        let created_at = Utc::now();
        let version = version
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default_version(created_at));

        Self {
            id: Uuid::new_v4(),
            version,
            source_file_name: file.original_name.clone(),
            source_path: file.path.clone(),
            source_size_bytes: file.size_bytes,
            description: description.filter(|d| !d.trim().is_empty()),
            status: UpdateStatus::Pending,
            error_message: None,
            backup_path: None,
            created_at,
            completed_at: None,
        }
    }

    /// `pending -> processing`
    pub fn begin_processing(&mut self) -> Result<(), UpdateError> {
        if self.status != UpdateStatus::Pending {
            return Err(UpdateError::NotPending {
                id: self.id,
                status: self.status,
            });
        }
        self.status = UpdateStatus::Processing;
        Ok(())
    }

    /// `processing -> completed`, recording where the pre-apply backup lives.
    pub fn complete(&mut self, backup_path: PathBuf) -> Result<(), UpdateError> {
        self.finish(UpdateStatus::Completed)?;
        self.backup_path = Some(backup_path);
        self.error_message = None;
        Ok(())
    }

    /// `processing -> failed`. A failed record never references a backup.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), UpdateError> {
        self.finish(UpdateStatus::Failed)?;
        self.error_message = Some(reason.into());
        self.backup_path = None;
        Ok(())
    }

    fn finish(&mut self, to: UpdateStatus) -> Result<(), UpdateError> {
        if self.status != UpdateStatus::Processing {
            return Err(UpdateError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

/// `YYYYMMDD-HHMMSS` in UTC.
pub fn default_version(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d-%H%M%S").to_string()
}

/// A file handed over by the upload boundary, already stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub path: PathBuf,
    pub original_name: String,
    pub declared_type: String,
    pub size_bytes: u64,
}

impl UploadedFile {
    /// Describe a stored file, taking its size from the filesystem.
    pub fn from_path(
        path: impl Into<PathBuf>,
        original_name: impl Into<String>,
        declared_type: impl Into<String>,
    ) -> std::io::Result<Self> {
        let path = path.into();
        let size_bytes = std::fs::metadata(&path)?.len();
        Ok(Self {
            path,
            original_name: original_name.into(),
            declared_type: declared_type.into(),
            size_bytes,
        })
    }
}

/// Result of a rollback.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../../admin/bindings/")]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    pub restored_version: String,

    #[ts(type = "string")]
    pub restored_from_update_id: Uuid,

    /// Backup that was restored
    #[ts(type = "string")]
    pub backup_path: PathBuf,

    /// Snapshot of the tree taken just before restoring
    #[ts(type = "string")]
    pub new_backup_path: PathBuf,

    /// Top-level names replaced in the live tree
    pub restored_paths: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn upload() -> UploadedFile {
        UploadedFile {
            path: PathBuf::from("/srv/site/updates/site.zip"),
            original_name: "site.zip".into(),
            declared_type: "application/zip".into(),
            size_bytes: 1024,
        }
    }

    #[test]
    fn test_default_version_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(default_version(at), "20240307-090501");
    }

    #[test]
    fn test_new_record_is_pending() {
        let record = PendingUpdate::new(&upload(), Some("  ".into()), None);
        assert_eq!(record.status, UpdateStatus::Pending);
        assert_eq!(record.version.len(), "YYYYMMDD-HHMMSS".len());
        assert!(record.backup_path.is_none());
        assert!(record.error_message.is_none());
        assert!(record.completed_at.is_none());
        assert_eq!(record.source_size_bytes, 1024);

        let labelled = PendingUpdate::new(&upload(), Some("v2.1".into()), Some("Spring".into()));
        assert_eq!(labelled.version, "v2.1");
        assert_eq!(labelled.description.as_deref(), Some("Spring"));
    }

    #[test]
    fn test_transitions() {
        let mut record = PendingUpdate::new(&upload(), None, None);
        assert!(matches!(
            record.complete(PathBuf::from("/b")),
            Err(UpdateError::InvalidTransition { .. })
        ));

        record.begin_processing().unwrap();
        assert!(matches!(
            record.begin_processing(),
            Err(UpdateError::NotPending { status: UpdateStatus::Processing, .. })
        ));

        record.complete(PathBuf::from("/b")).unwrap();
        assert_eq!(record.status, UpdateStatus::Completed);
        assert!(record.completed_at.is_some());
        assert!(record.fail("late").is_err());
        assert!(record.error_message.is_none());
    }

    #[test]
    fn test_failed_record_has_no_backup() {
        let mut record = PendingUpdate::new(&upload(), None, None);
        record.begin_processing().unwrap();
        record.fail("Archive security violation").unwrap();
        assert_eq!(record.status, UpdateStatus::Failed);
        assert!(record.backup_path.is_none());
        assert_eq!(record.error_message.as_deref(), Some("Archive security violation"));
    }

    #[test]
    fn test_serializes_camel_case() {
        let record = PendingUpdate::new(&upload(), Some("1".into()), None);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["sourceFileName"], "site.zip");
        assert!(json["completedAt"].is_null());
    }
}
