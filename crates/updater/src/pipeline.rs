//! The update pipeline: upload, apply, rollback, delete.
//!
//! ```text
//! pending --apply()--> processing --success--> completed
//!                               \--failure--> failed
//! ```

use extractor::{ExtractStats, ProgressCallback};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backup::{top_level_entries, BackupStore};
use crate::config::PipelineConfig;
use crate::error::{ScanRejection, UpdateError};
use crate::record::{PendingUpdate, RollbackOutcome, UpdateStatus, UploadedFile};
use crate::scanner::{Scanner, ValidationVerdict};
use crate::store::UpdateStore;
use crate::tree::LiveTree;

/// An apply that went wrong, with the backup taken before it (if any).
struct ApplyFailure {
    backup: Option<PathBuf>,
    error: UpdateError,
}

impl ApplyFailure {
    fn before_backup(error: UpdateError) -> Self {
        Self { backup: None, error }
    }

    fn after_backup(backup: &Path, error: UpdateError) -> Self {
        Self {
            backup: Some(backup.to_path_buf()),
            error,
        }
    }
}

/// Staged-update mechanism over one live tree.
pub struct UpdatePipeline<S: UpdateStore, T: LiveTree> {
    config: PipelineConfig,
    store: S,
    tree: T,
    scanner: Scanner,
    backups: BackupStore,
}

impl<S: UpdateStore, T: LiveTree> UpdatePipeline<S, T> {
    pub fn new(config: PipelineConfig, store: S, tree: T) -> Self {
        let scanner = Scanner::new(config.scanner.clone());
        let backups = BackupStore::new(config.backups_path());
        Self {
            config,
            store,
            tree,
            scanner,
            backups,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run the archive scan on an upload without touching it.
    pub fn scan(&self, file: &UploadedFile) -> ValidationVerdict {
        self.scanner.validate_archive(file)
    }

    /// Scan an uploaded archive and stage it as a `pending` update.
    ///
    /// A rejected upload is deleted from disk and no record is created.
    pub fn create_pending_update(
        &self,
        file: &UploadedFile,
        version: Option<String>,
        description: Option<String>,
    ) -> Result<PendingUpdate, UpdateError> {
        let verdict = self.scan(file);

        if !verdict.accepted {
            warn!(
                target: "security",
                file = %file.original_name,
                declared = %file.declared_type,
                detected = ?verdict.detected_type,
                hash = ?verdict.content_hash,
                reason = ?verdict.reason,
                "Upload rejected"
            );
            if let Err(e) = fs::remove_file(&file.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %file.path.display(), error = %e, "Failed to delete rejected upload");
                }
            }
            let rejection = verdict.rejection.unwrap_or(ScanRejection::UnknownType);
            return Err(UpdateError::Rejected(rejection));
        }

        for warning in &verdict.warnings {
            warn!(file = %file.original_name, "{}", warning);
        }

        let record = self
            .store
            .create(PendingUpdate::new(file, version, description))?;
        info!(
            id = %record.id,
            version = %record.version,
            file = %record.source_file_name,
            hash = ?verdict.content_hash,
            "Update staged"
        );
        Ok(record)
    }

    pub fn get(&self, id: Uuid) -> Result<PendingUpdate, UpdateError> {
        self.store.get(id)?.ok_or(UpdateError::NotFound(id))
    }

    /// All records, newest first.
    pub fn list_updates(&self) -> Result<Vec<PendingUpdate>, UpdateError> {
        Ok(self.store.list()?)
    }

    /// Apply a pending update. See [`Self::apply_with_progress`].
    pub fn apply(&self, id: Uuid) -> Result<PendingUpdate, UpdateError> {
        self.apply_with_progress(id, &|_: &str, _: u64| {})
    }

    /// Back up the live tree, extract the archive into a staging directory
    /// and merge it over the tree, reporting extraction progress.
    ///
    /// Only `pending` records can be applied; anything else fails without
    /// side effects. On failure the record is persisted as `failed` and the
    /// cause is returned.
    pub fn apply_with_progress(
        &self,
        id: Uuid,
        progress_cb: &ProgressCallback,
    ) -> Result<PendingUpdate, UpdateError> {
        let mut record = self.get(id)?;
        record.begin_processing()?;
        self.store.update(&record)?;
        info!(id = %record.id, version = %record.version, "Applying update");

        match self.run_apply(&record, progress_cb) {
            Ok((backup, stats)) => {
                record.complete(backup)?;
                self.store.update(&record)?;
                info!(
                    id = %record.id,
                    version = %record.version,
                    files = stats.files_extracted,
                    bytes = stats.bytes_written,
                    "Update applied"
                );
                Ok(record)
            }
            Err(failure) => {
                if failure.error.is_security() {
                    warn!(
                        target: "security",
                        id = %record.id,
                        file = %record.source_file_name,
                        error = %failure.error,
                        "Update aborted"
                    );
                } else {
                    warn!(id = %record.id, error = %failure.error, "Update failed");
                }

                if let Some(backup) = &failure.backup {
                    if self.config.rollback_on_failure {
                        self.revert_to(backup);
                    } else {
                        info!(backup = %backup.display(), "Pre-apply snapshot kept");
                    }
                }

                record.fail(failure.error.to_string())?;
                self.store.update(&record)?;
                Err(failure.error)
            }
        }
    }

    fn run_apply(
        &self,
        record: &PendingUpdate,
        progress_cb: &ProgressCallback,
    ) -> Result<(PathBuf, ExtractStats), ApplyFailure> {
        let (backup, _) = self
            .backups
            .snapshot(&self.tree, &self.config.backup_skip)
            .map_err(|e| ApplyFailure::before_backup(UpdateError::Backup(e)))?;

        let updates_dir = self.config.updates_path();
        let staging = fs::create_dir_all(&updates_dir)
            .and_then(|_| {
                tempfile::Builder::new()
                    .prefix("staging-")
                    .tempdir_in(&updates_dir)
            })
            .map_err(|e| ApplyFailure::after_backup(&backup, UpdateError::Io(e)))?;
        debug!(staging = %staging.path().display(), "Extracting into staging directory");

        let stats = extractor::extract(
            &record.source_path,
            staging.path(),
            &self.config.extract,
            progress_cb,
        )
        .map_err(|e| ApplyFailure::after_backup(&backup, UpdateError::Extract(e)))?;

        let report = self
            .tree
            .merge_from(staging.path(), &self.merge_exclusions())
            .map_err(|e| ApplyFailure::after_backup(&backup, UpdateError::Merge(e)))?;
        debug!(
            files = report.files_copied,
            preserved = ?report.skipped,
            "Merged staged tree"
        );

        if let Err(e) = staging.close() {
            warn!(error = %e, "Failed to remove staging directory");
        }

        Ok((backup, stats))
    }

    /// Preserved paths plus everything the pipeline keeps inside the live
    /// tree, so an archive can never overwrite backups, staged uploads or
    /// the record store.
    fn merge_exclusions(&self) -> Vec<String> {
        let root = self.tree.root();
        let mut excluded = self.config.preserved_paths.clone();
        let owned = [
            self.config.updates_path(),
            self.backups.dir().to_path_buf(),
            self.config.store_path(),
        ];
        for path in &owned {
            match relative_inside(root, path) {
                Some(rel) => excluded.push(rel),
                None => debug!(path = %path.display(), "Pipeline path outside live tree"),
            }
        }
        excluded
    }

    /// Best-effort restore after a failed apply.
    fn revert_to(&self, backup: &Path) {
        let names = match top_level_entries(backup) {
            Ok(names) => names,
            Err(e) => {
                warn!(backup = %backup.display(), error = %e, "Cannot read backup for revert");
                return;
            }
        };
        let report = self.tree.restore_from(backup, &names);
        if report.is_complete() {
            info!(backup = %backup.display(), "Reverted live tree after failed apply");
        } else {
            warn!(backup = %backup.display(), failures = ?report.failures, "Revert incomplete");
        }
    }

    /// Restore the live tree from the newest completed update's backup.
    ///
    /// The current tree is snapshotted first, so every run leaves a new
    /// backup behind. Records are never modified.
    pub fn rollback(&self) -> Result<RollbackOutcome, UpdateError> {
        let (record, backup) = self
            .store
            .list()?
            .into_iter()
            .filter(|r| r.status == UpdateStatus::Completed)
            .filter_map(|r| {
                let backup = r.backup_path.clone().filter(|p| p.is_dir())?;
                Some((r, backup))
            })
            .max_by_key(|(r, _)| r.completed_at)
            .ok_or(UpdateError::NoEligibleBackup)?;

        let names = top_level_entries(&backup).map_err(|e| UpdateError::Restore(e.to_string()))?;

        let (new_backup, _) = self
            .backups
            .snapshot(&self.tree, &self.config.backup_skip)
            .map_err(UpdateError::Backup)?;

        info!(
            version = %record.version,
            backup = %backup.display(),
            snapshot = %new_backup.display(),
            "Rolling back"
        );

        let report = self.tree.restore_from(&backup, &names);
        if !report.is_complete() {
            let detail = report
                .failures
                .iter()
                .map(|(name, error)| format!("{name}: {error}"))
                .collect::<Vec<_>>()
                .join("; ");
            warn!(snapshot = %new_backup.display(), "Rollback incomplete: {}", detail);
            return Err(UpdateError::Restore(detail));
        }

        Ok(RollbackOutcome {
            restored_version: record.version,
            restored_from_update_id: record.id,
            backup_path: backup,
            new_backup_path: new_backup,
            restored_paths: report.restored,
        })
    }

    /// Remove a record with its archive and backup.
    pub fn delete(&self, id: Uuid) -> Result<(), UpdateError> {
        let record = self.get(id)?;
        if record.status == UpdateStatus::Processing {
            return Err(UpdateError::StillProcessing(id));
        }

        remove_if_present(&record.source_path, false)?;
        if let Some(backup) = &record.backup_path {
            remove_if_present(backup, true)?;
        }
        self.store.remove(id)?;
        info!(id = %id, version = %record.version, "Update deleted");
        Ok(())
    }
}

/// `path` relative to `root`, when it lies strictly inside it. Falls back to
/// canonical paths so relative and absolute spellings compare equal.
fn relative_inside(root: &Path, path: &Path) -> Option<String> {
    let rel = match path.strip_prefix(root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => {
            let root = fs::canonicalize(root).ok()?;
            canonical_lenient(path)?.strip_prefix(&root).ok()?.to_path_buf()
        }
    };
    if rel.as_os_str().is_empty() {
        return None;
    }
    Some(rel.to_string_lossy().replace('\\', "/"))
}

/// Canonicalize `path`, or its parent when the path itself does not exist yet.
fn canonical_lenient(path: &Path) -> Option<PathBuf> {
    fs::canonicalize(path).ok().or_else(|| {
        let parent = fs::canonicalize(path.parent()?).ok()?;
        Some(parent.join(path.file_name()?))
    })
}

fn remove_if_present(path: &Path, dir: bool) -> io::Result<()> {
    let result = if dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
