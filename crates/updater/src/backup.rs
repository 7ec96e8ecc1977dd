//! Timestamped snapshot directories.

use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::tree::{CopyReport, LiveTree};

/// The directory holding one subdirectory per snapshot.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Claim a fresh, empty snapshot directory named after the current time.
    /// Names are unique even when called twice within the same millisecond.
    pub fn allocate(&self) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let stamp = Utc::now().format("backup-%Y%m%d-%H%M%S-%3f").to_string();

        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                stamp.clone()
            } else {
                format!("{stamp}-{attempt}")
            };
            let candidate = self.dir.join(name);
            match fs::create_dir(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }

    /// Snapshot `tree` into a newly allocated directory.
    pub fn snapshot(&self, tree: &dyn LiveTree, skip: &[String]) -> io::Result<(PathBuf, CopyReport)> {
        let dest = self.allocate()?;
        let report = match tree.snapshot_to(&dest, skip) {
            Ok(report) => report,
            Err(e) => {
                // A partial snapshot is never referenced, so drop it.
                let _ = fs::remove_dir_all(&dest);
                return Err(e);
            }
        };
        info!(
            backup = %dest.display(),
            files = report.files_copied,
            bytes = report.bytes_copied,
            "Snapshot written"
        );
        Ok((dest, report))
    }
}

/// Names directly inside a snapshot; the set a rollback restores.
pub fn top_level_entries(backup: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(backup)? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}
