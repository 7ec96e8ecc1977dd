//! The live site tree the pipeline backs up, merges into and restores.

use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Counters from a recursive copy.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyReport {
    pub files_copied: u64,
    pub directories_created: u64,
    pub bytes_copied: u64,
    /// Relative paths left untouched because they were excluded
    pub skipped: Vec<String>,
}

/// Per-name results of restoring from a backup.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub failures: Vec<(String, String)>,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Filesystem operations the pipeline performs on the live tree.
pub trait LiveTree: Send + Sync {
    fn root(&self) -> &Path;

    /// Copy the tree into `dest`, leaving out anything at or under a `skip` path.
    fn snapshot_to(&self, dest: &Path, skip: &[String]) -> io::Result<CopyReport>;

    /// Copy `staged` over the tree, leaving anything at or under a
    /// `preserved` path as it is.
    fn merge_from(&self, staged: &Path, preserved: &[String]) -> io::Result<CopyReport>;

    /// Replace each top-level `name` in the tree with the backup's copy.
    fn restore_from(&self, backup: &Path, names: &[String]) -> RestoreReport;
}

/// A [`LiveTree`] rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct DirTree {
    root: PathBuf,
}

impl DirTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl LiveTree for DirTree {
    fn root(&self) -> &Path {
        &self.root
    }

    fn snapshot_to(&self, dest: &Path, skip: &[String]) -> io::Result<CopyReport> {
        fs::create_dir_all(dest)?;
        // Compare canonical paths so a relative root still recognizes `dest`.
        let root = fs::canonicalize(&self.root)?;
        let dest = fs::canonicalize(dest)?;
        copy_tree(&root, &dest, &relative_set(skip), Some(&dest))
    }

    fn merge_from(&self, staged: &Path, preserved: &[String]) -> io::Result<CopyReport> {
        fs::create_dir_all(&self.root)?;
        copy_tree(staged, &self.root, &relative_set(preserved), None)
    }

    fn restore_from(&self, backup: &Path, names: &[String]) -> RestoreReport {
        let mut report = RestoreReport::default();

        for name in names {
            match restore_one(&backup.join(name), &self.root.join(name)) {
                Ok(()) => report.restored.push(name.clone()),
                Err(e) => {
                    warn!(entry = %name, error = %e, "Failed to restore entry");
                    report.failures.push((name.clone(), e.to_string()));
                }
            }
        }

        report
    }
}

/// Normalize configured relative paths, dropping anything that tries to
/// leave the tree.
fn relative_set(paths: &[String]) -> Vec<PathBuf> {
    paths
        .iter()
        .map(|p| PathBuf::from(p.trim_matches('/').replace('\\', "/")))
        .filter(|p| {
            !p.as_os_str().is_empty()
                && p.components().all(|c| matches!(c, std::path::Component::Normal(_)))
        })
        .collect()
}

fn is_excluded(rel: &Path, excluded: &[PathBuf]) -> bool {
    excluded.iter().any(|ex| rel.starts_with(ex))
}

/// Whether an excluded path lives somewhere under `rel`.
fn shelters_excluded(rel: &Path, excluded: &[PathBuf]) -> bool {
    excluded.iter().any(|ex| ex.starts_with(rel))
}

/// Recursively copy `src` into `dest`. Paths matching `excluded` are pruned
/// whole; `avoid` is never descended into.
fn copy_tree(
    src: &Path,
    dest: &Path,
    excluded: &[PathBuf],
    avoid: Option<&Path>,
) -> io::Result<CopyReport> {
    let mut report = CopyReport::default();
    let mut skipped = Vec::new();

    let walker = WalkDir::new(src).follow_links(false).into_iter().filter_entry(|entry| {
        if avoid.is_some_and(|a| entry.path() == a) {
            return false;
        }
        match entry.path().strip_prefix(src) {
            Ok(rel) if is_excluded(rel, excluded) => {
                skipped.push(rel.to_string_lossy().replace('\\', "/"));
                false
            }
            _ => true,
        }
    });

    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            if let Ok(meta) = fs::symlink_metadata(&target) {
                if !meta.is_dir() {
                    fs::remove_file(&target)?;
                }
            }
            if !target.exists() {
                fs::create_dir_all(&target)?;
                report.directories_created += 1;
            }
            continue;
        }

        if let Ok(meta) = fs::symlink_metadata(&target) {
            if meta.is_dir() {
                if shelters_excluded(rel, excluded) {
                    debug!(path = %rel.display(), "Keeping directory that holds an excluded path");
                    report.skipped.push(rel.to_string_lossy().replace('\\', "/"));
                    continue;
                }
                fs::remove_dir_all(&target)?;
            } else {
                fs::remove_file(&target)?;
            }
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            report.bytes_copied += fs::copy(entry.path(), &target)?;
        }
        report.files_copied += 1;
    }

    report.skipped.extend(skipped);
    Ok(report)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
    let link = fs::read_link(src)?;
    std::os::unix::fs::symlink(link, dest)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, _dest: &Path) -> io::Result<()> {
    warn!(path = %src.display(), "Skipping symlink on this platform");
    Ok(())
}

fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn restore_one(from: &Path, to: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(from)?;
    remove_path(to)?;

    if meta.is_dir() {
        fs::create_dir_all(to)?;
        copy_tree(from, to, &[], None)?;
    } else if meta.file_type().is_symlink() {
        copy_symlink(from, to)?;
    } else {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(from, to)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, data: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    fn read(root: &Path, rel: &str) -> String {
        fs::read_to_string(root.join(rel)).unwrap()
    }

    #[test]
    fn test_relative_set_drops_escaping_paths() {
        let set = relative_set(&[
            "uploads".into(),
            "/shared/schema.ts".into(),
            "../etc".into(),
            "".into(),
        ]);
        assert_eq!(set, vec![PathBuf::from("uploads"), PathBuf::from("shared/schema.ts")]);
    }

    #[test]
    fn test_snapshot_skips_configured_dirs() {
        let live = TempDir::new().unwrap();
        write(live.path(), "index.html", "v1");
        write(live.path(), "node_modules/pkg/index.js", "x");
        write(live.path(), "client/app.js", "app");
        let dest = live.path().join("backups").join("snap");

        let tree = DirTree::new(live.path());
        let report = tree
            .snapshot_to(&dest, &["node_modules".into(), "backups".into()])
            .unwrap();

        assert_eq!(read(&dest, "index.html"), "v1");
        assert_eq!(read(&dest, "client/app.js"), "app");
        assert!(!dest.join("node_modules").exists());
        assert!(!dest.join("backups").exists());
        assert_eq!(report.files_copied, 2);
    }

    #[test]
    fn test_snapshot_never_recurses_into_destination() {
        let live = TempDir::new().unwrap();
        write(live.path(), "index.html", "v1");
        let dest = live.path().join("snapshots").join("one");

        DirTree::new(live.path()).snapshot_to(&dest, &[]).unwrap();
        assert_eq!(read(&dest, "index.html"), "v1");
        assert!(!dest.join("snapshots").join("one").exists());
    }

    #[test]
    fn test_snapshot_recognizes_destination_through_indirect_root() {
        let live = TempDir::new().unwrap();
        write(live.path(), "index.html", "v1");
        write(live.path(), "client/app.js", "app");
        let dest = live.path().join("snapshots").join("one");

        let indirect = live.path().join("client").join("..");
        DirTree::new(indirect).snapshot_to(&dest, &[]).unwrap();

        assert_eq!(read(&dest, "client/app.js"), "app");
        assert!(!dest.join("snapshots").join("one").exists());
    }

    #[test]
    fn test_merge_preserves_nested_file() {
        let live = TempDir::new().unwrap();
        let staged = TempDir::new().unwrap();
        write(live.path(), "shared/schema.ts", "live schema");
        write(live.path(), "shared/types.ts", "old types");
        write(staged.path(), "shared/schema.ts", "staged schema");
        write(staged.path(), "shared/types.ts", "new types");
        write(staged.path(), "uploads/photo.jpg", "staged photo");

        let report = DirTree::new(live.path())
            .merge_from(staged.path(), &["shared/schema.ts".into(), "uploads".into()])
            .unwrap();

        assert_eq!(read(live.path(), "shared/schema.ts"), "live schema");
        assert_eq!(read(live.path(), "shared/types.ts"), "new types");
        assert!(!live.path().join("uploads").exists());
        assert!(report.skipped.contains(&"shared/schema.ts".to_string()));
        assert!(report.skipped.contains(&"uploads".to_string()));
    }

    #[test]
    fn test_merge_does_not_replace_directory_holding_preserved_path() {
        let live = TempDir::new().unwrap();
        let staged = TempDir::new().unwrap();
        write(live.path(), "server/storage.ts", "keep");
        write(staged.path(), "server", "now a file");

        DirTree::new(live.path())
            .merge_from(staged.path(), &["server/storage.ts".into()])
            .unwrap();

        assert_eq!(read(live.path(), "server/storage.ts"), "keep");
    }

    #[test]
    fn test_restore_replaces_named_entries() {
        let live = TempDir::new().unwrap();
        let backup = TempDir::new().unwrap();
        write(backup.path(), "index.html", "old");
        write(backup.path(), "client/app.js", "old app");
        write(live.path(), "index.html", "new");
        write(live.path(), "client/app.js", "new app");
        write(live.path(), "client/extra.js", "added by update");

        let report = DirTree::new(live.path()).restore_from(
            backup.path(),
            &["index.html".into(), "client".into(), "missing".into()],
        );

        assert_eq!(read(live.path(), "index.html"), "old");
        assert_eq!(read(live.path(), "client/app.js"), "old app");
        assert!(!live.path().join("client/extra.js").exists());
        assert_eq!(report.restored, ["index.html", "client"]);
        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_complete());
    }
}
