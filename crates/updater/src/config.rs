//! Pipeline configuration, loaded from a JSON document.

use chrono::{DateTime, Utc};
use extractor::ExtractLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Scanner ceilings and the dangerous-extension denylist.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScannerConfig {
    /// Hard limit for ordinary files
    pub max_file_bytes: u64,

    /// Hard limit for update archives
    pub max_archive_bytes: u64,

    /// Files above this size are accepted with a warning
    pub warn_file_bytes: u64,

    /// Archives above this size are accepted with a warning
    pub warn_archive_bytes: u64,

    /// Extensions (without the dot) rejected regardless of content
    pub blocked_extensions: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 10 * 1024 * 1024,     // 10 MB
            max_archive_bytes: 100 * 1024 * 1024, // 100 MB
            warn_file_bytes: 5 * 1024 * 1024,
            warn_archive_bytes: 50 * 1024 * 1024,
            blocked_extensions: [
                // executables and installers
                "exe", "com", "scr", "pif", "msi", "msp", "app", "dmg", "deb", "rpm", "apk",
                "bin", "run",
                // scripts
                "bat", "cmd", "ps1", "psm1", "vbs", "vbe", "js", "jse", "wsf", "wsh", "hta",
                "sh", "bash", "py", "pl", "rb", "php", "phtml", "asp", "aspx", "jsp", "cgi",
                // shortcuts and system
                "lnk", "url", "scf", "inf", "reg", "cpl", "jar",
                // macro-enabled office
                "docm", "dotm", "xlsm", "xltm", "xlam", "pptm", "potm", "ppam", "sldm",
                // shared libraries
                "dll", "so", "dylib", "sys", "ocx",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Everything the pipeline and CLI need to run against one site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Root of the live site tree
    pub live_root: PathBuf,

    /// Uploaded archives and staging directories
    pub updates_dir: PathBuf,

    /// One subdirectory per snapshot
    pub backups_dir: PathBuf,

    /// JSON record store
    pub store_file: PathBuf,

    /// Relative paths never overwritten by an update
    pub preserved_paths: Vec<String>,

    /// Relative paths left out of backups
    pub backup_skip: Vec<String>,

    /// Restore the pre-apply backup when an apply fails
    pub rollback_on_failure: bool,

    /// Operator session token accepted by the default gate
    pub operator_token: Option<String>,

    /// Token expiry; no expiry when absent
    pub token_expires_at: Option<DateTime<Utc>>,

    pub scanner: ScannerConfig,

    pub extract: ExtractLimits,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            live_root: PathBuf::from("."),
            updates_dir: PathBuf::from("updates"),
            backups_dir: PathBuf::from("backups"),
            store_file: PathBuf::from("updates/updates.json"),
            preserved_paths: ["shared/schema.ts", "server/storage.ts", "uploads"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            backup_skip: [
                ".git",
                "node_modules",
                "backups",
                "updates",
                "uploads",
                ".config",
                ".cache",
                ".local",
                ".upm",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            rollback_on_failure: false,
            operator_token: None,
            token_expires_at: None,
            scanner: ScannerConfig::default(),
            extract: ExtractLimits::default(),
        }
    }
}

impl PipelineConfig {
    /// Read a config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults rooted at `live_root`.
    pub fn for_root(live_root: impl Into<PathBuf>) -> Self {
        Self {
            live_root: live_root.into(),
            ..Self::default()
        }
    }

    pub fn updates_path(&self) -> PathBuf {
        self.resolve(&self.updates_dir)
    }

    pub fn backups_path(&self) -> PathBuf {
        self.resolve(&self.backups_dir)
    }

    pub fn store_path(&self) -> PathBuf {
        self.resolve(&self.store_file)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.live_root.join(path)
        }
    }
}
