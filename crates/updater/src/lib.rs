//! # Updater
//!
//! Staged, reversible site updates from untrusted archives.
//!
//! An uploaded archive is classified from its bytes and scanned before a
//! `pending` record exists. Applying it snapshots the live tree, extracts
//! into a throwaway staging directory with [`extractor`] and merges the result
//! over the tree, leaving preserved paths alone. Rollback restores the newest
//! completed update's snapshot after taking a fresh one.
//!
//! ## Example
//!
//! ```rust,no_run
//! use updater::{DirTree, JsonFileStore, PipelineConfig, UpdatePipeline, UploadedFile};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::for_root("/srv/site");
//! let store = JsonFileStore::open(config.store_path())?;
//! let pipeline = UpdatePipeline::new(config, store, DirTree::new("/srv/site"));
//!
//! let upload = UploadedFile::from_path("/srv/site/updates/site.zip", "site.zip", "application/zip")?;
//! let record = pipeline.create_pending_update(&upload, Some("v2".into()), None)?;
//! let applied = pipeline.apply(record.id)?;
//! println!("{} is {}", applied.version, applied.status);
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod config;
pub mod error;
pub mod gate;
pub mod pipeline;
pub mod record;
pub mod scanner;
pub mod signature;
pub mod store;
pub mod tree;

pub use backup::BackupStore;
pub use config::{PipelineConfig, ScannerConfig};
pub use error::{ConfigError, ScanRejection, StoreError, UpdateError};
pub use gate::{SessionGate, StaticTokenGate, UpdateService};
pub use pipeline::UpdatePipeline;
pub use record::{PendingUpdate, RollbackOutcome, UpdateStatus, UploadedFile};
pub use scanner::{Scanner, ValidationVerdict};
pub use signature::{Classifier, FileKind};
pub use store::{JsonFileStore, MemoryStore, UpdateStore};
pub use tree::{CopyReport, DirTree, LiveTree, RestoreReport};
