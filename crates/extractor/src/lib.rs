//! # Extractor
//!
//! Hardened archive extraction for untrusted uploads.
//!
//! Every entry is checked before anything touches the disk: path traversal
//! (including symlinked parents), absolute paths, blocked extensions and file
//! names, path length and entry count. File contents are counted as they are
//! decompressed, so archives that lie about their own sizes are caught
//! mid-write.
//!
//! ## Supported Formats
//!
//! - ZIP
//! - TAR (plain, gzip, bzip2)
//!
//! Formats are identified from leading bytes, never from the file name.
//!
//! ## Example
//!
//! ```rust,no_run
//! use extractor::{extract, probe, ExtractLimits};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let info = probe(Path::new("update.zip"))?;
//! println!("Format: {}, Entries: {}", info.format, info.entries);
//!
//! let limits = ExtractLimits::default();
//! let progress_cb = |file: &str, bytes: u64| {
//!     println!("Extracting: {} ({} bytes so far)", file, bytes);
//! };
//!
//! let stats = extract(
//!     Path::new("update.zip"),
//!     Path::new("staging"),
//!     &limits,
//!     &progress_cb,
//! )?;
//!
//! println!("Extracted {} files ({} bytes)", stats.files_extracted, stats.bytes_written);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod extract;
pub mod probe;
pub mod safety;
pub mod types;

// Re-export main types
pub use error::{ExtractError, SecurityError};
pub use extract::JobPhase;
pub use safety::EntryType;
pub use types::{ArchiveEntry, ArchiveFormat, ArchiveInfo, ExtractLimits, ExtractStats};

use std::path::Path;

/// Type alias for progress callback functions.
///
/// The callback receives the entry just written and the running total of
/// bytes written for the whole archive.
pub type ProgressCallback = dyn Fn(&str, u64) + Send + Sync;

/// Probe an archive to retrieve its entry listing without extracting.
pub fn probe(path: &Path) -> Result<ArchiveInfo, ExtractError> {
    probe::probe_archive(path)
}

/// Extract an archive into `output_dir` under the given limits.
///
/// # Errors
///
/// Returns an error if:
/// - The archive file doesn't exist, is corrupted, or has an unknown signature
/// - Any entry violates a security rule or resource limit
/// - I/O errors occur
pub fn extract(
    archive_path: &Path,
    output_dir: &Path,
    limits: &ExtractLimits,
    progress_cb: &ProgressCallback,
) -> Result<ExtractStats, ExtractError> {
    extract::extract_archive(archive_path, output_dir, limits, progress_cb)
}
