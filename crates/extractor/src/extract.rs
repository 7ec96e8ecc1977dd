//! Archive extraction implementation with security features.

use crate::error::{ExtractError, SecurityError};
use crate::safety::{
    check_entry_name, check_total_size, is_safe_entry_type, resolve_within, validate_entry_path,
    EntryType,
};
use crate::types::{ArchiveFormat, ExtractLimits, ExtractStats};
use crate::ProgressCallback;
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

const COPY_BUFFER_BYTES: usize = 64 * 1024;
const SNIFF_BYTES: usize = 512;

/// Lifecycle of a single extraction job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Opening,
    ReadingEntries,
    Extracting,
    Completed,
    Aborted,
}

/// Extract an archive to the specified output directory.
///
/// This function performs secure extraction with the following features:
/// - Format detection from leading bytes, never from the file name
/// - Path validation to prevent zip-slip attacks, including symlinked parents
/// - Entry count, per-entry and aggregate size limits counted on the actual
///   decompressed stream
/// - Extension and file name denylists
///
/// The job aborts on the first violation. Files written before the violation
/// are left in place; the caller owns `output_dir` and is expected to discard it.
pub fn extract_archive(
    archive_path: &Path,
    output_dir: &Path,
    limits: &ExtractLimits,
    progress_cb: &ProgressCallback,
) -> Result<ExtractStats, ExtractError> {
    let start_time = Instant::now();

    if !archive_path.exists() {
        return Err(ExtractError::NotFound(archive_path.to_path_buf()));
    }

    let (file, format) = open_archive(archive_path)?;

    fs::create_dir_all(output_dir)?;
    let root = output_dir.canonicalize()?;

    let mut job = ExtractionJob::new(root, limits, progress_cb);
    debug!(archive = %archive_path.display(), %format, "Opened archive");

    let result = match format {
        ArchiveFormat::Zip => extract_zip(file, &mut job),
        ArchiveFormat::Tar => extract_tar(BufReader::new(file), &mut job),
        ArchiveFormat::TarGz => extract_tar(GzDecoder::new(BufReader::new(file)), &mut job),
        ArchiveFormat::TarBz2 => extract_tar(BzDecoder::new(BufReader::new(file)), &mut job),
    };

    match result {
        Ok(()) => {
            job.transition(JobPhase::Completed);
            let mut stats = job.stats;
            stats.duration = start_time.elapsed();
            info!(
                archive = %archive_path.display(),
                files = stats.files_extracted,
                bytes = stats.bytes_written,
                "Extraction completed"
            );
            Ok(stats)
        }
        Err(e) => {
            job.transition(JobPhase::Aborted);
            if e.is_security() {
                warn!(
                    target: "security",
                    archive = %archive_path.display(),
                    entries_seen = job.entries_seen,
                    error = %e,
                    "Extraction aborted"
                );
            } else {
                warn!(archive = %archive_path.display(), error = %e, "Extraction failed");
            }
            Err(e)
        }
    }
}

/// Opens an archive and identifies its container format from the leading bytes.
/// The returned handle is rewound to the start.
pub(crate) fn open_archive(archive_path: &Path) -> Result<(File, ArchiveFormat), ExtractError> {
    let mut file = File::open(archive_path)?;
    let mut header = [0u8; SNIFF_BYTES];
    let read = read_prefix(&mut file, &mut header)?;

    let format = ArchiveFormat::sniff(&header[..read]).ok_or_else(|| {
        ExtractError::UnsupportedFormat(format!(
            "Unrecognized archive signature: {}",
            archive_path.display()
        ))
    })?;

    file.seek(SeekFrom::Start(0))?;
    Ok((file, format))
}

fn read_prefix<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Mutable bookkeeping for one archive being unpacked.
struct ExtractionJob<'a> {
    root: PathBuf,
    limits: &'a ExtractLimits,
    progress_cb: &'a ProgressCallback,
    phase: JobPhase,
    entries_seen: u64,
    stats: ExtractStats,
}

impl<'a> ExtractionJob<'a> {
    fn new(root: PathBuf, limits: &'a ExtractLimits, progress_cb: &'a ProgressCallback) -> Self {
        Self {
            root,
            limits,
            progress_cb,
            phase: JobPhase::Opening,
            entries_seen: 0,
            stats: ExtractStats::default(),
        }
    }

    fn transition(&mut self, phase: JobPhase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "Extraction phase");
            self.phase = phase;
        }
    }

    /// Runs every entry-level check and returns the resolved destination.
    /// Nothing is created on disk until this returns `Ok`.
    fn admit(&mut self, raw: &str, entry_type: EntryType) -> Result<PathBuf, ExtractError> {
        self.entries_seen += 1;
        if self.entries_seen > self.limits.max_entries {
            return Err(SecurityError::TooManyEntries {
                limit: self.limits.max_entries,
            }
            .into());
        }

        if !is_safe_entry_type(entry_type) {
            return Err(SecurityError::UnsafeEntryType(format!("{raw} ({entry_type:?})")).into());
        }

        let normalized = validate_entry_path(raw)?;
        check_entry_name(raw, &normalized, self.limits)?;
        let target = resolve_within(&self.root, &normalized, raw)?;

        self.transition(JobPhase::Extracting);
        Ok(target)
    }

    fn write_directory(&mut self, target: &Path) -> Result<(), ExtractError> {
        fs::create_dir_all(target)?;
        self.stats.directories_created += 1;
        Ok(())
    }

    /// Streams one file entry to disk, counting the bytes actually produced by
    /// the decompressor rather than trusting the declared size.
    fn write_file<R: Read>(
        &mut self,
        raw: &str,
        target: &Path,
        reader: &mut R,
        declared_size: u64,
    ) -> Result<(), ExtractError> {
        let entry_limit = self.limits.max_entry_bytes;
        if declared_size > entry_limit {
            return Err(SecurityError::EntryTooLarge {
                entry: raw.to_string(),
                size: declared_size,
                limit: entry_limit,
            }
            .into());
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut output = File::create(target)?;
        let mut buffer = vec![0u8; COPY_BUFFER_BYTES];
        let mut entry_written: u64 = 0;

        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(map_stream_error(e)),
            };

            entry_written += read as u64;
            if entry_written > entry_limit {
                return Err(SecurityError::EntryTooLarge {
                    entry: raw.to_string(),
                    size: entry_written,
                    limit: entry_limit,
                }
                .into());
            }

            let total = self.stats.bytes_written + read as u64;
            check_total_size(raw, total, self.limits.max_total_bytes)?;

            output.write_all(&buffer[..read])?;
            self.stats.bytes_written = total;
        }

        output.flush()?;
        self.stats.files_extracted += 1;
        (self.progress_cb)(raw, self.stats.bytes_written);
        Ok(())
    }
}

fn extract_zip(file: File, job: &mut ExtractionJob<'_>) -> Result<(), ExtractError> {
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(map_zip_error)?;
    job.transition(JobPhase::ReadingEntries);

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(map_zip_error)?;
        let raw = entry.name().to_string();
        let entry_type = zip_entry_type(entry.unix_mode(), entry.is_dir());

        let target = job.admit(&raw, entry_type)?;
        if entry_type == EntryType::Directory {
            job.write_directory(&target)?;
        } else {
            let declared = entry.size();
            job.write_file(&raw, &target, &mut entry, declared)?;
        }
    }

    Ok(())
}

fn zip_entry_type(unix_mode: Option<u32>, is_dir: bool) -> EntryType {
    const S_IFMT: u32 = 0o170000;

    match unix_mode.map(|mode| mode & S_IFMT) {
        Some(0o120000) => EntryType::Symlink,
        Some(0o040000) => EntryType::Directory,
        Some(0o100000) | Some(0) | None => {
            if is_dir {
                EntryType::Directory
            } else {
                EntryType::File
            }
        }
        Some(_) => EntryType::Other,
    }
}

fn extract_tar<R: Read>(reader: R, job: &mut ExtractionJob<'_>) -> Result<(), ExtractError> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive.entries().map_err(map_stream_error)?;
    job.transition(JobPhase::ReadingEntries);

    for entry in entries {
        let mut entry = entry.map_err(map_stream_error)?;
        let entry_type = match entry.header().entry_type() {
            tar::EntryType::Regular | tar::EntryType::Continuous => EntryType::File,
            tar::EntryType::Directory => EntryType::Directory,
            tar::EntryType::Symlink => EntryType::Symlink,
            tar::EntryType::Link => EntryType::Hardlink,
            // Metadata records carry no file content of their own.
            tar::EntryType::XGlobalHeader | tar::EntryType::XHeader => continue,
            _ => EntryType::Other,
        };
        let raw = String::from_utf8_lossy(&entry.path_bytes()).into_owned();

        let target = job.admit(&raw, entry_type)?;
        if entry_type == EntryType::Directory {
            job.write_directory(&target)?;
        } else {
            let declared = entry.size();
            job.write_file(&raw, &target, &mut entry, declared)?;
        }
    }

    Ok(())
}

/// Map zip crate errors onto extraction errors.
pub(crate) fn map_zip_error(e: zip::result::ZipError) -> ExtractError {
    match e {
        zip::result::ZipError::Io(io_err) => map_stream_error(io_err),
        zip::result::ZipError::UnsupportedArchive(msg) => {
            ExtractError::UnsupportedFormat(msg.to_string())
        }
        other => ExtractError::Corrupted(other.to_string()),
    }
}

/// Decompression failures surface as `InvalidData`/`UnexpectedEof` I/O errors;
/// report those as corruption rather than disk trouble.
pub(crate) fn map_stream_error(e: io::Error) -> ExtractError {
    match e.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
            ExtractError::Corrupted(e.to_string())
        }
        _ => ExtractError::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zip_entry_type_from_mode() {
        assert_eq!(zip_entry_type(Some(0o120777), false), EntryType::Symlink);
        assert_eq!(zip_entry_type(Some(0o040755), true), EntryType::Directory);
        assert_eq!(zip_entry_type(Some(0o100644), false), EntryType::File);
        assert_eq!(zip_entry_type(Some(0o020644), false), EntryType::Other);
    }

    #[test]
    fn test_zip_entry_type_without_mode() {
        assert_eq!(zip_entry_type(None, false), EntryType::File);
        assert_eq!(zip_entry_type(None, true), EntryType::Directory);
        assert_eq!(zip_entry_type(Some(0), true), EntryType::Directory);
    }

    #[test]
    fn test_read_prefix_short_input() {
        let mut data: &[u8] = b"PK\x03\x04";
        let mut buf = [0u8; 16];
        assert_eq!(read_prefix(&mut data, &mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"PK\x03\x04");
    }

    #[test]
    fn test_open_archive_rejects_unknown_signature() {
        use tempfile::TempDir;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fake.zip");
        fs::write(&path, b"this is plain text, not a zip").unwrap();

        let result = open_archive(&path);
        assert!(matches!(result, Err(ExtractError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_write_file_counts_actual_bytes_not_declared() {
        use tempfile::TempDir;

        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let limits = ExtractLimits {
            max_entry_bytes: 1024,
            ..ExtractLimits::default()
        };
        let progress = |_: &str, _: u64| {};
        let mut job = ExtractionJob::new(root.clone(), &limits, &progress);

        let target = job.admit("bomb.txt", EntryType::File).unwrap();
        let payload = vec![b'A'; 4096];
        // Declares 10 bytes, produces 4096.
        let result = job.write_file("bomb.txt", &target, &mut payload.as_slice(), 10);

        assert!(matches!(
            result,
            Err(ExtractError::Security(SecurityError::EntryTooLarge { limit: 1024, .. }))
        ));
        let written = fs::metadata(root.join("bomb.txt")).unwrap().len();
        assert!(written < payload.len() as u64);
        assert_eq!(job.stats.files_extracted, 0);
    }

    #[test]
    fn test_admit_counts_entries_before_other_checks() {
        use tempfile::TempDir;

        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let limits = ExtractLimits {
            max_entries: 1,
            ..ExtractLimits::default()
        };
        let progress = |_: &str, _: u64| {};
        let mut job = ExtractionJob::new(root, &limits, &progress);

        assert!(job.admit("a.txt", EntryType::File).is_ok());
        assert_eq!(job.phase, JobPhase::Extracting);
        let second = job.admit("b.txt", EntryType::File);
        assert!(matches!(
            second,
            Err(ExtractError::Security(SecurityError::TooManyEntries { limit: 1 }))
        ));
    }

    #[test]
    fn test_map_stream_error_kinds() {
        let corrupt = map_stream_error(io::Error::new(io::ErrorKind::InvalidData, "bad"));
        assert!(matches!(corrupt, ExtractError::Corrupted(_)));

        let disk = map_stream_error(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert!(matches!(disk, ExtractError::Io(_)));
    }
}
