//! Archive probing functionality for reading metadata without extraction.

use crate::error::ExtractError;
use crate::extract::{map_stream_error, map_zip_error, open_archive};
use crate::types::{ArchiveEntry, ArchiveFormat, ArchiveInfo};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Probe an archive to retrieve its entry listing without extracting.
///
/// Sizes are the ones declared by the archive and are not trusted by the
/// extractor; they are reported so an operator can review an upload.
///
/// # Errors
///
/// Returns an error if:
/// - The archive file doesn't exist
/// - The leading bytes match no supported format
/// - The archive is corrupted
pub fn probe_archive(path: &Path) -> Result<ArchiveInfo, ExtractError> {
    if !path.exists() {
        return Err(ExtractError::NotFound(path.to_path_buf()));
    }

    let compressed_bytes = std::fs::metadata(path)?.len();
    let (file, format) = open_archive(path)?;

    let entry_list = match format {
        ArchiveFormat::Zip => list_zip_entries(file)?,
        ArchiveFormat::Tar => list_tar_entries(BufReader::new(file))?,
        ArchiveFormat::TarGz => list_tar_entries(GzDecoder::new(BufReader::new(file)))?,
        ArchiveFormat::TarBz2 => list_tar_entries(BzDecoder::new(BufReader::new(file)))?,
    };

    Ok(ArchiveInfo {
        format: format.to_string(),
        entries: entry_list.len() as u64,
        compressed_bytes,
        uncompressed_estimate: entry_list.iter().map(|e| e.size).sum(),
        entry_list,
    })
}

/// List entries in a ZIP archive.
fn list_zip_entries(file: File) -> Result<Vec<ArchiveEntry>, ExtractError> {
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(map_zip_error)?;
    let mut entries = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i).map_err(map_zip_error)?;
        entries.push(ArchiveEntry {
            path: entry.name().to_string(),
            is_directory: entry.is_dir(),
            size: entry.size(),
            compressed_size: Some(entry.compressed_size()),
        });
    }

    Ok(entries)
}

/// List entries in a TAR stream (already unwrapped from any compression).
fn list_tar_entries<R: Read>(reader: R) -> Result<Vec<ArchiveEntry>, ExtractError> {
    let mut archive = tar::Archive::new(reader);
    let mut entries = Vec::new();

    for entry_result in archive.entries().map_err(map_stream_error)? {
        let entry = entry_result.map_err(map_stream_error)?;
        let header = entry.header();
        if matches!(
            header.entry_type(),
            tar::EntryType::XGlobalHeader | tar::EntryType::XHeader
        ) {
            continue;
        }

        entries.push(ArchiveEntry {
            path: String::from_utf8_lossy(&entry.path_bytes()).into_owned(),
            is_directory: header.entry_type().is_dir(),
            size: entry.size(),
            compressed_size: None, // TAR doesn't store per-file compressed sizes
        });
    }

    Ok(entries)
}
