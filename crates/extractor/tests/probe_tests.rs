//! Integration tests for archive probing functionality.

use extractor::{probe, ExtractError};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

/// Helper function to create a test archive directory
fn setup_test_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

/// Helper function to create a ZIP archive
fn create_zip_archive(archive_path: &Path, files: &[(&str, &[u8])]) -> std::io::Result<()> {
    let file = File::create(archive_path)?;
    let mut zip = zip::ZipWriter::new(file);

    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for (name, content) in files {
        zip.start_file(*name, options)?;
        zip.write_all(content)?;
    }

    zip.finish()?;
    Ok(())
}

/// Helper function to append (name, content) pairs to a tar builder
fn append_files<W: Write>(tar: &mut tar::Builder<W>, files: &[(&str, &[u8])]) -> std::io::Result<()> {
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tar.append_data(&mut header, name, &content[..])?;
    }
    Ok(())
}

/// Helper function to create a TAR.GZ archive
fn create_tar_gz_archive(archive_path: &Path, files: &[(&str, &[u8])]) -> std::io::Result<()> {
    let file = File::create(archive_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut tar = tar::Builder::new(encoder);
    append_files(&mut tar, files)?;
    tar.into_inner()?.finish()?;
    Ok(())
}

/// Helper function to create a TAR.BZ2 archive
fn create_tar_bz2_archive(archive_path: &Path, files: &[(&str, &[u8])]) -> std::io::Result<()> {
    use bzip2::write::BzEncoder;

    let file = File::create(archive_path)?;
    let encoder = BzEncoder::new(file, bzip2::Compression::default());
    let mut tar = tar::Builder::new(encoder);
    append_files(&mut tar, files)?;
    tar.into_inner()?.finish()?;
    Ok(())
}

#[test]
fn test_probe_zip_archive() {
    let temp_dir = setup_test_dir();
    let archive_path = temp_dir.path().join("update.zip");

    create_zip_archive(
        &archive_path,
        &[("index.html", b"Hello, World!"), ("shared/schema.ts", b"export {}")],
    )
    .expect("Failed to create ZIP");

    let info = probe(&archive_path).expect("Failed to probe archive");

    assert_eq!(info.format, "ZIP");
    assert_eq!(info.entries, 2);
    assert!(info.compressed_bytes > 0);
    assert_eq!(info.uncompressed_estimate, 13 + 9);
    assert_eq!(info.entry_list[1].path, "shared/schema.ts");
    assert!(info.entry_list[0].compressed_size.is_some());
}

#[test]
fn test_probe_tar_gz_archive() {
    let temp_dir = setup_test_dir();
    let archive_path = temp_dir.path().join("update.tar.gz");

    create_tar_gz_archive(&archive_path, &[("test.txt", b"Hello, World!")])
        .expect("Failed to create TAR.GZ");

    let info = probe(&archive_path).expect("Failed to probe archive");

    assert_eq!(info.format, "TAR.GZ");
    assert_eq!(info.entries, 1);

    let entry = &info.entry_list[0];
    assert_eq!(entry.path, "test.txt");
    assert!(!entry.is_directory);
    assert_eq!(entry.size, 13); // "Hello, World!" is 13 bytes
    assert!(entry.compressed_size.is_none());
}

#[test]
fn test_probe_tar_bz2_archive() {
    let temp_dir = setup_test_dir();
    let archive_path = temp_dir.path().join("update.tar.bz2");

    create_tar_bz2_archive(&archive_path, &[("test.txt", b"Hello, BZ2!")])
        .expect("Failed to create TAR.BZ2");

    let info = probe(&archive_path).expect("Failed to probe archive");

    assert_eq!(info.format, "TAR.BZ2");
    assert_eq!(info.entries, 1);
    assert_eq!(info.entry_list[0].size, 11); // "Hello, BZ2!" is 11 bytes
}

#[test]
fn test_probe_lists_hostile_names_without_writing() {
    let temp_dir = setup_test_dir();
    let archive_path = temp_dir.path().join("evil.zip");

    create_zip_archive(&archive_path, &[("../../escape.txt", b"pwned")])
        .expect("Failed to create ZIP");

    let info = probe(&archive_path).expect("Failed to probe archive");

    assert_eq!(info.entry_list[0].path, "../../escape.txt");
    assert!(!temp_dir.path().join("../../escape.txt").exists());
}

#[test]
fn test_probe_not_an_archive() {
    let temp_dir = setup_test_dir();
    let path = temp_dir.path().join("notes.zip");
    std::fs::write(&path, b"plain text pretending to be a zip").unwrap();

    let result = probe(&path);
    assert!(matches!(result, Err(ExtractError::UnsupportedFormat(_))));
}

#[test]
fn test_probe_missing_file() {
    let temp_dir = setup_test_dir();
    let result = probe(&temp_dir.path().join("missing.zip"));
    assert!(matches!(result, Err(ExtractError::NotFound(_))));
}
