//! Type definitions for archive extraction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use ts_rs::TS;

/// Individual entry within an archive.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../../admin/bindings/")]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    /// Path of the entry within the archive
    pub path: String,

    /// Whether this entry is a directory
    pub is_directory: bool,

    /// Uncompressed size in bytes, as declared by the archive
    #[ts(type = "number")]
    pub size: u64,

    /// Compressed size in bytes (if available)
    #[ts(optional, type = "number")]
    pub compressed_size: Option<u64>,
}

/// Metadata information about an archive.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../../admin/bindings/")]
#[serde(rename_all = "camelCase")]
pub struct ArchiveInfo {
    /// Archive format (e.g., "ZIP", "TAR.GZ")
    pub format: String,

    /// Number of entries in the archive
    #[ts(type = "number")]
    pub entries: u64,

    /// Compressed size in bytes
    #[ts(type = "number")]
    pub compressed_bytes: u64,

    /// Sum of the declared uncompressed sizes
    #[ts(type = "number")]
    pub uncompressed_estimate: u64,

    /// List of all entries in the archive
    pub entry_list: Vec<ArchiveEntry>,
}

/// Container formats the extractor can read, identified from leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarBz2,
}

impl ArchiveFormat {
    /// Identify the format from the first bytes of an archive.
    ///
    /// Compressed tarballs are recognized by their compression wrapper; the
    /// tar stream inside is validated while reading entries.
    pub fn sniff(header: &[u8]) -> Option<Self> {
        const ZIP_MAGICS: [&[u8]; 3] = [b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];

        if ZIP_MAGICS.iter().any(|magic| header.starts_with(magic)) {
            return Some(Self::Zip);
        }
        if header.starts_with(&[0x1f, 0x8b]) {
            return Some(Self::TarGz);
        }
        if header.starts_with(b"BZh") {
            return Some(Self::TarBz2);
        }
        if header.len() >= 262 && &header[257..262] == b"ustar" {
            return Some(Self::Tar);
        }
        None
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Zip => "ZIP",
            Self::Tar => "TAR",
            Self::TarGz => "TAR.GZ",
            Self::TarBz2 => "TAR.BZ2",
        };
        f.write_str(name)
    }
}

/// Resource ceilings and denylists enforced while extracting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExtractLimits {
    /// Maximum number of entries (files and directories) in one archive
    pub max_entries: u64,

    /// Maximum uncompressed size of a single entry in bytes
    pub max_entry_bytes: u64,

    /// Maximum uncompressed bytes written across the whole archive
    pub max_total_bytes: u64,

    /// Maximum length of an entry path, in bytes
    pub max_path_length: usize,

    /// Extensions (without the dot) refused anywhere in the archive
    pub blocked_extensions: Vec<String>,

    /// Exact base names refused anywhere in the archive
    pub blocked_filenames: Vec<String>,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_entry_bytes: 50 * 1024 * 1024,   // 50 MB
            max_total_bytes: 500 * 1024 * 1024,  // 500 MB
            max_path_length: 255,
            blocked_extensions: [
                "exe", "dll", "bat", "cmd", "com", "scr", "pif", "msi", "vbs", "vbe", "wsf",
                "wsh", "ps1", "lnk", "jar", "hta", "cpl", "reg", "app", "dmg", "deb", "rpm",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            blocked_filenames: [
                ".htaccess",
                ".htpasswd",
                "web.config",
                ".env",
                "desktop.ini",
                "autorun.inf",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Statistics about a completed extraction operation.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../../admin/bindings/")]
#[serde(rename_all = "camelCase")]
pub struct ExtractStats {
    /// Number of files written
    #[ts(type = "number")]
    pub files_extracted: u64,

    /// Number of directories created from directory entries
    #[ts(type = "number")]
    pub directories_created: u64,

    /// Total bytes written to disk
    #[ts(type = "number")]
    pub bytes_written: u64,

    /// Duration of the extraction operation (in milliseconds)
    #[serde(with = "duration_serde")]
    #[ts(type = "number")]
    pub duration: Duration,
}

impl Default for ExtractStats {
    fn default() -> Self {
        Self {
            files_extracted: 0,
            directories_created: 0,
            bytes_written: 0,
            duration: Duration::from_secs(0),
        }
    }
}

// Helper module for Duration serialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_zip_variants() {
        assert_eq!(ArchiveFormat::sniff(b"PK\x03\x04rest"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::sniff(b"PK\x05\x06"), Some(ArchiveFormat::Zip));
    }

    #[test]
    fn test_sniff_compressed_tar() {
        assert_eq!(ArchiveFormat::sniff(&[0x1f, 0x8b, 0x08]), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::sniff(b"BZh91AY"), Some(ArchiveFormat::TarBz2));
    }

    #[test]
    fn test_sniff_plain_tar() {
        let mut header = vec![0u8; 512];
        header[257..262].copy_from_slice(b"ustar");
        assert_eq!(ArchiveFormat::sniff(&header), Some(ArchiveFormat::Tar));
    }

    #[test]
    fn test_sniff_unknown() {
        assert_eq!(ArchiveFormat::sniff(b"MZ\x90\x00"), None);
        assert_eq!(ArchiveFormat::sniff(b""), None);
    }

    #[test]
    fn test_default_limits_block_executables() {
        let limits = ExtractLimits::default();
        assert!(limits.blocked_extensions.iter().any(|e| e == "exe"));
        assert!(limits.blocked_filenames.iter().any(|f| f == ".htaccess"));
        assert!(limits.max_entry_bytes <= limits.max_total_bytes);
    }
}
