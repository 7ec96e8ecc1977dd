//! File integrity and threat scanning.
//!
//! The scanner only reads. Callers decide what to do with rejected files.

use regex::bytes::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;
use ts_rs::TS;

use crate::config::ScannerConfig;
use crate::error::ScanRejection;
use crate::record::UploadedFile;
use crate::signature::{Classifier, FileKind, SIGNATURE_WINDOW};

const CHUNK_SIZE: usize = 64 * 1024;

/// Text patterns that indicate active content smuggled into a file.
static MALICIOUS_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("inline script", r"(?i)<script[\s>/]"),
        ("php tag", r"(?i)<\?php"),
        ("server-side template tag", r"<%"),
        (
            "inline event handler",
            r"(?i)\bon(?:load|error|click|dblclick|mouseover|mouseout|mouseenter|focus|blur|submit|change|input|keydown|keyup|keypress|abort|unload)\s*=",
        ),
        ("base64 data uri", r"(?i)data:[a-z0-9.+/-]*;base64,"),
        (
            "executable header hex",
            r"(?i)(?:\\x4d\\x5a\\x90|4d5a9000|\\x7f\\x45\\x4c\\x46|7f454c46|cffaedfe|feedfacf)",
        ),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).expect("malicious pattern is valid")))
    .collect()
});

/// Outcome of scanning one file.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "../../../admin/bindings/")]
#[serde(rename_all = "camelCase")]
pub struct ValidationVerdict {
    pub accepted: bool,

    /// Human-readable rejection reason
    #[ts(optional)]
    pub reason: Option<String>,

    #[serde(skip)]
    #[ts(skip)]
    pub rejection: Option<ScanRejection>,

    #[ts(optional)]
    pub detected_type: Option<FileKind>,

    /// Hex SHA-256 of the whole file, present whenever it was readable
    #[ts(optional)]
    pub content_hash: Option<String>,

    pub warnings: Vec<String>,

    #[ts(type = "number")]
    pub size_bytes: u64,
}

impl ValidationVerdict {
    fn reject(rejection: ScanRejection, size_bytes: u64, content_hash: Option<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(rejection.to_string()),
            rejection: Some(rejection),
            detected_type: None,
            content_hash,
            warnings: Vec::new(),
            size_bytes,
        }
    }

    fn detected(mut self, kind: Option<FileKind>) -> Self {
        self.detected_type = kind;
        self
    }
}

/// What one pass over the file produced.
struct Digested {
    hash: String,
    head: Vec<u8>,
    body: Option<Vec<u8>>,
}

/// Hash the whole file in fixed chunks, keeping the signature window and,
/// when asked, the full contents for pattern scanning.
fn digest(path: &Path, keep_body: bool) -> io::Result<Digested> {
    digest_reader(File::open(path)?, keep_body)
}

fn digest_reader<R: Read>(mut file: R, keep_body: bool) -> io::Result<Digested> {
    let mut hasher = Sha256::new();
    let mut head = Vec::with_capacity(SIGNATURE_WINDOW);
    let mut body = keep_body.then(Vec::new);
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let n = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let chunk = &buffer[..n];
        hasher.update(chunk);
        if head.len() < SIGNATURE_WINDOW {
            let take = (SIGNATURE_WINDOW - head.len()).min(n);
            head.extend_from_slice(&chunk[..take]);
        }
        if let Some(body) = body.as_mut() {
            body.extend_from_slice(chunk);
        }
    }

    Ok(Digested {
        hash: hex::encode(hasher.finalize()),
        head,
        body,
    })
}

#[cfg(unix)]
fn has_exec_bits(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn has_exec_bits(_metadata: &std::fs::Metadata) -> bool {
    false
}

/// Lowercased extension of a declared file name.
fn declared_extension(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    base.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Name of the first malicious pattern present in `data`.
pub fn find_malicious_pattern(data: &[u8]) -> Option<&'static str> {
    MALICIOUS_PATTERNS
        .iter()
        .find(|(_, regex)| regex.is_match(data))
        .map(|(name, _)| *name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanMode {
    File,
    Archive,
}

/// Classifier plus denylist, executable and content checks.
#[derive(Debug, Clone)]
pub struct Scanner {
    config: ScannerConfig,
    classifier: Classifier,
}

impl Scanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self {
            config,
            classifier: Classifier::new(),
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Validate an arbitrary file against an explicit size ceiling.
    pub fn validate(
        &self,
        path: &Path,
        declared_name: &str,
        declared_type: &str,
        max_size_bytes: u64,
    ) -> ValidationVerdict {
        let warn_at = self.config.warn_file_bytes.min(max_size_bytes);
        self.run(path, declared_name, declared_type, max_size_bytes, warn_at, ScanMode::File)
    }

    /// Validate an ordinary upload with the configured file ceiling.
    pub fn validate_upload(&self, file: &UploadedFile) -> ValidationVerdict {
        self.validate(
            &file.path,
            &file.original_name,
            &file.declared_type,
            self.config.max_file_bytes,
        )
    }

    /// Validate an update archive: larger ceiling, must be an extractable
    /// container, no text-pattern scan.
    pub fn validate_archive(&self, file: &UploadedFile) -> ValidationVerdict {
        self.run(
            &file.path,
            &file.original_name,
            &file.declared_type,
            self.config.max_archive_bytes,
            self.config.warn_archive_bytes,
            ScanMode::Archive,
        )
    }

    fn run(
        &self,
        path: &Path,
        declared_name: &str,
        declared_type: &str,
        max_size_bytes: u64,
        warn_bytes: u64,
        mode: ScanMode,
    ) -> ValidationVerdict {
        let metadata = match std::fs::metadata(path) {
            Ok(m) if m.is_file() => m,
            _ => return ValidationVerdict::reject(ScanRejection::Missing, 0, None),
        };
        let size = metadata.len();

        // Only keep the body when it will be pattern-scanned and is in bounds.
        let keep_body = mode == ScanMode::File && size > 0 && size <= max_size_bytes;
        let digested = match digest(path, keep_body) {
            Ok(d) => d,
            Err(e) => {
                return ValidationVerdict::reject(ScanRejection::Unreadable(e.to_string()), size, None)
            }
        };
        let hash = Some(digested.hash.clone());

        if size == 0 {
            return ValidationVerdict::reject(ScanRejection::Empty, size, hash);
        }
        if size > max_size_bytes {
            return ValidationVerdict::reject(
                ScanRejection::TooLarge {
                    size,
                    limit: max_size_bytes,
                },
                size,
                hash,
            );
        }

        if let Some(extension) = declared_extension(declared_name) {
            if self
                .config
                .blocked_extensions
                .iter()
                .any(|blocked| blocked.eq_ignore_ascii_case(&extension))
            {
                return ValidationVerdict::reject(
                    ScanRejection::DangerousExtension { extension },
                    size,
                    hash,
                );
            }
        }

        let Some(kind) = self.classifier.detect(&digested.head) else {
            return ValidationVerdict::reject(ScanRejection::UnknownType, size, hash);
        };
        debug!(file = declared_name, detected = %kind, declared = declared_type, "Classified file");

        if kind.is_executable() {
            return ValidationVerdict::reject(
                ScanRejection::Executable(format!("{} signature", kind.mime())),
                size,
                hash,
            )
            .detected(Some(kind));
        }
        if has_exec_bits(&metadata) {
            return ValidationVerdict::reject(
                ScanRejection::Executable("executable permission bits set".into()),
                size,
                hash,
            )
            .detected(Some(kind));
        }

        if !self.classifier.matches_declared(&digested.head, declared_type) {
            return ValidationVerdict::reject(
                ScanRejection::TypeMismatch {
                    declared: declared_type.to_string(),
                    detected: kind.mime().to_string(),
                },
                size,
                hash,
            )
            .detected(Some(kind));
        }

        match mode {
            ScanMode::Archive if !kind.is_supported_archive() => {
                return ValidationVerdict::reject(
                    ScanRejection::NotAnArchive {
                        detected: kind.mime().to_string(),
                    },
                    size,
                    hash,
                )
                .detected(Some(kind));
            }
            ScanMode::File => {
                if let Some(pattern) = digested.body.as_deref().and_then(find_malicious_pattern) {
                    return ValidationVerdict::reject(
                        ScanRejection::MaliciousContent {
                            pattern: pattern.to_string(),
                        },
                        size,
                        hash,
                    )
                    .detected(Some(kind));
                }
            }
            ScanMode::Archive => {}
        }

        let mut warnings = Vec::new();
        if size > warn_bytes {
            warnings.push(format!(
                "Large file: {} bytes (warning threshold: {} bytes)",
                size, warn_bytes
            ));
        }

        ValidationVerdict {
            accepted: true,
            reason: None,
            rejection: None,
            detected_type: Some(kind),
            content_hash: hash,
            warnings,
            size_bytes: size,
        }
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(ScannerConfig::default())
    }
}
