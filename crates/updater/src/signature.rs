//! Signature-based file classification.
//!
//! Types are identified from magic numbers near the start of the data and
//! never from file names or client-declared content types.

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

/// Number of leading bytes the classifier needs to see. Covers the POSIX tar
/// magic at offset 257.
pub const SIGNATURE_WINDOW: usize = 512;

/// A file type the classifier can recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../../admin/bindings/")]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pe,
    Elf,
    MachO,
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
    Ico,
    Pdf,
    Zip,
    Gzip,
    Bzip2,
    Tar,
    SevenZip,
    Rar,
    Mp4,
    Webm,
    Mp3,
    Wav,
    Ogg,
}

/// One way a type can announce itself: every `(offset, bytes)` part must match.
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    parts: &'static [(usize, &'static [u8])],
}

impl Signature {
    /// Whether `data` carries this signature.
    pub fn matches(&self, data: &[u8]) -> bool {
        !self.parts.is_empty()
            && self.parts.iter().all(|(offset, bytes)| {
                data.len() >= offset + bytes.len() && &data[*offset..offset + bytes.len()] == *bytes
            })
    }
}

macro_rules! sig {
    ($($offset:expr => $bytes:expr),+ $(,)?) => {
        Signature { parts: &[$(($offset, $bytes)),+] }
    };
}

const PE: &[Signature] = &[sig!(0 => b"MZ")];
const ELF: &[Signature] = &[sig!(0 => b"\x7fELF")];
const MACHO: &[Signature] = &[
    sig!(0 => b"\xfe\xed\xfa\xce"),
    sig!(0 => b"\xfe\xed\xfa\xcf"),
    sig!(0 => b"\xce\xfa\xed\xfe"),
    sig!(0 => b"\xcf\xfa\xed\xfe"),
    sig!(0 => b"\xca\xfe\xba\xbe"),
];
const JPEG: &[Signature] = &[
    sig!(0 => b"\xff\xd8\xff\xe0"),
    sig!(0 => b"\xff\xd8\xff\xe1"),
    sig!(0 => b"\xff\xd8\xff\xe2"),
    sig!(0 => b"\xff\xd8\xff\xe8"),
    sig!(0 => b"\xff\xd8\xff\xdb"),
    sig!(0 => b"\xff\xd8\xff\xee"),
];
const PNG: &[Signature] = &[sig!(0 => b"\x89PNG\r\n\x1a\n")];
const GIF: &[Signature] = &[sig!(0 => b"GIF87a"), sig!(0 => b"GIF89a")];
const WEBP: &[Signature] = &[sig!(0 => b"RIFF", 8 => b"WEBP")];
const BMP: &[Signature] = &[sig!(0 => b"BM")];
const ICO: &[Signature] = &[sig!(0 => b"\x00\x00\x01\x00")];
const PDF: &[Signature] = &[sig!(0 => b"%PDF-")];
const ZIP: &[Signature] = &[
    sig!(0 => b"PK\x03\x04"),
    sig!(0 => b"PK\x05\x06"),
    sig!(0 => b"PK\x07\x08"),
];
const GZIP: &[Signature] = &[sig!(0 => b"\x1f\x8b")];
const BZIP2: &[Signature] = &[sig!(0 => b"BZh")];
const TAR: &[Signature] = &[sig!(257 => b"ustar")];
const SEVEN_ZIP: &[Signature] = &[sig!(0 => b"7z\xbc\xaf\x27\x1c")];
const RAR: &[Signature] = &[
    sig!(0 => b"Rar!\x1a\x07\x00"),
    sig!(0 => b"Rar!\x1a\x07\x01\x00"),
];
const MP4: &[Signature] = &[sig!(4 => b"ftyp")];
const WEBM: &[Signature] = &[sig!(0 => b"\x1a\x45\xdf\xa3")];
const MP3: &[Signature] = &[
    sig!(0 => b"ID3"),
    sig!(0 => b"\xff\xfb"),
    sig!(0 => b"\xff\xf3"),
    sig!(0 => b"\xff\xf2"),
];
const WAV: &[Signature] = &[sig!(0 => b"RIFF", 8 => b"WAVE")];
const OGG: &[Signature] = &[sig!(0 => b"OggS")];

/// Detection order. Executables come first so a disguised binary is always
/// named as one.
const TABLE: &[(FileKind, &[Signature])] = &[
    (FileKind::Pe, PE),
    (FileKind::Elf, ELF),
    (FileKind::MachO, MACHO),
    (FileKind::Jpeg, JPEG),
    (FileKind::Png, PNG),
    (FileKind::Gif, GIF),
    (FileKind::Webp, WEBP),
    (FileKind::Bmp, BMP),
    (FileKind::Ico, ICO),
    (FileKind::Pdf, PDF),
    (FileKind::Zip, ZIP),
    (FileKind::Gzip, GZIP),
    (FileKind::Bzip2, BZIP2),
    (FileKind::Tar, TAR),
    (FileKind::SevenZip, SEVEN_ZIP),
    (FileKind::Rar, RAR),
    (FileKind::Mp4, MP4),
    (FileKind::Webm, WEBM),
    (FileKind::Mp3, MP3),
    (FileKind::Wav, WAV),
    (FileKind::Ogg, OGG),
];

impl FileKind {
    /// All signatures registered for this type.
    pub fn signatures(self) -> &'static [Signature] {
        TABLE
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, sigs)| *sigs)
            .unwrap_or(&[])
    }

    /// Canonical MIME type.
    pub fn mime(self) -> &'static str {
        match self {
            Self::Pe => "application/vnd.microsoft.portable-executable",
            Self::Elf => "application/x-elf",
            Self::MachO => "application/x-mach-binary",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
            Self::Ico => "image/x-icon",
            Self::Pdf => "application/pdf",
            Self::Zip => "application/zip",
            Self::Gzip => "application/gzip",
            Self::Bzip2 => "application/x-bzip2",
            Self::Tar => "application/x-tar",
            Self::SevenZip => "application/x-7z-compressed",
            Self::Rar => "application/vnd.rar",
            Self::Mp4 => "video/mp4",
            Self::Webm => "video/webm",
            Self::Mp3 => "audio/mpeg",
            Self::Wav => "audio/wav",
            Self::Ogg => "audio/ogg",
        }
    }

    /// Map a declared MIME type (parameters and case ignored) to a kind.
    pub fn from_mime(declared: &str) -> Option<Self> {
        let essence = declared
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        let kind = match essence.as_str() {
            "application/vnd.microsoft.portable-executable"
            | "application/x-msdownload"
            | "application/x-dosexec" => Self::Pe,
            "application/x-elf" | "application/x-executable" | "application/x-sharedlib" => {
                Self::Elf
            }
            "application/x-mach-binary" | "application/x-mach-o-executable" => Self::MachO,
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Self::Jpeg,
            "image/png" => Self::Png,
            "image/gif" => Self::Gif,
            "image/webp" => Self::Webp,
            "image/bmp" | "image/x-ms-bmp" => Self::Bmp,
            "image/x-icon" | "image/vnd.microsoft.icon" => Self::Ico,
            "application/pdf" => Self::Pdf,
            "application/zip" | "application/x-zip-compressed" | "application/x-zip"
            | "multipart/x-zip" => Self::Zip,
            "application/gzip" | "application/x-gzip" | "application/x-compressed-tar" => {
                Self::Gzip
            }
            "application/x-bzip2" | "application/x-bzip" => Self::Bzip2,
            "application/x-tar" => Self::Tar,
            "application/x-7z-compressed" => Self::SevenZip,
            "application/vnd.rar" | "application/x-rar-compressed" => Self::Rar,
            "video/mp4" | "audio/mp4" => Self::Mp4,
            "video/webm" | "audio/webm" => Self::Webm,
            "audio/mpeg" | "audio/mp3" => Self::Mp3,
            "audio/wav" | "audio/wave" | "audio/x-wav" => Self::Wav,
            "audio/ogg" | "application/ogg" | "video/ogg" => Self::Ogg,
            _ => return None,
        };
        Some(kind)
    }

    /// Native executable formats; never acceptable as an upload.
    pub fn is_executable(self) -> bool {
        matches!(self, Self::Pe | Self::Elf | Self::MachO)
    }

    /// Containers the update extractor knows how to unpack.
    pub fn is_supported_archive(self) -> bool {
        matches!(self, Self::Zip | Self::Gzip | Self::Bzip2 | Self::Tar)
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// Stateless classifier over the signature table.
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier;

impl Classifier {
    pub fn new() -> Self {
        Self
    }

    /// First type whose signature matches `bytes`, in table order.
    ///
    /// A checksummed tar header wins over the table: its first bytes are an
    /// entry name and can look like any prefix signature.
    pub fn detect(&self, bytes: &[u8]) -> Option<FileKind> {
        if is_tar_header(bytes) {
            return Some(FileKind::Tar);
        }
        TABLE
            .iter()
            .find(|(_, sigs)| sigs.iter().any(|sig| sig.matches(bytes)))
            .map(|(kind, _)| *kind)
    }

    /// True only when the declared type is known and one of its signatures
    /// matches `bytes`.
    pub fn matches_declared(&self, bytes: &[u8], declared_type: &str) -> bool {
        FileKind::from_mime(declared_type)
            .map(|kind| kind.signatures().iter().any(|sig| sig.matches(bytes)))
            .unwrap_or(false)
    }
}

const TAR_BLOCK: usize = 512;
const TAR_CHECKSUM: std::ops::Range<usize> = 148..156;

/// A `ustar` block whose stored checksum matches its contents.
fn is_tar_header(bytes: &[u8]) -> bool {
    if bytes.len() < TAR_BLOCK || !TAR.iter().any(|sig| sig.matches(bytes)) {
        return false;
    }
    let block = &bytes[..TAR_BLOCK];

    let field = &block[TAR_CHECKSUM];
    let digits = field
        .iter()
        .skip_while(|b| **b == b' ')
        .take_while(|b| (b'0'..=b'7').contains(*b));
    let mut stored = 0u32;
    let mut seen = false;
    for digit in digits {
        stored = stored * 8 + u32::from(digit - b'0');
        seen = true;
    }
    if !seen {
        return false;
    }

    let computed: u32 = block
        .iter()
        .enumerate()
        .map(|(i, b)| if TAR_CHECKSUM.contains(&i) { u32::from(b' ') } else { u32::from(*b) })
        .sum();
    stored == computed
}
