//! Upload validation: filename sanitization, extension and size checks,
//! and content sniffing for staged audio files.
//!
//! Uploads are trusted only after [`validate_audio_file`] passes on the
//! staged copy: extension, size, extension-derived MIME type and magic bytes
//! must all agree that the file is audio.

use std::io::Read;
use std::path::{Path, PathBuf};

use crate::config::ALLOWED_EXTENSIONS;

/// NAME_MAX on common filesystems, in bytes.
pub const MAX_FILENAME_BYTES: usize = 255;
const DANGEROUS_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\0'];

/// Bytes read from the head of a file for magic-byte detection.
const SNIFF_LEN: usize = 16;

/// Upload rejected before reaching the separator.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Filename is required")]
    MissingFilename,
    #[error("No file provided in multipart field 'file'")]
    MissingFile,
    #[error("File extension '{extension}' is not supported. Allowed extensions: {allowed}")]
    UnsupportedExtension { extension: String, allowed: String },
    #[error("File size ({size_mb:.2}MB) exceeds maximum allowed size ({limit_mb}MB)")]
    TooLarge { size_mb: f64, limit_mb: f64 },
    /// The request body hit the cap before the file was fully read.
    #[error("Upload exceeds maximum allowed size ({limit_mb}MB)")]
    BodyTooLarge { limit_mb: f64 },
    #[error("File does not appear to be an audio file. Detected MIME type: {0}")]
    NotAudio(String),
    #[error("File not found: {0}")]
    NotFound(PathBuf),
    #[error("Path is not a file: {0}")]
    NotAFile(PathBuf),
    #[error("Failed to read upload: {0}")]
    Malformed(String),
    #[error("I/O error while staging upload: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Filenames
// ---------------------------------------------------------------------------

/// Sanitize a client-supplied filename.
///
/// Keeps only the last path component, replaces characters that are unsafe
/// on common filesystems with `_`, and truncates to 255 bytes while
/// keeping the extension. `.` and `..` sanitize to an empty string.
pub fn sanitize_filename(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or("");
    if last == "." || last == ".." {
        return String::new();
    }

    let sanitized: String = last
        .chars()
        .map(|c| if DANGEROUS_CHARS.contains(&c) { '_' } else { c })
        .collect();

    fit_filename(&sanitized, MAX_FILENAME_BYTES)
}

/// Shorten `name` to at most `max_bytes` bytes, cutting the stem on a char
/// boundary so the extension survives.
pub fn fit_filename(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    };
    if ext.len() >= max_bytes {
        return truncate_bytes(name, max_bytes).to_string();
    }
    format!("{}{ext}", truncate_bytes(stem, max_bytes - ext.len()))
}

fn truncate_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Lower-cased extension including the dot, or empty when there is none.
pub fn file_extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

pub fn validate_file_extension(name: &str) -> Result<(), UploadError> {
    let extension = file_extension(name);
    if ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Ok(());
    }
    Err(UploadError::UnsupportedExtension {
        extension,
        allowed: ALLOWED_EXTENSIONS.join(", "),
    })
}

pub fn validate_file_size(size: u64, max_size: u64) -> Result<(), UploadError> {
    if size <= max_size {
        return Ok(());
    }
    Err(UploadError::TooLarge {
        size_mb: bytes_to_mb(size),
        limit_mb: bytes_to_mb(max_size),
    })
}

// ---------------------------------------------------------------------------
// Content sniffing
// ---------------------------------------------------------------------------

/// Detect MIME type from file magic bytes (not extension or Content-Type header).
pub fn detect_mime_from_bytes(bytes: &[u8]) -> &'static str {
    if bytes.len() < 4 {
        return "application/octet-stream";
    }

    // WAV: RIFF....WAVE
    if bytes.len() >= 12 && bytes[..4] == *b"RIFF" && bytes[8..12] == *b"WAVE" {
        return "audio/wav";
    }
    if bytes.starts_with(b"fLaC") {
        return "audio/flac";
    }
    if bytes.starts_with(b"OggS") {
        return "audio/ogg";
    }
    // MP3 with ID3v2 tag
    if bytes.starts_with(b"ID3") {
        return "audio/mpeg";
    }
    // MP4 family: ....ftyp at offset 4 (M4A, AAC in MP4)
    if bytes.len() >= 8 && bytes[4..8] == *b"ftyp" {
        return "audio/mp4";
    }
    // MPEG frame sync: 11 set bits. Layer bits 00 mean ADTS AAC.
    if bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0 {
        if bytes[1] & 0x06 == 0 {
            return "audio/aac";
        }
        return "audio/mpeg";
    }

    if bytes.starts_with(b"%PDF") {
        return "application/pdf";
    }
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        return "image/png";
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return "image/jpeg";
    }
    if bytes.starts_with(b"PK\x03\x04") {
        return "application/zip";
    }

    "application/octet-stream"
}

/// Sniffed type that is positively known to be something other than audio.
fn is_known_non_audio(mime: &str) -> bool {
    !mime.starts_with("audio/") && mime != "application/octet-stream"
}

fn read_head(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    std::fs::File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut head)?;
    Ok(head)
}

/// Validate a staged upload before handing it to the separator.
pub fn validate_audio_file(path: &Path, max_size: u64) -> Result<(), UploadError> {
    if !path.exists() {
        return Err(UploadError::NotFound(path.to_path_buf()));
    }
    if !path.is_file() {
        return Err(UploadError::NotAFile(path.to_path_buf()));
    }

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or(UploadError::MissingFilename)?;
    validate_file_extension(name)?;

    let metadata = std::fs::metadata(path)?;
    validate_file_size(metadata.len(), max_size)?;

    if let Some(guessed) = mime_guess::from_path(path).first() {
        if guessed.type_() != mime_guess::mime::AUDIO {
            return Err(UploadError::NotAudio(guessed.essence_str().to_string()));
        }
    }

    let sniffed = detect_mime_from_bytes(&read_head(path)?);
    if is_known_non_audio(sniffed) {
        return Err(UploadError::NotAudio(sniffed.to_string()));
    }

    Ok(())
}
