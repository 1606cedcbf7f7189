//! Container embedders and extractors.
//!
//! Each supported container gets a [`ContainerCodec`] that knows where a
//! marker can live without disturbing how the file renders:
//!
//! - **PDF** - comment line before the final `%%EOF`
//! - **OOXML** - `meve_marker` custom document property
//! - **PNG** - `iTXt` chunk with keyword `meve`
//! - **JPEG** - `COM` segment near the start of the stream
//!
//! Formats are detected by magic bytes, never by file name. Extractors never
//! fail: a missing or damaged marker is `None`.

pub mod archive;
pub mod docx;
pub mod jpeg;
pub mod pdf;
pub mod png;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{MeveError, Result};
use crate::marker::{find_subslice, WatermarkPayload};

pub use docx::DocxCodec;
pub use jpeg::JpegCodec;
pub use pdf::PdfCodec;
pub use png::PngCodec;

/// A host file type that can carry a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Pdf,
    /// OOXML package (DOCX and siblings).
    Docx,
    Png,
    Jpeg,
}

impl ContainerFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    /// Codec handling this format.
    pub fn codec(&self) -> &'static dyn ContainerCodec {
        match self {
            Self::Pdf => &PdfCodec,
            Self::Docx => &DocxCodec,
            Self::Png => &PngCodec,
            Self::Jpeg => &JpegCodec,
        }
    }
}

impl std::fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pdf => write!(f, "PDF"),
            Self::Docx => write!(f, "DOCX"),
            Self::Png => write!(f, "PNG"),
            Self::Jpeg => write!(f, "JPEG"),
        }
    }
}

/// Embed/extract for one container format.
pub trait ContainerCodec: Send + Sync {
    fn format(&self) -> ContainerFormat;

    /// Return a copy of `original` carrying `payload`.
    fn embed(&self, original: &[u8], payload: &WatermarkPayload) -> Result<Vec<u8>>;

    /// First valid marker in `bytes`, if any.
    fn extract(&self, bytes: &[u8]) -> Option<WatermarkPayload>;
}

/// How far into a file the `%PDF-` header may appear.
const PDF_HEADER_WINDOW: usize = 1024;

pub(crate) fn is_pdf(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    find_subslice(head, b"%PDF-", 0).is_some()
}

/// Detect the container format from magic bytes.
pub fn detect(bytes: &[u8]) -> Option<ContainerFormat> {
    if bytes.starts_with(&png::PNG_SIGNATURE) {
        Some(ContainerFormat::Png)
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(ContainerFormat::Jpeg)
    } else if docx::is_ooxml(bytes) {
        Some(ContainerFormat::Docx)
    } else if is_pdf(bytes) {
        Some(ContainerFormat::Pdf)
    } else {
        None
    }
}

/// Embed `payload` into `original`, picking the codec by detected format.
#[instrument(level = "debug", skip_all, fields(bytes = original.len()))]
pub fn embed(original: &[u8], payload: &WatermarkPayload) -> Result<Vec<u8>> {
    let format = detect(original).ok_or(MeveError::UnsupportedFormat)?;
    debug!(%format, "Embedding marker");
    format.codec().embed(original, payload)
}

/// Extract the marker from `bytes`, or `None` when absent or unsupported.
#[instrument(level = "debug", skip_all, fields(bytes = bytes.len()))]
pub fn extract(bytes: &[u8]) -> Option<WatermarkPayload> {
    let format = detect(bytes)?;
    let payload = format.codec().extract(bytes);
    debug!(%format, found = payload.is_some(), "Extracted marker");
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_magic() {
        assert_eq!(detect(b"%PDF-1.7\n..."), Some(ContainerFormat::Pdf));
        assert_eq!(
            detect(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0]),
            Some(ContainerFormat::Png)
        );
        assert_eq!(
            detect(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 16]),
            Some(ContainerFormat::Jpeg)
        );
        assert_eq!(detect(b"plain text"), None);
        assert_eq!(detect(b""), None);
    }

    #[test]
    fn test_plain_zip_is_not_ooxml() {
        assert_eq!(detect(b"PK\x03\x04not an office file"), None);
    }

    #[test]
    fn test_embed_unknown_format() {
        let payload = WatermarkPayload::new("0".repeat(64), "2024-01-01T00:00:00Z");
        assert!(matches!(
            embed(b"GIF89a", &payload),
            Err(MeveError::UnsupportedFormat)
        ));
        assert_eq!(extract(b"GIF89a"), None);
    }

    #[test]
    fn test_format_metadata() {
        assert_eq!(ContainerFormat::Png.mime(), "image/png");
        assert_eq!(ContainerFormat::Jpeg.extension(), "jpg");
        assert_eq!(ContainerFormat::Docx.codec().format(), ContainerFormat::Docx);
        assert_eq!(ContainerFormat::Pdf.to_string(), "PDF");
    }
}
