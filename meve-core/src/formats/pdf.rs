//! PDF marker placement.
//!
//! The marker is written as a comment line immediately before the last
//! `%%EOF`. Comments are outside the object graph, so the cross-reference
//! table and every byte offset it records stay valid.
//!
//! Extraction only looks at the tail of the file ([`PDF_SCAN_WINDOW`]) and
//! returns the valid marker closest to the end, so a re-protection after an
//! incremental update wins over the older marker. A marker pushed further
//! back than the window will be missed.

use tracing::{debug, instrument, warn};

use super::{is_pdf, ContainerCodec, ContainerFormat};
use crate::error::{MeveError, Result};
use crate::marker::{self, rfind_subslice, WatermarkPayload, MARKER_PREFIX, MARKER_SUFFIX};

/// Bytes from the end of the file searched for a marker.
pub const PDF_SCAN_WINDOW: usize = 256 * 1024;

const EOF_MARKER: &[u8] = b"%%EOF";

pub struct PdfCodec;

/// Range of a marker comment line (`\n%MEVE{...}EVEM\n`) ending exactly at `eof`.
fn marker_line_before(bytes: &[u8], eof: usize) -> Option<usize> {
    let head = &bytes[..eof];
    let tail = format!("{MARKER_SUFFIX}\n");
    if !head.ends_with(tail.as_bytes()) {
        return None;
    }
    let opener = format!("\n%{MARKER_PREFIX}");
    let start = rfind_subslice(head, opener.as_bytes())?;
    // A single line: no newline between the opener and the closing suffix.
    let body = &head[start + 1..head.len() - 1];
    if body.contains(&b'\n') || body.contains(&b'\r') {
        return None;
    }
    Some(start)
}

impl ContainerCodec for PdfCodec {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Pdf
    }

    #[instrument(level = "debug", skip_all, fields(format = "pdf", bytes = original.len()))]
    fn embed(&self, original: &[u8], payload: &WatermarkPayload) -> Result<Vec<u8>> {
        if !is_pdf(original) {
            return Err(MeveError::MalformedContainer("missing %PDF- header".into()));
        }
        let token = marker::encode(payload)?;
        let line = format!("\n%{token}\n");

        let mut out = Vec::with_capacity(original.len() + line.len() + 8);
        match rfind_subslice(original, EOF_MARKER) {
            Some(eof) => {
                // Replace our own previous marker if it is the last thing before %%EOF.
                let splice_at = marker_line_before(original, eof).unwrap_or(eof);
                if splice_at != eof {
                    debug!("Replacing existing marker comment");
                }
                out.extend_from_slice(&original[..splice_at]);
                out.extend_from_slice(line.as_bytes());
                out.extend_from_slice(&original[eof..]);
            }
            None => {
                warn!("No %%EOF trailer found, appending marker and synthetic trailer");
                out.extend_from_slice(original);
                out.extend_from_slice(line.as_bytes());
                out.extend_from_slice(b"%%EOF\n");
            }
        }
        Ok(out)
    }

    fn extract(&self, bytes: &[u8]) -> Option<WatermarkPayload> {
        let window = &bytes[bytes.len().saturating_sub(PDF_SCAN_WINDOW)..];
        marker::decode_bytes_last(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn payload() -> WatermarkPayload {
        WatermarkPayload::new(HASH, "2024-01-01T00:00:00.000Z")
    }

    const PDF: &[u8] = b"%PDF-1.4\n1 0 obj<<>>endobj\nxref\n0 1\n0000000000 65535 f \ntrailer<<>>\nstartxref\n27\n%%EOF\n";

    #[test]
    fn test_marker_lands_before_eof() {
        let out = PdfCodec.embed(PDF, &payload()).unwrap();
        let token = marker::encode(&payload()).unwrap();
        let eof = rfind_subslice(&out, EOF_MARKER).unwrap();
        let expected_line = format!("\n%{token}\n");
        assert!(out[..eof].ends_with(expected_line.as_bytes()));
        assert!(out.ends_with(b"%%EOF\n"));
    }

    #[test]
    fn test_bytes_before_splice_untouched() {
        let out = PdfCodec.embed(PDF, &payload()).unwrap();
        let eof = rfind_subslice(PDF, EOF_MARKER).unwrap();
        assert_eq!(&out[..eof], &PDF[..eof]);
    }

    #[test]
    fn test_extract_embedded() {
        let out = PdfCodec.embed(PDF, &payload()).unwrap();
        assert_eq!(PdfCodec.extract(&out), Some(payload()));
    }

    #[test]
    fn test_missing_eof_gets_synthetic_trailer() {
        let pdf = b"%PDF-1.4\n1 0 obj<<>>endobj\n";
        let out = PdfCodec.embed(pdf, &payload()).unwrap();
        assert!(out.starts_with(pdf));
        assert!(out.ends_with(b"%%EOF\n"));
        assert_eq!(PdfCodec.extract(&out), Some(payload()));
    }

    #[test]
    fn test_reembed_replaces_marker() {
        let first = PdfCodec.embed(PDF, &payload()).unwrap();
        let newer = WatermarkPayload::new(HASH, "2025-06-01T12:00:00.000Z");
        let second = PdfCodec.embed(&first, &newer).unwrap();
        assert_eq!(PdfCodec.extract(&second), Some(newer));
        let text = String::from_utf8_lossy(&second);
        assert_eq!(text.matches(MARKER_PREFIX).count(), 1);
    }

    #[test]
    fn test_reembed_after_incremental_update_wins() {
        let first = PdfCodec.embed(PDF, &payload()).unwrap();
        let mut updated = first.clone();
        updated.extend_from_slice(b"2 0 obj<<>>endobj\ntrailer<<>>\n%%EOF\n");
        // The old marker is no longer directly before the final %%EOF.
        assert_eq!(PdfCodec.extract(&updated), Some(payload()));

        let newer = WatermarkPayload::new(HASH, "2025-01-01T00:00:00.000Z");
        let second = PdfCodec.embed(&updated, &newer).unwrap();
        assert!(second.starts_with(&updated[..first.len()]));
        assert_eq!(PdfCodec.extract(&second), Some(newer));
    }

    #[test]
    fn test_marker_outside_window_is_missed() {
        let out = PdfCodec.embed(PDF, &payload()).unwrap();
        let mut padded = out.clone();
        padded.extend(std::iter::repeat(b' ').take(PDF_SCAN_WINDOW));
        assert_eq!(PdfCodec.extract(&padded), None);
    }

    #[test]
    fn test_not_a_pdf() {
        assert!(matches!(
            PdfCodec.embed(b"hello", &payload()),
            Err(MeveError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_unmarked_pdf_extracts_none() {
        assert_eq!(PdfCodec.extract(PDF), None);
    }
}
