//! JPEG marker placement.
//!
//! The marker is a `COM` segment whose body is `MEVE:` followed by the token.
//! It is placed after `SOI` and any leading `APPn` segments so `JFIF`/`Exif`
//! headers keep their expected position. Entropy-coded data is never touched.

use tracing::{debug, instrument};

use super::{ContainerCodec, ContainerFormat};
use crate::error::{MeveError, Result};
use crate::marker::{self, WatermarkPayload};

/// Prefix of a marker-bearing `COM` body.
pub const COM_PREFIX: &[u8] = b"MEVE:";

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const COM: u8 = 0xFE;
const TEM: u8 = 0x01;

/// Largest segment body: the 16-bit length includes its own two bytes.
const MAX_SEGMENT_BODY: usize = u16::MAX as usize - 2;

pub struct JpegCodec;

/// A header segment before the scan data.
#[derive(Debug, Clone, Copy)]
struct Segment {
    marker: u8,
    /// Offset of the first `0xFF` (fill bytes included).
    start: usize,
    end: usize,
    /// Offset of the body after the length field.
    body: usize,
}

impl Segment {
    fn body<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        &bytes[self.body..self.end]
    }

    fn is_app(&self) -> bool {
        (0xE0..=0xEF).contains(&self.marker)
    }

    fn is_marker_comment(&self, bytes: &[u8]) -> bool {
        self.marker == COM && self.body(bytes).starts_with(COM_PREFIX)
    }
}

fn is_standalone(marker: u8) -> bool {
    marker == TEM || (0xD0..=0xD7).contains(&marker)
}

/// Result of walking the header segments.
struct Walk {
    segments: Vec<Segment>,
    /// Offset of `SOS` or `EOI`; `None` when the chain broke first.
    scan_start: Option<usize>,
}

/// Walk header segments from offset 2 until `SOS`, `EOI` or a break.
fn walk(bytes: &[u8]) -> Walk {
    let mut segments = Vec::new();
    let scan_start = walk_into(bytes, &mut segments);
    Walk {
        segments,
        scan_start,
    }
}

fn walk_into(bytes: &[u8], segments: &mut Vec<Segment>) -> Option<usize> {
    if bytes.len() < 2 || bytes[0] != 0xFF || bytes[1] != SOI {
        return None;
    }
    let mut pos = 2;
    loop {
        let start = pos;
        if *bytes.get(pos)? != 0xFF {
            return None;
        }
        while bytes.get(pos) == Some(&0xFF) {
            pos += 1;
        }
        let marker = *bytes.get(pos)?;
        pos += 1;

        if marker == SOS || marker == EOI {
            return Some(start);
        }
        if is_standalone(marker) {
            continue;
        }

        let len_bytes = bytes.get(pos..pos + 2)?;
        let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
        if len < 2 {
            return None;
        }
        let end = pos.checked_add(len)?;
        if end > bytes.len() {
            return None;
        }
        segments.push(Segment {
            marker,
            start,
            end,
            body: pos + 2,
        });
        pos = end;
    }
}

/// Decode a `COM` body. Accepts `MEVE:` + delimited token or bare base64.
fn decode_comment(body: &[u8]) -> Option<WatermarkPayload> {
    let rest = body.strip_prefix(COM_PREFIX)?;
    marker::decode_bytes(rest).or_else(|| marker::decode_content(rest))
}

impl ContainerCodec for JpegCodec {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Jpeg
    }

    #[instrument(level = "debug", skip_all, fields(format = "jpeg", bytes = original.len()))]
    fn embed(&self, original: &[u8], payload: &WatermarkPayload) -> Result<Vec<u8>> {
        let token = marker::encode(payload)?;
        let mut body = COM_PREFIX.to_vec();
        body.extend_from_slice(token.as_bytes());
        if body.len() > MAX_SEGMENT_BODY {
            return Err(MeveError::InvalidPayload(format!(
                "COM segment body of {} bytes exceeds {MAX_SEGMENT_BODY}",
                body.len()
            )));
        }

        let Walk {
            segments,
            scan_start,
        } = walk(original);
        let scan_start = scan_start.ok_or_else(|| {
            MeveError::MalformedContainer("JPEG segment chain is broken".into())
        })?;

        let mut com = Vec::with_capacity(body.len() + 4);
        com.extend_from_slice(&[0xFF, COM]);
        com.extend_from_slice(&((body.len() + 2) as u16).to_be_bytes());
        com.extend_from_slice(&body);

        let kept: Vec<&Segment> = segments
            .iter()
            .filter(|s| !s.is_marker_comment(original))
            .collect();
        let removed = segments.len() - kept.len();
        let leading_app = kept.iter().take_while(|s| s.is_app()).count();

        let mut out = Vec::with_capacity(original.len() + com.len());
        out.extend_from_slice(&original[..2]);
        for segment in &kept[..leading_app] {
            out.extend_from_slice(&original[segment.start..segment.end]);
        }
        out.extend_from_slice(&com);
        for segment in &kept[leading_app..] {
            out.extend_from_slice(&original[segment.start..segment.end]);
        }
        out.extend_from_slice(&original[scan_start..]);

        debug!(removed, after_app = leading_app, "Inserted COM marker segment");
        Ok(out)
    }

    fn extract(&self, bytes: &[u8]) -> Option<WatermarkPayload> {
        // A broken chain still yields the segments seen before the break.
        walk(bytes)
            .segments
            .iter()
            .filter(|s| s.marker == COM)
            .find_map(|s| decode_comment(s.body(bytes)))
    }
}
