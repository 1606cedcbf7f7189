//! PNG marker placement.
//!
//! The marker travels in an `iTXt` chunk with keyword `meve`, inserted just
//! before `IEND`. Ancillary text chunks are ignored by decoders, so pixels are
//! untouched. Extraction also accepts `tEXt` chunks with the same keyword.

use tracing::{debug, instrument};

use super::{ContainerCodec, ContainerFormat};
use crate::error::{MeveError, Result};
use crate::marker::{self, WatermarkPayload};

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Keyword of the marker text chunk.
pub const MARKER_KEYWORD: &[u8] = b"meve";

const TYPE_IEND: [u8; 4] = *b"IEND";
const TYPE_ITXT: [u8; 4] = *b"iTXt";
const TYPE_TEXT: [u8; 4] = *b"tEXt";

/// Chunk lengths above this are invalid per the PNG spec.
const MAX_CHUNK_LEN: usize = 0x7FFF_FFFF;

pub struct PngCodec;

/// One chunk as laid out in the file.
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    /// Offset of the length field.
    pub offset: usize,
    pub kind: [u8; 4],
    pub data: &'a [u8],
}

impl<'a> Chunk<'a> {
    /// Length, type, data and CRC.
    pub fn total_len(&self) -> usize {
        12 + self.data.len()
    }

    /// Text of a `tEXt`/uncompressed `iTXt` chunk with `keyword`.
    pub fn text_for(&self, keyword: &[u8]) -> Option<&'a [u8]> {
        match self.kind {
            TYPE_TEXT => {
                let nul = self.data.iter().position(|&b| b == 0)?;
                (&self.data[..nul] == keyword).then(|| &self.data[nul + 1..])
            }
            TYPE_ITXT => {
                let nul = self.data.iter().position(|&b| b == 0)?;
                if &self.data[..nul] != keyword {
                    return None;
                }
                let rest = &self.data[nul + 1..];
                // compression flag, compression method
                let (&flag, rest) = rest.split_first()?;
                let (_method, rest) = rest.split_first()?;
                if flag != 0 {
                    return None;
                }
                let lang_end = rest.iter().position(|&b| b == 0)?;
                let rest = &rest[lang_end + 1..];
                let translated_end = rest.iter().position(|&b| b == 0)?;
                Some(&rest[translated_end + 1..])
            }
            _ => None,
        }
    }
}

/// Bounds-checked walk over the chunks after the signature.
///
/// Stops after `IEND` or at the first chunk that does not fit.
pub struct ChunkIter<'a> {
    bytes: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> ChunkIter<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: PNG_SIGNATURE.len(),
            done: !bytes.starts_with(&PNG_SIGNATURE),
        }
    }

    /// Offset just past the last chunk yielded.
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Chunk<'a>> {
        if self.done {
            return None;
        }
        let header = self.bytes.get(self.pos..self.pos + 8);
        let Some(header) = header else {
            self.done = true;
            return None;
        };
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let kind = [header[4], header[5], header[6], header[7]];
        let data_start = self.pos + 8;
        let end = data_start.checked_add(len).and_then(|e| e.checked_add(4));
        match end {
            Some(end) if len <= MAX_CHUNK_LEN && end <= self.bytes.len() => {
                let chunk = Chunk {
                    offset: self.pos,
                    kind,
                    data: &self.bytes[data_start..data_start + len],
                };
                self.pos = end;
                if kind == TYPE_IEND {
                    self.done = true;
                }
                Some(chunk)
            }
            _ => {
                self.done = true;
                None
            }
        }
    }
}

/// Serialize a chunk with its CRC.
pub fn write_chunk(out: &mut Vec<u8>, kind: [u8; 4], data: &[u8]) -> Result<()> {
    let len = u32::try_from(data.len())
        .ok()
        .filter(|&l| l as usize <= MAX_CHUNK_LEN)
        .ok_or_else(|| MeveError::InvalidPayload("PNG chunk too large".into()))?;
    let mut crc = crc32fast::Hasher::new();
    crc.update(&kind);
    crc.update(data);

    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&kind);
    out.extend_from_slice(data);
    out.extend_from_slice(&crc.finalize().to_be_bytes());
    Ok(())
}

/// `iTXt` body: keyword, uncompressed, no language tag, no translation.
fn itxt_data(keyword: &[u8], text: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(keyword.len() + 5 + text.len());
    data.extend_from_slice(keyword);
    data.push(0); // keyword terminator
    data.push(0); // compression flag
    data.push(0); // compression method
    data.push(0); // empty language tag
    data.push(0); // empty translated keyword
    data.extend_from_slice(text);
    data
}

impl ContainerCodec for PngCodec {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Png
    }

    #[instrument(level = "debug", skip_all, fields(format = "png", bytes = original.len()))]
    fn embed(&self, original: &[u8], payload: &WatermarkPayload) -> Result<Vec<u8>> {
        if !original.starts_with(&PNG_SIGNATURE) {
            return Err(MeveError::MalformedContainer("missing PNG signature".into()));
        }
        let token = marker::encode(payload)?;

        let mut out = Vec::with_capacity(original.len() + token.len() + 32);
        out.extend_from_slice(&PNG_SIGNATURE);

        let mut iter = ChunkIter::new(original);
        let mut saw_iend = false;
        let mut replaced = 0usize;
        for chunk in iter.by_ref() {
            if chunk.text_for(MARKER_KEYWORD).is_some() {
                replaced += 1;
                continue;
            }
            if chunk.kind == TYPE_IEND {
                write_chunk(&mut out, TYPE_ITXT, &itxt_data(MARKER_KEYWORD, token.as_bytes()))?;
                saw_iend = true;
            }
            out.extend_from_slice(&original[chunk.offset..chunk.offset + chunk.total_len()]);
        }

        if !saw_iend {
            return Err(MeveError::MalformedContainer(
                "PNG chunk stream ends without IEND".into(),
            ));
        }
        // Preserve anything trailing IEND byte for byte.
        out.extend_from_slice(&original[iter.position()..]);

        debug!(replaced, "Inserted iTXt marker chunk");
        Ok(out)
    }

    fn extract(&self, bytes: &[u8]) -> Option<WatermarkPayload> {
        ChunkIter::new(bytes)
            .take_while(|chunk| chunk.kind != TYPE_IEND)
            .filter_map(|chunk| chunk.text_for(MARKER_KEYWORD))
            .find_map(marker::decode_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn payload() -> WatermarkPayload {
        WatermarkPayload::new(HASH, "2024-01-01T00:00:00.000Z")
    }

    /// Signature + IHDR + IEND (no pixel data; enough for chunk handling).
    fn minimal_png() -> Vec<u8> {
        let mut out = PNG_SIGNATURE.to_vec();
        let ihdr = [0, 0, 0, 1, 0, 0, 0, 1, 8, 2, 0, 0, 0];
        write_chunk(&mut out, *b"IHDR", &ihdr).unwrap();
        write_chunk(&mut out, TYPE_IEND, &[]).unwrap();
        out
    }

    #[test]
    fn test_iend_crc_is_standard() {
        let png = minimal_png();
        assert_eq!(&png[png.len() - 4..], &[0xAE, 0x42, 0x60, 0x82]);
    }

    #[test]
    fn test_chunk_before_iend_is_marker() {
        let out = PngCodec.embed(&minimal_png(), &payload()).unwrap();
        let chunks: Vec<_> = ChunkIter::new(&out).collect();
        let n = chunks.len();
        assert_eq!(chunks[n - 1].kind, TYPE_IEND);
        let marker_chunk = chunks[n - 2];
        assert_eq!(marker_chunk.kind, TYPE_ITXT);
        assert!(marker_chunk.data.starts_with(b"meve\0"));
        let text = marker_chunk.text_for(MARKER_KEYWORD).unwrap();
        assert_eq!(marker::decode_bytes(text), Some(payload()));
    }

    #[test]
    fn test_marker_chunk_crc_valid() {
        let out = PngCodec.embed(&minimal_png(), &payload()).unwrap();
        for chunk in ChunkIter::new(&out) {
            let stored = &out[chunk.offset + 8 + chunk.data.len()..chunk.offset + chunk.total_len()];
            let mut crc = crc32fast::Hasher::new();
            crc.update(&chunk.kind);
            crc.update(chunk.data);
            assert_eq!(stored, crc.finalize().to_be_bytes());
        }
    }

    #[test]
    fn test_reembed_keeps_single_marker() {
        let once = PngCodec.embed(&minimal_png(), &payload()).unwrap();
        let newer = WatermarkPayload::new(HASH, "2025-01-01T00:00:00.000Z");
        let twice = PngCodec.embed(&once, &newer).unwrap();
        let markers = ChunkIter::new(&twice)
            .filter(|c| c.text_for(MARKER_KEYWORD).is_some())
            .count();
        assert_eq!(markers, 1);
        assert_eq!(PngCodec.extract(&twice), Some(newer));
    }

    #[test]
    fn test_text_chunk_accepted() {
        let token = marker::encode(&payload()).unwrap();
        let mut png = PNG_SIGNATURE.to_vec();
        let mut data = b"meve\0".to_vec();
        data.extend_from_slice(token.as_bytes());
        write_chunk(&mut png, TYPE_TEXT, &data).unwrap();
        write_chunk(&mut png, TYPE_IEND, &[]).unwrap();
        assert_eq!(PngCodec.extract(&png), Some(payload()));
    }

    #[test]
    fn test_other_keyword_ignored() {
        let token = marker::encode(&payload()).unwrap();
        let mut png = PNG_SIGNATURE.to_vec();
        let mut data = b"Comment\0".to_vec();
        data.extend_from_slice(token.as_bytes());
        write_chunk(&mut png, TYPE_TEXT, &data).unwrap();
        write_chunk(&mut png, TYPE_IEND, &[]).unwrap();
        assert_eq!(PngCodec.extract(&png), None);
    }

    #[test]
    fn test_missing_iend_rejected() {
        let mut png = PNG_SIGNATURE.to_vec();
        write_chunk(&mut png, *b"IHDR", &[0; 13]).unwrap();
        assert!(matches!(
            PngCodec.embed(&png, &payload()),
            Err(MeveError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_truncated_chunk_does_not_panic() {
        let out = PngCodec.embed(&minimal_png(), &payload()).unwrap();
        for len in 0..out.len() {
            let _ = PngCodec.extract(&out[..len]);
        }
    }

    #[test]
    fn test_huge_length_field() {
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        png.extend_from_slice(b"tEXt");
        assert_eq!(PngCodec.extract(&png), None);
    }
}
