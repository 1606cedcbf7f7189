//! Marker token codec.
//!
//! A marker is `MEVE{` + base64(JSON payload) + `}EVEM`. Containers carry it as
//! opaque text; decoding scans for the first delimited span whose content is a
//! valid payload. Anything else, including a damaged span, reads as "no
//! marker".

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::{canonicalize, is_iso8601_prefixed, normalize_email, SIGNATURE_BYTES};
use crate::error::{MeveError, Result};
use crate::hashing::is_hex_digest;

pub const MARKER_PREFIX: &str = "MEVE{";
pub const MARKER_SUFFIX: &str = "}EVEM";

/// The only digest algorithm a payload may name.
pub const ALG_SHA256: &str = "sha256";

/// Upper bound on the content between delimiters.
pub const MAX_TOKEN_CONTENT: usize = 16 * 1024;

/// Byte range of a delimited token, delimiters included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Position of `needle` in `haystack` at or after `from`.
pub(crate) fn find_subslice(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() || haystack.len() - from < needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Position of the last occurrence of `needle` in `haystack`.
pub(crate) fn rfind_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// Find the first `prefix ... suffix` span starting at or after `from`.
///
/// The suffix must follow within [`MAX_TOKEN_CONTENT`] bytes of the prefix.
pub fn find_span(haystack: &[u8], prefix: &[u8], suffix: &[u8], from: usize) -> Option<Span> {
    let mut cursor = from;
    while let Some(start) = find_subslice(haystack, prefix, cursor) {
        let content_start = start + prefix.len();
        let limit = haystack
            .len()
            .min(content_start + MAX_TOKEN_CONTENT + suffix.len());
        if let Some(end) = find_subslice(&haystack[..limit], suffix, content_start) {
            return Some(Span {
                start,
                end: end + suffix.len(),
            });
        }
        cursor = start + 1;
    }
    None
}

/// The compact payload embedded in containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkPayload {
    pub alg: String,
    /// Lowercase hex SHA-256 of the original document.
    pub hash: String,
    /// ISO-8601 timestamp of protection.
    pub ts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Identifier of the signing key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Base64 Ed25519 signature over [`WatermarkPayload::signable_bytes`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

impl WatermarkPayload {
    /// Build a payload for `hash` at `ts`. The hash is lowercased.
    pub fn new(hash: impl Into<String>, ts: impl Into<String>) -> Self {
        Self {
            alg: ALG_SHA256.to_string(),
            hash: hash.into().to_lowercase(),
            ts: ts.into(),
            issuer: None,
            kid: None,
            sig: None,
        }
    }

    /// Attach a normalized issuer email.
    pub fn with_issuer(mut self, email: &str) -> Result<Self> {
        self.issuer = Some(normalize_email(email)?);
        Ok(self)
    }

    pub fn with_key_id(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    pub fn with_signature(mut self, signature: &[u8; SIGNATURE_BYTES]) -> Self {
        self.sig = Some(STANDARD.encode(signature));
        self
    }

    pub fn is_signed(&self) -> bool {
        self.sig.is_some()
    }

    /// Canonical JSON bytes of every field except `sig`.
    pub fn signable_bytes(&self) -> Result<Vec<u8>> {
        let mut value =
            serde_json::to_value(self).map_err(|e| MeveError::Serialization(e.to_string()))?;
        if let Value::Object(map) = &mut value {
            map.remove("sig");
        }
        Ok(canonicalize(&value).into_bytes())
    }

    /// Decoded signature bytes, if present and base64.
    pub fn signature_bytes(&self) -> Option<Vec<u8>> {
        self.sig.as_deref().and_then(|s| STANDARD.decode(s).ok())
    }

    /// Check every field against the payload schema.
    pub fn validate(&self) -> Result<()> {
        if self.alg != ALG_SHA256 {
            return Err(MeveError::InvalidPayload(format!(
                "unsupported alg: {}",
                self.alg
            )));
        }
        if !is_hex_digest(&self.hash) {
            return Err(MeveError::InvalidPayload(
                "hash must be 64 hex characters".into(),
            ));
        }
        if !is_iso8601_prefixed(&self.ts) {
            return Err(MeveError::InvalidPayload(format!(
                "ts is not an ISO-8601 timestamp: {}",
                self.ts
            )));
        }
        if let Some(issuer) = &self.issuer {
            if &normalize_email(issuer)? != issuer {
                return Err(MeveError::InvalidPayload(
                    "issuer email is not normalized".into(),
                ));
            }
        }
        if let Some(kid) = &self.kid {
            if kid.trim().is_empty() {
                return Err(MeveError::InvalidPayload("empty key id".into()));
            }
        }
        if self.sig.is_some() {
            match self.signature_bytes() {
                Some(sig) if sig.len() == SIGNATURE_BYTES => {}
                _ => {
                    return Err(MeveError::InvalidPayload(
                        "sig must be 64 base64-encoded bytes".into(),
                    ))
                }
            }
        }
        Ok(())
    }
}

/// Validate and wrap a payload into a marker token.
pub fn encode(payload: &WatermarkPayload) -> Result<String> {
    payload.validate()?;
    let mut normalized = payload.clone();
    normalized.hash = normalized.hash.to_lowercase();
    let json = serde_json::to_string(&normalized)
        .map_err(|e| MeveError::Serialization(e.to_string()))?;
    Ok(format!(
        "{MARKER_PREFIX}{}{MARKER_SUFFIX}",
        STANDARD.encode(json.as_bytes())
    ))
}

/// First valid marker in `text`.
pub fn decode(text: &str) -> Option<WatermarkPayload> {
    decode_bytes(text.as_bytes())
}

/// First valid marker anywhere in `haystack`.
pub fn decode_bytes(haystack: &[u8]) -> Option<WatermarkPayload> {
    let prefix = MARKER_PREFIX.as_bytes();
    let suffix = MARKER_SUFFIX.as_bytes();
    let mut from = 0;
    while let Some(span) = find_span(haystack, prefix, suffix, from) {
        let content = &haystack[span.start + prefix.len()..span.end - suffix.len()];
        if let Some(payload) = decode_content(content) {
            return Some(payload);
        }
        from = span.start + 1;
    }
    None
}

/// Like [`decode_bytes`], but returns the last valid token in `haystack`.
pub fn decode_bytes_last(haystack: &[u8]) -> Option<WatermarkPayload> {
    let prefix = MARKER_PREFIX.as_bytes();
    let suffix = MARKER_SUFFIX.as_bytes();
    let mut spans = Vec::new();
    let mut from = 0;
    while let Some(span) = find_span(haystack, prefix, suffix, from) {
        from = span.start + 1;
        spans.push(span);
    }
    spans.iter().rev().find_map(|span| {
        decode_content(&haystack[span.start + prefix.len()..span.end - suffix.len()])
    })
}

/// Decode base64(JSON) content without delimiters.
pub(crate) fn decode_content(content: &[u8]) -> Option<WatermarkPayload> {
    let trimmed = content.trim_ascii();
    if trimmed.is_empty() || trimmed.len() > MAX_TOKEN_CONTENT {
        return None;
    }
    let json = [STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(trimmed).ok())?;
    let mut payload: WatermarkPayload = serde_json::from_slice(&json).ok()?;
    payload.validate().ok()?;
    payload.hash = payload.hash.to_lowercase();
    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const TS: &str = "2024-01-01T00:00:00.000Z";

    fn sample() -> WatermarkPayload {
        WatermarkPayload::new(HASH, TS)
    }

    #[test]
    fn test_encode_shape() {
        let token = encode(&sample()).unwrap();
        assert!(token.starts_with(MARKER_PREFIX));
        assert!(token.ends_with(MARKER_SUFFIX));
        assert!(token.is_ascii());
    }

    #[test]
    fn test_decode_encoded_payload_in_text() {
        let payload = sample().with_issuer(" Carol@Example.com").unwrap();
        let token = encode(&payload).unwrap();
        let text = format!("leading noise {token} trailing noise");
        assert_eq!(decode(&text), Some(payload));
    }

    #[test]
    fn test_encode_rejects_bad_hash() {
        let payload = WatermarkPayload::new("abc123", TS);
        assert!(matches!(
            encode(&payload),
            Err(MeveError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_encode_rejects_bad_timestamp() {
        let payload = WatermarkPayload::new(HASH, "yesterday");
        assert!(matches!(
            encode(&payload),
            Err(MeveError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_decode_rejects_other_alg() {
        let json = format!(r#"{{"alg":"md5","hash":"{HASH}","ts":"{TS}"}}"#);
        let text = format!("MEVE{{{}}}EVEM", STANDARD.encode(json));
        assert_eq!(decode(&text), None);
    }

    #[test]
    fn test_decode_skips_broken_span() {
        let good = encode(&sample()).unwrap();
        let text = format!("MEVE{{not base64!}}EVEM then {good}");
        assert_eq!(decode(&text), Some(sample()));
    }

    #[test]
    fn test_decode_skips_stray_prefix() {
        let good = encode(&sample()).unwrap();
        let text = format!("MEVE{{ dangling {good}");
        assert_eq!(decode(&text), Some(sample()));
    }

    #[test]
    fn test_decode_absent_returns_none() {
        assert_eq!(decode("nothing to see here"), None);
        assert_eq!(decode(""), None);
        assert_eq!(decode_bytes(&[0xFF, 0x00, 0x4D, 0x45]), None);
    }

    #[test]
    fn test_decode_accepts_url_safe_unpadded() {
        let json = serde_json::to_string(&sample()).unwrap();
        let text = format!("MEVE{{{}}}EVEM", URL_SAFE_NO_PAD.encode(json));
        assert_eq!(decode(&text), Some(sample()));
    }

    #[test]
    fn test_decode_lowercases_hash() {
        let mut upper = sample();
        upper.hash = HASH.to_uppercase();
        let json = serde_json::to_string(&upper).unwrap();
        let text = format!("MEVE{{{}}}EVEM", STANDARD.encode(json));
        assert_eq!(decode(&text).unwrap().hash, HASH);
    }

    #[test]
    fn test_signable_bytes_exclude_sig() {
        let unsigned = sample().with_key_id("k1");
        let signed = unsigned.clone().with_signature(&[9u8; 64]);
        assert_eq!(
            unsigned.signable_bytes().unwrap(),
            signed.signable_bytes().unwrap()
        );
        assert!(signed.is_signed());
    }

    #[test]
    fn test_find_span_positions() {
        let hay = b"xxMEVE{abc}EVEMyy";
        let span = find_span(hay, b"MEVE{", b"}EVEM", 0).unwrap();
        assert_eq!(span, Span { start: 2, end: 15 });
        assert_eq!(span.len(), 13);
        assert!(find_span(hay, b"MEVE{", b"}EVEM", 3).is_none());
    }

    #[test]
    fn test_decode_bytes_last_prefers_later_token() {
        let newer = WatermarkPayload::new(HASH, "2025-01-01T00:00:00.000Z");
        let text = format!(
            "{} MEVE{{garbage}}EVEM {} MEVE{{not-base64!}}EVEM",
            encode(&sample()).unwrap(),
            encode(&newer).unwrap()
        );
        assert_eq!(decode_bytes(text.as_bytes()), Some(sample()));
        assert_eq!(decode_bytes_last(text.as_bytes()), Some(newer));
        assert_eq!(decode_bytes_last(b"no marker here"), None);
    }

    #[test]
    fn test_rfind_subslice() {
        assert_eq!(rfind_subslice(b"%%EOF\n%%EOF", b"%%EOF"), Some(6));
        assert_eq!(rfind_subslice(b"abc", b"%%EOF"), None);
    }
}
