//! Fixed-layout binary record for signed proofs.
//!
//! ```text
//! magic "MEV1" | doc hash (32) | ts len (1) | ts (len) | issuer hash (32) | signature (64)
//! ```
//!
//! The signature covers every byte before it. Decoding is bounds-checked and
//! never panics on short or malformed input.

use crate::canonical::{normalize_email, SIGNATURE_BYTES};
use crate::error::{MeveError, Result};
use crate::hashing::sha256;

pub const RECORD_MAGIC: [u8; 4] = *b"MEV1";

const HASH_LEN: usize = 32;

/// Smallest possible record (empty timestamp).
pub const MIN_RECORD_LEN: usize = 4 + HASH_LEN + 1 + HASH_LEN + SIGNATURE_BYTES;

/// A decoded binary signed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRecord {
    pub doc_hash: [u8; 32],
    pub timestamp: String,
    /// SHA-256 of the normalized issuer email, zeros when anonymous.
    pub issuer_hash: [u8; 32],
    pub signature: [u8; 64],
}

/// Issuer hash for an optional email.
pub fn issuer_hash(email: Option<&str>) -> Result<[u8; 32]> {
    match email {
        Some(raw) => Ok(sha256(normalize_email(raw)?.as_bytes())),
        None => Ok([0u8; 32]),
    }
}

/// Bytes a signer must sign for a record with these fields.
pub fn signable_prefix(doc_hash: &[u8; 32], timestamp: &str, issuer_hash: &[u8; 32]) -> Result<Vec<u8>> {
    let ts = timestamp.as_bytes();
    let ts_len = u8::try_from(ts.len()).map_err(|_| {
        MeveError::InvalidPayload(format!("timestamp too long: {} bytes", ts.len()))
    })?;

    let mut out = Vec::with_capacity(4 + HASH_LEN + 1 + ts.len() + HASH_LEN);
    out.extend_from_slice(&RECORD_MAGIC);
    out.extend_from_slice(doc_hash);
    out.push(ts_len);
    out.extend_from_slice(ts);
    out.extend_from_slice(issuer_hash);
    Ok(out)
}

impl SignedRecord {
    /// Total encoded length.
    pub fn encoded_len(&self) -> usize {
        MIN_RECORD_LEN + self.timestamp.len()
    }

    /// The signed portion of the record.
    pub fn signable_bytes(&self) -> Result<Vec<u8>> {
        signable_prefix(&self.doc_hash, &self.timestamp, &self.issuer_hash)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = self.signable_bytes()?;
        out.extend_from_slice(&self.signature);
        Ok(out)
    }

    /// Decode a record; rejects bad magic, truncation and trailing bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader { buf, pos: 0 };

        if reader.take(4)? != RECORD_MAGIC {
            return Err(MeveError::MalformedContainer("record magic mismatch".into()));
        }
        let doc_hash = reader.array::<32>()?;
        let ts_len = reader.take(1)?[0] as usize;
        let timestamp = std::str::from_utf8(reader.take(ts_len)?)
            .map_err(|_| MeveError::MalformedContainer("record timestamp is not UTF-8".into()))?
            .to_string();
        let issuer_hash = reader.array::<32>()?;
        let signature = reader.array::<64>()?;

        if reader.pos != buf.len() {
            return Err(MeveError::MalformedContainer(format!(
                "record has {} trailing bytes",
                buf.len() - reader.pos
            )));
        }

        Ok(Self {
            doc_hash,
            timestamp,
            issuer_hash,
            signature,
        })
    }

    pub fn doc_hash_hex(&self) -> String {
        hex::encode(self.doc_hash)
    }

    pub fn is_anonymous(&self) -> bool {
        self.issuer_hash == [0u8; 32]
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                MeveError::MalformedContainer(format!(
                    "record truncated at offset {} (need {n} bytes)",
                    self.pos
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SignedRecord {
        SignedRecord {
            doc_hash: sha256(b"document"),
            timestamp: "2024-01-01T00:00:00.000Z".into(),
            issuer_hash: issuer_hash(Some("Dana@Example.com")).unwrap(),
            signature: [0xAB; 64],
        }
    }

    #[test]
    fn test_layout_length() {
        let record = sample();
        let bytes = record.to_bytes().unwrap();
        assert_eq!(bytes.len(), 4 + 32 + 1 + 24 + 32 + 64);
        assert_eq!(bytes.len(), record.encoded_len());
        assert_eq!(&bytes[..4], b"MEV1");
        assert_eq!(bytes[36], 24);
    }

    #[test]
    fn test_decode_encoded_record() {
        let record = sample();
        let decoded = SignedRecord::from_bytes(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, record);
        assert!(!decoded.is_anonymous());
    }

    #[test]
    fn test_every_truncation_rejected() {
        let bytes = sample().to_bytes().unwrap();
        for len in 0..bytes.len() {
            assert!(SignedRecord::from_bytes(&bytes[..len]).is_err(), "len {len}");
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes.push(0);
        assert!(SignedRecord::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            SignedRecord::from_bytes(&bytes),
            Err(MeveError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_oversized_length_byte_rejected() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[36] = 0xFF;
        assert!(SignedRecord::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_anonymous_issuer_hash() {
        assert_eq!(issuer_hash(None).unwrap(), [0u8; 32]);
        assert_eq!(
            issuer_hash(Some(" X@Y.io")).unwrap(),
            issuer_hash(Some("x@y.io")).unwrap()
        );
    }
}
