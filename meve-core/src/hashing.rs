//! SHA-256 content fingerprints.
//!
//! The digest recorded in a proof is always taken over the original bytes,
//! before any container is modified. Computing it over marked output would let
//! a file verify against itself.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::{MeveError, Result};

/// Chunk size for streaming digests.
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Length of a hex-encoded SHA-256 digest.
pub const HEX_DIGEST_LEN: usize = 64;

/// Cooperative cancellation handle shared between a caller and a long hash.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Work in progress stops at the next chunk boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Raw SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Lowercase hex SHA-256 of `data`.
pub fn digest(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Hash a reader in fixed-size chunks, checking `cancel` between chunks.
pub fn digest_reader<R: Read>(mut reader: R, cancel: &CancellationFlag) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];

    loop {
        if cancel.is_cancelled() {
            return Err(MeveError::Cancelled);
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Whether `s` is a 64-character hex digest (either case).
pub fn is_hex_digest(s: &str) -> bool {
    s.len() == HEX_DIGEST_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Case-insensitive comparison of two hex digests.
pub fn hashes_equal(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.eq_ignore_ascii_case(b)
}
