//! Cryptographic capability used by verification.
//!
//! Call sites depend on [`CryptoProvider`] rather than on a concrete library so
//! the backend can be swapped. [`Ed25519Provider`] is the default.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::canonical::SIGNATURE_BYTES;
use crate::error::{MeveError, Result};

/// Ed25519 public key length in bytes.
pub const PUBLIC_KEY_BYTES: usize = 32;

/// Digest, signing and verification primitives.
pub trait CryptoProvider: Send + Sync {
    /// SHA-256 of `data`.
    fn digest(&self, data: &[u8]) -> [u8; 32];

    /// Sign `message` with the secret key `seed`.
    fn sign(&self, message: &[u8], seed: &[u8; 32]) -> [u8; SIGNATURE_BYTES];

    /// Verify `signature` over `message`. Never errors; malformed input is `false`.
    fn verify(&self, message: &[u8], signature: &[u8], public_key: &[u8; 32]) -> bool;

    /// Short algorithm label for reports.
    fn algorithm(&self) -> &'static str;
}

/// `ed25519-dalek` + `sha2` backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Provider;

impl CryptoProvider for Ed25519Provider {
    fn digest(&self, data: &[u8]) -> [u8; 32] {
        crate::hashing::sha256(data)
    }

    fn sign(&self, message: &[u8], seed: &[u8; 32]) -> [u8; SIGNATURE_BYTES] {
        SigningKey::from_bytes(seed).sign(message).to_bytes()
    }

    fn verify(&self, message: &[u8], signature: &[u8], public_key: &[u8; 32]) -> bool {
        let Ok(sig_bytes) = <[u8; SIGNATURE_BYTES]>::try_from(signature) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(public_key) else {
            return false;
        };
        let signature = Signature::from_bytes(&sig_bytes);
        key.verify(message, &signature).is_ok()
    }

    fn algorithm(&self) -> &'static str {
        "Ed25519"
    }
}

/// Standalone verification with the default provider.
pub fn verify(message: &[u8], signature: &[u8], public_key: &[u8; 32]) -> bool {
    Ed25519Provider.verify(message, signature, public_key)
}

/// Parse a hex-encoded Ed25519 public key.
pub fn public_key_from_hex(hex_str: &str) -> Result<[u8; PUBLIC_KEY_BYTES]> {
    let bytes = hex::decode(hex_str.trim())
        .map_err(|e| MeveError::InvalidPayload(format!("invalid public key hex: {e}")))?;
    let key: [u8; PUBLIC_KEY_BYTES] = bytes.try_into().map_err(|v: Vec<u8>| {
        MeveError::InvalidPayload(format!("expected 32-byte public key, got {}", v.len()))
    })?;
    VerifyingKey::from_bytes(&key)
        .map_err(|_| MeveError::InvalidPayload("public key is not a valid Ed25519 point".into()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> SigningKey {
        SigningKey::from_bytes(&[42u8; 32])
    }

    #[test]
    fn test_verify_valid_signature() {
        let key = keypair();
        let sig = key.sign(b"payload");
        assert!(verify(
            b"payload",
            &sig.to_bytes(),
            key.verifying_key().as_bytes()
        ));
    }

    #[test]
    fn test_verify_wrong_message() {
        let key = keypair();
        let sig = key.sign(b"payload");
        assert!(!verify(
            b"other",
            &sig.to_bytes(),
            key.verifying_key().as_bytes()
        ));
    }

    #[test]
    fn test_verify_wrong_length_is_false() {
        let key = keypair();
        let pk = key.verifying_key().to_bytes();
        assert!(!verify(b"payload", &[0u8; 63], &pk));
        assert!(!verify(b"payload", &[0u8; 65], &pk));
        assert!(!verify(b"payload", &[], &pk));
    }

    #[test]
    fn test_public_key_from_hex() {
        let key = keypair();
        let hex_key = hex::encode(key.verifying_key().as_bytes());
        assert_eq!(
            public_key_from_hex(&hex_key).unwrap(),
            key.verifying_key().to_bytes()
        );
        assert!(public_key_from_hex("abcd").is_err());
        assert!(public_key_from_hex("zz").is_err());
    }

    #[test]
    fn test_provider_sign_roundtrip() {
        let seed = [42u8; 32];
        let sig = Ed25519Provider.sign(b"payload", &seed);
        let pk = keypair().verifying_key().to_bytes();
        assert!(Ed25519Provider.verify(b"payload", &sig, &pk));
        assert!(!Ed25519Provider.verify(b"tampered", &sig, &pk));
        assert_eq!(
            sig,
            crate::signer::LocalSigner::from_seed(&seed)
                .sign_sync(b"payload")
                .unwrap()
        );
    }

    #[test]
    fn test_provider_digest_matches_hashing() {
        assert_eq!(
            hex::encode(Ed25519Provider.digest(b"abc")),
            crate::hashing::digest(b"abc")
        );
    }
}
