//! In-process signer for tests and development.

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use zeroize::Zeroizing;

use super::{check_payload, SignatureBytes, Signer, SignerSource};
use crate::crypto::{CryptoProvider, Ed25519Provider};
use crate::error::{Result, MAX_SIGNER_PAYLOAD};

/// Ed25519 signer holding its key in memory.
/// WARNING: Do not use in production - the private key lives in this process!
pub struct LocalSigner {
    key: SigningKey,
    max_payload_bytes: usize,
}

impl LocalSigner {
    /// Deterministic signer from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
            max_payload_bytes: MAX_SIGNER_PAYLOAD,
        }
    }

    /// Fresh random key.
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut rand::rngs::OsRng),
            max_payload_bytes: MAX_SIGNER_PAYLOAD,
        }
    }

    /// Signer with a fixed seed for simple tests.
    pub fn default_test() -> Self {
        Self::from_seed(&[0x5Eu8; 32])
    }

    pub fn with_max_payload(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    /// Sign without an executor.
    pub fn sign_sync(&self, payload: &[u8]) -> Result<SignatureBytes> {
        check_payload(payload, self.max_payload_bytes)?;
        let seed = Zeroizing::new(self.key.to_bytes());
        Ok(Ed25519Provider.sign(payload, &seed))
    }
}

impl Default for LocalSigner {
    fn default() -> Self {
        Self::default_test()
    }
}

#[async_trait]
impl Signer for LocalSigner {
    async fn sign(&self, payload: &[u8]) -> Result<SignatureBytes> {
        self.sign_sync(payload)
    }

    fn key_id(&self) -> Option<String> {
        let fingerprint = crate::hashing::sha256(&self.verifying_key_bytes());
        Some(format!("local-{}", hex::encode(&fingerprint[..8])))
    }

    fn public_key(&self) -> Option<[u8; 32]> {
        Some(self.verifying_key_bytes())
    }

    fn source_id(&self) -> SignerSource {
        SignerSource::Local
    }
}
