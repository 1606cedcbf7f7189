//! Signing capability.
//!
//! The private key that issues proofs lives behind a remote endpoint; this
//! process only ever sees signatures. [`Signer`] abstracts that boundary so the
//! transport can time out or be cancelled without leaking into the codecs.
//!
//! ## Providers
//!
//! - **Remote** - HTTP signer holding the production key (`network` feature)
//! - **Local** - in-process Ed25519 key for tests and development
//!
//! ## Quick Start
//!
//! ```no_run
//! use meve_core::signer::{Signer, SignerConfig, SignerProviderFactory};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Remote signer configured from MEVE_SIGNER_URL / MEVE_SIGNER_TOKEN
//! let signer = SignerProviderFactory::create(SignerConfig::Auto)?;
//! let signature = signer.sign(b"canonical payload bytes").await?;
//! # Ok(())
//! # }
//! ```

mod local;
#[cfg(feature = "network")]
mod provider;
#[cfg(feature = "network")]
mod remote;

pub use local::LocalSigner;
#[cfg(feature = "network")]
pub use provider::{SignerConfig, SignerProviderFactory};
#[cfg(feature = "network")]
pub use remote::{RemoteSigner, RemoteSignerConfig};

use async_trait::async_trait;

use crate::error::{MeveError, Result};

/// Raw Ed25519 signature.
pub type SignatureBytes = [u8; 64];

/// Something that can produce Ed25519 signatures over small payloads.
///
/// Implementations must be thread-safe (`Send + Sync`).
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign `payload`. Only canonical payload bytes are signed, never whole
    /// documents, so implementations enforce a small size cap.
    async fn sign(&self, payload: &[u8]) -> Result<SignatureBytes>;

    /// Identifier of the signing key, recorded as `kid` in payloads.
    fn key_id(&self) -> Option<String>;

    /// Public half of the signing key, when the signer knows it.
    fn public_key(&self) -> Option<[u8; 32]>;

    /// Where signatures come from.
    fn source_id(&self) -> SignerSource;
}

/// Identifies the origin of a signature.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SignerSource {
    /// Remote key-holding endpoint.
    Remote { endpoint: String },
    /// In-process key (NOT for production).
    Local,
}

impl std::fmt::Display for SignerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote { endpoint } => write!(f, "Remote signer ({endpoint})"),
            Self::Local => write!(f, "Local key (NOT FOR PRODUCTION)"),
        }
    }
}

/// Reject payloads a signer must never see.
pub(crate) fn check_payload(payload: &[u8], max: usize) -> Result<()> {
    if payload.is_empty() {
        return Err(MeveError::EmptyPayload);
    }
    if payload.len() > max {
        return Err(MeveError::SizeExceeded {
            size: payload.len(),
            max,
        });
    }
    Ok(())
}
