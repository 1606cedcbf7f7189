//! Signer selection from configuration.

use std::sync::Arc;

use super::{LocalSigner, RemoteSigner, RemoteSignerConfig, Signer};
use crate::error::Result;

/// Configuration for creating signers.
#[derive(Debug, Clone, Default)]
pub enum SignerConfig {
    /// Remote key-holding endpoint (production).
    Remote(RemoteSignerConfig),

    /// In-process key derived from a seed (testing only).
    Local { seed: [u8; 32] },

    /// Remote signer from environment variables.
    #[default]
    Auto,
}

/// Factory for creating signers.
pub struct SignerProviderFactory;

impl SignerProviderFactory {
    /// Create a signer from configuration.
    pub fn create(config: SignerConfig) -> Result<Arc<dyn Signer>> {
        match config {
            SignerConfig::Remote(remote) => Ok(Arc::new(RemoteSigner::new(remote)?)),
            SignerConfig::Local { seed } => {
                tracing::warn!("Using in-process signing key (not for production)");
                Ok(Arc::new(LocalSigner::from_seed(&seed)))
            }
            SignerConfig::Auto => Self::create_auto(),
        }
    }

    /// Remote signer from `MEVE_SIGNER_URL`; there is no silent local fallback.
    fn create_auto() -> Result<Arc<dyn Signer>> {
        let config = RemoteSignerConfig::from_env()?;
        tracing::info!(endpoint = %config.endpoint, "Auto-selected remote signer");
        Self::create(SignerConfig::Remote(config))
    }

    /// Create a deterministic local signer for testing.
    pub fn create_mock() -> Arc<dyn Signer> {
        Arc::new(LocalSigner::default())
    }
}
