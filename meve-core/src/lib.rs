//! MEVE Core - invisible, verifiable proof markers for everyday documents
//!
//! This crate embeds a small signed marker inside ordinary files (PDF,
//! DOCX, PNG, JPEG) without changing how they render, and later extracts,
//! hash-checks and signature-verifies that marker from any copy of the file.
//! Nothing is stored server-side: the file is its own proof.
//!
//! # Features
//!
//! - Deterministic canonical JSON for reproducible hashes and signatures
//! - Ed25519 signatures with the private key held by a remote signer
//! - Per-format placement that keeps the host file valid
//! - Verification reports for end users (`summary()`)
//!
//! # Example
//!
//! ```no_run
//! use meve_core::{protect, verify, VerificationStatus};
//!
//! # fn example() -> meve_core::Result<()> {
//! let original = std::fs::read("contract.pdf")?;
//!
//! // Hash the original and embed the marker
//! let protected = protect::protect_now(&original, Some("legal@example.com"))?;
//! std::fs::write("contract.meve.pdf", &protected.bytes)?;
//!
//! // Later: check a copy against the original
//! let report = verify::verify(&protected.bytes, Some(&original));
//! assert_eq!(report.status, VerificationStatus::Valid);
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod binary;
pub mod canonical;
pub mod crypto;
pub mod error;
pub mod formats;
pub mod hashing;
pub mod marker;
pub mod protect;
pub mod signer;
pub mod verify;

// Re-export main types for convenience
pub use binary::SignedRecord;
pub use canonical::{CanonicalProof, DocumentInfo, Issuer};
pub use crypto::{CryptoProvider, Ed25519Provider};
pub use error::{MeveError, Result, CURRENT_PROOF_VERSION, MAX_SIGNER_PAYLOAD};
pub use formats::{detect, ContainerCodec, ContainerFormat};
pub use hashing::{digest, digest_reader, CancellationFlag};
pub use marker::WatermarkPayload;
pub use protect::Protected;
pub use signer::{LocalSigner, Signer, SignerSource};
pub use verify::{SignatureStatus, VerificationReport, VerificationStatus, Verifier, VerifierConfig};

#[cfg(feature = "network")]
pub use signer::{RemoteSigner, RemoteSignerConfig, SignerConfig, SignerProviderFactory};
