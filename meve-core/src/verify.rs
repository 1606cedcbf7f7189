//! Verification orchestrator.
//!
//! Given a candidate file (and optionally the original), walks
//! detect -> extract -> hash compare -> signature check and reports where it
//! stopped. Absence of a marker is an outcome, not an error.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::binary::SignedRecord;
use crate::canonical::CanonicalProof;
use crate::crypto::{self, CryptoProvider, Ed25519Provider};
use crate::error::{MeveError, Result};
use crate::formats::{self, ContainerFormat};
use crate::hashing;
use crate::marker::WatermarkPayload;

/// Environment variable holding the trusted public key (hex).
pub const PUBLIC_KEY_ENV: &str = "MEVE_PUBLIC_KEY";

/// Where verification ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    NoMarker,
    /// Marker decoded; hash not yet compared. Only appears in the trace.
    MarkerFound,
    HashMismatch,
    Valid,
    /// Marker is well-formed but there was no original to compare against.
    ValidMissingOriginal,
}

/// Outcome of the optional signature check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    /// Payload carries no signature.
    Absent,
    Valid,
    Invalid,
    /// Signed, but no public key was available to check it.
    UnknownKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub format: Option<ContainerFormat>,
    pub payload: Option<WatermarkPayload>,
    pub status: VerificationStatus,
    pub signature: SignatureStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// States visited, in order.
    pub trace: Vec<VerificationStatus>,
}

impl VerificationReport {
    fn new(format: Option<ContainerFormat>) -> Self {
        Self {
            format,
            payload: None,
            status: VerificationStatus::NoMarker,
            signature: SignatureStatus::Absent,
            reason: None,
            trace: Vec::new(),
        }
    }

    fn advance(&mut self, status: VerificationStatus) {
        self.status = status;
        self.trace.push(status);
    }

    fn finish(mut self, status: VerificationStatus, reason: Option<String>) -> Self {
        self.advance(status);
        self.reason = reason;
        self
    }

    /// Passed the hash stage and no signature was found invalid.
    pub fn is_valid(&self) -> bool {
        matches!(
            self.status,
            VerificationStatus::Valid | VerificationStatus::ValidMissingOriginal
        ) && self.signature != SignatureStatus::Invalid
    }

    /// One short line for end users.
    pub fn summary(&self) -> &'static str {
        match (self.status, self.signature) {
            (_, SignatureStatus::Invalid) => "Proof signature is not valid",
            (VerificationStatus::NoMarker, _) => "No proof found in this file",
            (VerificationStatus::HashMismatch, _) => {
                "Proof found, but this file does not match the protected original"
            }
            (VerificationStatus::Valid, SignatureStatus::Valid) => {
                "Valid proof: signed and matches the original"
            }
            (VerificationStatus::Valid, _) => "Valid proof: matches the original",
            (VerificationStatus::ValidMissingOriginal, SignatureStatus::Valid) => {
                "Signed proof found; provide the original to confirm it matches"
            }
            (VerificationStatus::ValidMissingOriginal, _) => {
                "Proof found; provide the original to confirm it matches"
            }
            (VerificationStatus::MarkerFound, _) => "Proof found",
        }
    }
}

/// Verifier configuration.
#[derive(Debug, Clone, Default)]
pub struct VerifierConfig {
    /// Trusted Ed25519 public key for signed payloads.
    pub public_key: Option<[u8; 32]>,
}

impl VerifierConfig {
    pub fn with_public_key(mut self, key: [u8; 32]) -> Self {
        self.public_key = Some(key);
        self
    }

    /// Read `MEVE_PUBLIC_KEY`; unset means no trusted key.
    pub fn from_env() -> Result<Self> {
        match std::env::var(PUBLIC_KEY_ENV) {
            Ok(hex_key) if !hex_key.trim().is_empty() => Ok(Self {
                public_key: Some(crypto::public_key_from_hex(&hex_key)?),
            }),
            _ => Ok(Self::default()),
        }
    }
}

pub struct Verifier {
    provider: Box<dyn CryptoProvider>,
    public_key: Option<[u8; 32]>,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(VerifierConfig::default())
    }
}

impl Verifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self {
            provider: Box::new(Ed25519Provider),
            public_key: config.public_key,
        }
    }

    pub fn with_provider(mut self, provider: Box<dyn CryptoProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn public_key(&self) -> Option<&[u8; 32]> {
        self.public_key.as_ref()
    }

    /// Verify `candidate` using the configured key for signatures.
    pub fn verify(&self, candidate: &[u8], original: Option<&[u8]>) -> VerificationReport {
        self.verify_with_key(candidate, original, None)
    }

    /// Verify `candidate`; `trusted_key` overrides the configured key.
    #[instrument(level = "debug", skip_all, fields(bytes = candidate.len(), has_original = original.is_some()))]
    pub fn verify_with_key(
        &self,
        candidate: &[u8],
        original: Option<&[u8]>,
        trusted_key: Option<&[u8; 32]>,
    ) -> VerificationReport {
        let Some(format) = formats::detect(candidate) else {
            return VerificationReport::new(None).finish(
                VerificationStatus::NoMarker,
                Some("format not supported".into()),
            );
        };
        let mut report = VerificationReport::new(Some(format));

        let Some(payload) = format.codec().extract(candidate) else {
            return report.finish(
                VerificationStatus::NoMarker,
                Some(format!("no marker in {format} file")),
            );
        };
        report.advance(VerificationStatus::MarkerFound);
        report.signature = self.check_signature(&payload, trusted_key.or(self.public_key.as_ref()));

        report = match original {
            None => report.finish(
                VerificationStatus::ValidMissingOriginal,
                Some("original not provided; hash not compared".into()),
            ),
            Some(original) => {
                let actual = hex::encode(self.provider.digest(original));
                if hashing::hashes_equal(&actual, &payload.hash) {
                    report.finish(VerificationStatus::Valid, None)
                } else {
                    report.finish(
                        VerificationStatus::HashMismatch,
                        Some(format!("expected {}, got {actual}", payload.hash)),
                    )
                }
            }
        };
        if report.signature == SignatureStatus::Invalid && report.reason.is_none() {
            report.reason = Some("signature does not verify".into());
        }

        debug!(
            %format,
            status = ?report.status,
            signature = ?report.signature,
            "Verification finished"
        );
        report.payload = Some(payload);
        report
    }

    fn check_signature(&self, payload: &WatermarkPayload, key: Option<&[u8; 32]>) -> SignatureStatus {
        if !payload.is_signed() {
            return SignatureStatus::Absent;
        }
        let Some(key) = key else {
            return SignatureStatus::UnknownKey;
        };
        let (Some(signature), Ok(message)) = (payload.signature_bytes(), payload.signable_bytes())
        else {
            return SignatureStatus::Invalid;
        };
        if self.provider.verify(&message, &signature, key) {
            SignatureStatus::Valid
        } else {
            SignatureStatus::Invalid
        }
    }

    /// Check a detached proof against `key` and, if given, the original bytes.
    pub fn verify_proof(
        &self,
        proof: &CanonicalProof,
        original: Option<&[u8]>,
        key: &[u8; 32],
    ) -> Result<()> {
        let signature = proof
            .signature_bytes()
            .ok_or_else(|| MeveError::InvalidPayload("proof is not signed".into()))?;
        if !self.provider.verify(&proof.signable_bytes()?, &signature, key) {
            return Err(MeveError::SignatureInvalid);
        }
        if let Some(original) = original {
            let actual = hex::encode(self.provider.digest(original));
            if !hashing::hashes_equal(&actual, &proof.doc.sha256) {
                return Err(MeveError::HashMismatch {
                    expected: proof.doc.sha256.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Check a binary record against `key` and, if given, the original bytes.
    pub fn verify_record(
        &self,
        record: &SignedRecord,
        original: Option<&[u8]>,
        key: &[u8; 32],
    ) -> Result<()> {
        if !self
            .provider
            .verify(&record.signable_bytes()?, &record.signature, key)
        {
            return Err(MeveError::SignatureInvalid);
        }
        if let Some(original) = original {
            let actual = self.provider.digest(original);
            if actual != record.doc_hash {
                return Err(MeveError::HashMismatch {
                    expected: record.doc_hash_hex(),
                    actual: hex::encode(actual),
                });
            }
        }
        Ok(())
    }
}

/// [`Verifier::verify`] with a default verifier.
pub fn verify(candidate: &[u8], original: Option<&[u8]>) -> VerificationReport {
    Verifier::default().verify(candidate, original)
}

/// [`Verifier::verify_proof`] with the default provider.
pub fn verify_proof(proof: &CanonicalProof, original: Option<&[u8]>, key: &[u8; 32]) -> Result<()> {
    Verifier::default().verify_proof(proof, original, key)
}

/// [`Verifier::verify_record`] with the default provider.
pub fn verify_record(record: &SignedRecord, original: Option<&[u8]>, key: &[u8; 32]) -> Result<()> {
    Verifier::default().verify_record(record, original, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::DocumentInfo;
    use crate::protect::{self, sign_payload};
    use crate::signer::{LocalSigner, Signer};

    const PDF: &[u8] = b"%PDF-1.4\n1 0 obj<<>>endobj\ntrailer<<>>\n%%EOF\n";
    const TS: &str = "2024-05-01T10:00:00.000Z";

    #[test]
    fn test_valid_with_original() {
        let marked = protect::protect(PDF, TS, None).unwrap().bytes;
        let report = verify(&marked, Some(PDF));
        assert_eq!(report.status, VerificationStatus::Valid);
        assert_eq!(report.signature, SignatureStatus::Absent);
        assert_eq!(report.format, Some(ContainerFormat::Pdf));
        assert_eq!(
            report.trace,
            vec![VerificationStatus::MarkerFound, VerificationStatus::Valid]
        );
        assert!(report.is_valid());
    }

    #[test]
    fn test_missing_original() {
        let marked = protect::protect(PDF, TS, None).unwrap().bytes;
        let report = verify(&marked, None);
        assert_eq!(report.status, VerificationStatus::ValidMissingOriginal);
        assert!(report.is_valid());
    }

    #[test]
    fn test_tampered_original() {
        let marked = protect::protect(PDF, TS, None).unwrap().bytes;
        let mut tampered = PDF.to_vec();
        tampered[12] ^= 0x01;
        let report = verify(&marked, Some(&tampered));
        assert_eq!(report.status, VerificationStatus::HashMismatch);
        assert!(!report.is_valid());
        assert!(report.reason.is_some());
    }

    #[test]
    fn test_unmarked_and_unsupported() {
        let report = verify(PDF, None);
        assert_eq!(report.status, VerificationStatus::NoMarker);
        assert_eq!(report.summary(), "No proof found in this file");

        let report = verify(b"hello world", None);
        assert_eq!(report.status, VerificationStatus::NoMarker);
        assert_eq!(report.reason.as_deref(), Some("format not supported"));
        assert_eq!(report.format, None);
    }

    #[tokio::test]
    async fn test_signature_states() {
        let signer = LocalSigner::default_test();
        let marked = protect::protect_signed(PDF, TS, None, &signer)
            .await
            .unwrap()
            .bytes;

        let unknown = verify(&marked, Some(PDF));
        assert_eq!(unknown.signature, SignatureStatus::UnknownKey);
        assert_eq!(unknown.status, VerificationStatus::Valid);

        let verifier =
            Verifier::new(VerifierConfig::default().with_public_key(signer.verifying_key_bytes()));
        let good = verifier.verify(&marked, Some(PDF));
        assert_eq!(good.signature, SignatureStatus::Valid);
        assert_eq!(good.summary(), "Valid proof: signed and matches the original");

        let other = LocalSigner::from_seed(&[9u8; 32]).verifying_key_bytes();
        let bad = verifier.verify_with_key(&marked, Some(PDF), Some(&other));
        assert_eq!(bad.signature, SignatureStatus::Invalid);
        assert_eq!(bad.status, VerificationStatus::Valid);
        assert!(!bad.is_valid());
    }

    #[tokio::test]
    async fn test_altered_payload_fails_signature() {
        let signer = LocalSigner::default_test();
        let payload = crate::protect::build_payload(PDF, TS, None).unwrap();
        let mut signed = sign_payload(&signer, payload).await.unwrap();
        signed.ts = "2030-01-01T00:00:00.000Z".into();
        let marked = formats::embed(PDF, &signed).unwrap();

        let verifier =
            Verifier::new(VerifierConfig::default().with_public_key(signer.verifying_key_bytes()));
        assert_eq!(
            verifier.verify(&marked, None).signature,
            SignatureStatus::Invalid
        );
    }

    #[tokio::test]
    async fn test_verify_proof() {
        let signer = LocalSigner::default_test();
        let key = signer.public_key().unwrap();
        let proof = protect::issue_proof(PDF, None, None, TS, &signer)
            .await
            .unwrap();
        verify_proof(&proof, Some(PDF), &key).unwrap();
        assert!(matches!(
            verify_proof(&proof, Some(b"%PDF-other"), &key),
            Err(MeveError::HashMismatch { .. })
        ));

        let unsigned = CanonicalProof::new(DocumentInfo::from_bytes(PDF), TS);
        assert!(matches!(
            verify_proof(&unsigned, None, &key),
            Err(MeveError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_record() {
        let signer = LocalSigner::default_test();
        let key = signer.verifying_key_bytes();
        let mut record = protect::issue_record(PDF, TS, None, &signer).await.unwrap();
        verify_record(&record, Some(PDF), &key).unwrap();

        record.timestamp = "2024-05-01T10:00:01.000Z".into();
        assert!(matches!(
            verify_record(&record, None, &key),
            Err(MeveError::SignatureInvalid)
        ));
    }
}
