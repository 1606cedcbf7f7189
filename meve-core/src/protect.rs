//! Protection pipeline: hash, build the payload, embed.
//!
//! The document hash is always taken from the caller's untouched bytes before
//! any codec sees them, so the marker describes the original and not the
//! marked copy. Signing is optional and goes through a [`Signer`].

use tracing::{debug, info, instrument};

use crate::binary::{self, SignedRecord};
use crate::canonical::{self, CanonicalProof, DocumentInfo, Issuer};
use crate::error::{MeveError, Result};
use crate::formats::{self, ContainerFormat};
use crate::hashing;
use crate::marker::WatermarkPayload;
use crate::signer::Signer;

/// A marked copy and the payload it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Protected {
    pub format: ContainerFormat,
    pub payload: WatermarkPayload,
    pub bytes: Vec<u8>,
}

fn detect(original: &[u8]) -> Result<ContainerFormat> {
    formats::detect(original).ok_or(MeveError::UnsupportedFormat)
}

/// Unsigned payload describing `original`.
pub fn build_payload(original: &[u8], ts: &str, issuer: Option<&str>) -> Result<WatermarkPayload> {
    let payload = WatermarkPayload::new(hashing::digest(original), ts);
    match issuer {
        Some(email) => payload.with_issuer(email),
        None => Ok(payload),
    }
}

/// Hash `original`, build a payload stamped `ts`, and embed it.
#[instrument(level = "debug", skip_all, fields(bytes = original.len()))]
pub fn protect(original: &[u8], ts: &str, issuer: Option<&str>) -> Result<Protected> {
    let format = detect(original)?;
    let payload = build_payload(original, ts, issuer)?;
    let bytes = format.codec().embed(original, &payload)?;
    debug!(%format, hash = %payload.hash, "Protected document");
    Ok(Protected {
        format,
        payload,
        bytes,
    })
}

/// [`protect`] stamped with the current time.
pub fn protect_now(original: &[u8], issuer: Option<&str>) -> Result<Protected> {
    protect(original, &canonical::now_timestamp(), issuer)
}

/// Record the signer's key id on `payload` and sign it.
pub async fn sign_payload(signer: &dyn Signer, payload: WatermarkPayload) -> Result<WatermarkPayload> {
    let mut payload = payload;
    payload.sig = None;
    if let Some(kid) = signer.key_id() {
        payload = payload.with_key_id(kid);
    }
    let signature = signer.sign(&payload.signable_bytes()?).await?;
    Ok(payload.with_signature(&signature))
}

/// Like [`protect`], with a signed payload.
#[instrument(level = "debug", skip_all, fields(bytes = original.len(), signer = %signer.source_id()))]
pub async fn protect_signed(
    original: &[u8],
    ts: &str,
    issuer: Option<&str>,
    signer: &dyn Signer,
) -> Result<Protected> {
    let format = detect(original)?;
    let payload = build_payload(original, ts, issuer)?;
    let payload = sign_payload(signer, payload).await?;
    let bytes = format.codec().embed(original, &payload)?;
    info!(%format, kid = ?payload.kid, "Protected and signed document");
    Ok(Protected {
        format,
        payload,
        bytes,
    })
}

/// Issue a signed [`CanonicalProof`] for `original`.
pub async fn issue_proof(
    original: &[u8],
    name: Option<&str>,
    issuer: Option<Issuer>,
    created_at: &str,
    signer: &dyn Signer,
) -> Result<CanonicalProof> {
    let mut doc = DocumentInfo::from_bytes(original);
    if let Some(format) = formats::detect(original) {
        doc = doc.with_mime(format.mime());
    }
    if let Some(name) = name {
        doc = doc.with_name(name);
    }
    let mut proof = CanonicalProof::new(doc, created_at);
    if let Some(issuer) = issuer {
        proof = proof.with_issuer(issuer);
    }
    // Round-trip through the validator before spending a signature on it.
    let value = serde_json::to_value(&proof).map_err(|e| MeveError::Serialization(e.to_string()))?;
    canonical::validate(&value)?;

    let signature = signer.sign(&proof.signable_bytes()?).await?;
    Ok(proof.with_signature(&signature))
}

/// Issue a signed binary [`SignedRecord`] for `original`.
pub async fn issue_record(
    original: &[u8],
    timestamp: &str,
    issuer_email: Option<&str>,
    signer: &dyn Signer,
) -> Result<SignedRecord> {
    let doc_hash = hashing::sha256(original);
    let issuer_hash = binary::issuer_hash(issuer_email)?;
    let message = binary::signable_prefix(&doc_hash, timestamp, &issuer_hash)?;
    let signature = signer.sign(&message).await?;
    Ok(SignedRecord {
        doc_hash,
        timestamp: timestamp.to_string(),
        issuer_hash,
        signature,
    })
}

#[cfg(feature = "network")]
pub use batch::sign_batch;

#[cfg(feature = "network")]
mod batch {
    use std::sync::Arc;

    use tokio::sync::Semaphore;
    use tokio::task::JoinSet;
    use tracing::{debug, instrument, warn};

    use crate::error::{MeveError, Result};
    use crate::signer::{SignatureBytes, Signer};

    /// Sign every item with at most `concurrency` requests in flight.
    ///
    /// Results come back in input order, each with its own outcome.
    #[instrument(level = "debug", skip_all, fields(items = items.len(), concurrency))]
    pub async fn sign_batch(
        signer: Arc<dyn Signer>,
        items: Vec<Vec<u8>>,
        concurrency: usize,
    ) -> Vec<Result<SignatureBytes>> {
        let total = items.len();
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let signer = Arc::clone(&signer);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => signer.sign(&item).await,
                    Err(_) => Err(MeveError::Cancelled),
                };
                (index, result)
            });
        }

        let mut results: Vec<Option<Result<SignatureBytes>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => warn!(error = %e, "Signing task failed"),
            }
        }

        let failed = results
            .iter()
            .filter(|r| !matches!(r, Some(Ok(_))))
            .count();
        debug!(total, failed, "Batch signing finished");

        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| Err(MeveError::SignerUnavailable("signing task aborted".into())))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;
    use crate::formats::pdf::PdfCodec;
    use crate::formats::ContainerCodec;
    use crate::signer::LocalSigner;

    const PDF: &[u8] = b"%PDF-1.4\n1 0 obj<<>>endobj\ntrailer<<>>\n%%EOF\n";
    const TS: &str = "2024-05-01T10:00:00.000Z";

    #[test]
    fn test_hash_is_of_original() {
        let protected = protect(PDF, TS, None).unwrap();
        assert_eq!(protected.payload.hash, hashing::digest(PDF));
        assert_ne!(protected.payload.hash, hashing::digest(&protected.bytes));
        assert_eq!(protected.format, ContainerFormat::Pdf);
    }

    #[test]
    fn test_marked_copy_extracts_payload() {
        let protected = protect(PDF, TS, Some("Alice@Example.com")).unwrap();
        let extracted = PdfCodec.extract(&protected.bytes).unwrap();
        assert_eq!(extracted, protected.payload);
        assert_eq!(extracted.issuer.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn test_reprotect_after_incremental_update() {
        let first = protect(PDF, TS, None).unwrap();
        let mut updated = first.bytes.clone();
        updated.extend_from_slice(b"2 0 obj<<>>endobj\ntrailer<<>>\n%%EOF\n");

        let second = protect(&updated, "2025-01-01T00:00:00.000Z", None).unwrap();
        let extracted = formats::extract(&second.bytes).unwrap();
        assert_eq!(extracted, second.payload);
        assert_eq!(extracted.hash, hashing::digest(&updated));
    }

    #[test]
    fn test_unsupported_format() {
        assert!(matches!(
            protect(b"just text", TS, None),
            Err(MeveError::UnsupportedFormat)
        ));
    }

    #[test]
    fn test_bad_issuer_rejected() {
        assert!(matches!(
            protect(PDF, TS, Some("not-an-email")),
            Err(MeveError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_signed_payload_verifies() {
        let signer = LocalSigner::default_test();
        let protected = protect_signed(PDF, TS, None, &signer).await.unwrap();
        let payload = &protected.payload;
        assert_eq!(payload.kid, signer.key_id());
        let sig = payload.signature_bytes().unwrap();
        assert!(crypto::verify(
            &payload.signable_bytes().unwrap(),
            &sig,
            &signer.verifying_key_bytes()
        ));
    }

    #[tokio::test]
    async fn test_issue_proof_signature() {
        let signer = LocalSigner::default_test();
        let issuer = Issuer::email("bob@example.org").unwrap();
        let proof = issue_proof(PDF, Some("deal.pdf"), Some(issuer), TS, &signer)
            .await
            .unwrap();
        assert_eq!(proof.doc.mime.as_deref(), Some("application/pdf"));
        assert!(crypto::verify(
            &proof.signable_bytes().unwrap(),
            &proof.signature_bytes().unwrap(),
            &signer.verifying_key_bytes()
        ));
    }

    #[tokio::test]
    async fn test_issue_record_signature() {
        let signer = LocalSigner::default_test();
        let record = issue_record(PDF, TS, Some("a@b.io"), &signer).await.unwrap();
        let decoded = SignedRecord::from_bytes(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, record);
        assert!(crypto::verify(
            &record.signable_bytes().unwrap(),
            &record.signature,
            &signer.verifying_key_bytes()
        ));
    }

    #[cfg(feature = "network")]
    #[tokio::test]
    async fn test_sign_batch_preserves_order() {
        use std::sync::Arc;

        let local = LocalSigner::default_test();
        let key = local.verifying_key_bytes();
        let signer: Arc<dyn Signer> = Arc::new(local);
        let items: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i; 8]).collect();

        let results = sign_batch(signer, items.clone(), 3).await;
        assert_eq!(results.len(), items.len());
        for (item, result) in items.iter().zip(&results) {
            let sig = result.as_ref().unwrap();
            assert!(crypto::verify(item, sig, &key));
        }
    }

    #[cfg(feature = "network")]
    #[tokio::test]
    async fn test_sign_batch_per_item_errors() {
        use std::sync::Arc;

        let signer: Arc<dyn Signer> = Arc::new(LocalSigner::default_test());
        let results = sign_batch(signer, vec![b"ok".to_vec(), Vec::new()], 0).await;
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(MeveError::EmptyPayload)));
    }
}
