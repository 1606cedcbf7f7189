//! Canonical proof model and deterministic JSON serialization.
//!
//! Hashes and signatures are computed over [`canonicalize`] output: object keys
//! sorted by byte order at every depth, arrays in their original order, no
//! insignificant whitespace. Two logically identical values always produce the
//! same bytes regardless of how their maps were built.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MeveError, Result, CURRENT_PROOF_VERSION, SUPPORTED_VERSIONS};
use crate::hashing::HEX_DIGEST_LEN;

/// Ed25519 signature length in bytes.
pub const SIGNATURE_BYTES: usize = 64;

/// Serialize a JSON value canonically.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        // Display on scalars is already compact JSON.
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Canonical JSON of any serializable value.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let value =
        serde_json::to_value(value).map_err(|e| MeveError::Serialization(e.to_string()))?;
    Ok(canonicalize(&value))
}

/// Current time as an ISO-8601 UTC timestamp with millisecond precision.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Format a UTC instant the way proofs record it (`2024-01-01T00:00:00.000Z`).
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Whether `ts` starts with a `YYYY-MM-DDTHH:MM:SS` date-time.
pub fn is_iso8601_prefixed(ts: &str) -> bool {
    let b = ts.as_bytes();
    if b.len() < 19 {
        return false;
    }
    let digits = [0, 1, 2, 3, 5, 6, 8, 9, 11, 12, 14, 15, 17, 18];
    digits.iter().all(|&i| b[i].is_ascii_digit())
        && b[4] == b'-'
        && b[7] == b'-'
        && b[10] == b'T'
        && b[13] == b':'
        && b[16] == b':'
}

/// Whether `ts` is a full ISO-8601 timestamp in UTC (`Z` suffix).
pub fn is_utc_timestamp(ts: &str) -> bool {
    ts.ends_with('Z') && is_iso8601_prefixed(ts) && DateTime::parse_from_rfc3339(ts).is_ok()
}

/// Trim, lowercase and sanity-check an issuer email address.
pub fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    let mut parts = email.split('@');
    let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
        (Some(l), Some(d), None) => (l, d),
        _ => {
            return Err(MeveError::InvalidPayload(format!(
                "issuer is not an email address: {raw:?}"
            )))
        }
    };
    if local.is_empty()
        || domain.is_empty()
        || !domain.contains('.')
        || email.chars().any(char::is_whitespace)
    {
        return Err(MeveError::InvalidPayload(format!(
            "issuer is not an email address: {raw:?}"
        )));
    }
    Ok(email)
}

/// Facts about the protected document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    pub size: u64,
    /// Lowercase hex SHA-256 of the original, unmarked bytes.
    pub sha256: String,
}

impl DocumentInfo {
    /// Describe `original` by size and digest.
    pub fn from_bytes(original: &[u8]) -> Self {
        Self {
            name: None,
            mime: None,
            size: original.len() as u64,
            sha256: crate::hashing::digest(original),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

/// Who issued a proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Issuer {
    /// Personal issuance, normalized email.
    Email { email: String },
    /// Organizational issuance.
    Organization { domain: String, key_id: String },
}

impl Issuer {
    pub fn email(raw: &str) -> Result<Self> {
        Ok(Self::Email {
            email: normalize_email(raw)?,
        })
    }

    pub fn organization(domain: &str, key_id: impl Into<String>) -> Result<Self> {
        let domain = domain.trim().to_lowercase();
        let key_id = key_id.into();
        if domain.is_empty() || !domain.contains('.') || key_id.trim().is_empty() {
            return Err(MeveError::InvalidPayload(
                "organization issuer needs a domain and key id".into(),
            ));
        }
        Ok(Self::Organization { domain, key_id })
    }

    fn check(&self) -> Result<()> {
        match self {
            Self::Email { email } => {
                if &normalize_email(email)? != email {
                    return Err(MeveError::InvalidPayload(
                        "issuer email is not normalized".into(),
                    ));
                }
            }
            Self::Organization { domain, key_id } => {
                if domain != &domain.trim().to_lowercase() || key_id.trim().is_empty() {
                    return Err(MeveError::InvalidPayload(
                        "organization issuer is not normalized".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// The full, versioned proof object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalProof {
    pub version: String,
    pub created_at: String,
    pub doc: DocumentInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<Issuer>,
    /// Base64 Ed25519 signature over [`CanonicalProof::signable_bytes`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl CanonicalProof {
    /// New unsigned proof at the current version.
    pub fn new(doc: DocumentInfo, created_at: impl Into<String>) -> Self {
        Self {
            version: CURRENT_PROOF_VERSION.to_string(),
            created_at: created_at.into(),
            doc,
            issuer: None,
            signature: None,
        }
    }

    pub fn with_issuer(mut self, issuer: Issuer) -> Self {
        self.issuer = Some(issuer);
        self
    }

    pub fn with_signature(mut self, signature: &[u8; SIGNATURE_BYTES]) -> Self {
        self.signature = Some(STANDARD.encode(signature));
        self
    }

    /// Canonical bytes of every field except `signature`.
    pub fn signable_bytes(&self) -> Result<Vec<u8>> {
        let mut value =
            serde_json::to_value(self).map_err(|e| MeveError::Serialization(e.to_string()))?;
        if let Value::Object(map) = &mut value {
            map.remove("signature");
        }
        Ok(canonicalize(&value).into_bytes())
    }

    /// Decoded signature bytes, if present and well-formed.
    pub fn signature_bytes(&self) -> Option<Vec<u8>> {
        self.signature
            .as_deref()
            .and_then(|s| STANDARD.decode(s).ok())
    }

    /// Canonical JSON of the whole proof.
    pub fn to_canonical_string(&self) -> Result<String> {
        to_canonical_json(self)
    }

    /// Parse and validate a proof from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| MeveError::Serialization(e.to_string()))?;
        validate(&value)
    }
}

/// Check a JSON value against the proof schema.
pub fn validate(value: &Value) -> Result<CanonicalProof> {
    let version = value
        .get("version")
        .and_then(Value::as_str)
        .ok_or_else(|| MeveError::InvalidPayload("missing version".into()))?;
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(MeveError::UnsupportedVersion(version.to_string()));
    }

    let proof: CanonicalProof = serde_json::from_value(value.clone())
        .map_err(|e| MeveError::InvalidPayload(e.to_string()))?;

    if !is_utc_timestamp(&proof.created_at) {
        return Err(MeveError::InvalidPayload(format!(
            "created_at is not an ISO-8601 UTC timestamp: {}",
            proof.created_at
        )));
    }

    let sha = &proof.doc.sha256;
    if sha.len() != HEX_DIGEST_LEN
        || !sha.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(MeveError::InvalidPayload(
            "doc.sha256 must be 64 lowercase hex characters".into(),
        ));
    }

    if let Some(issuer) = &proof.issuer {
        issuer.check()?;
    }

    if proof.signature.is_some() {
        match proof.signature_bytes() {
            Some(bytes) if bytes.len() == SIGNATURE_BYTES => {}
            _ => {
                return Err(MeveError::InvalidPayload(
                    "signature must be 64 base64-encoded bytes".into(),
                ))
            }
        }
    }

    Ok(proof)
}
