use thiserror::Error;

/// Proof version tag written by this crate.
pub const CURRENT_PROOF_VERSION: &str = "meve/1";

/// Proof versions accepted by validators and extractors.
pub const SUPPORTED_VERSIONS: &[&str] = &[CURRENT_PROOF_VERSION];

/// Default cap on the number of bytes handed to a signer.
pub const MAX_SIGNER_PAYLOAD: usize = 4096;

#[derive(Error, Debug)]
pub enum MeveError {
    #[error("Unsupported container format")]
    UnsupportedFormat,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    #[error("Unsupported proof version: {0}")]
    UnsupportedVersion(String),

    #[error("Hash mismatch: expected={expected}, actual={actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Signature invalid")]
    SignatureInvalid,

    #[error("Signer unavailable: {0}")]
    SignerUnavailable(String),

    #[error("Signer timed out after {timeout_ms}ms")]
    SignerTimeout { timeout_ms: u64 },

    #[error("Payload too large for signer: {size} bytes (max {max})")]
    SizeExceeded { size: usize, max: usize },

    #[error("Empty payload")]
    EmptyPayload,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl MeveError {
    /// HTTP status class a service boundary should report for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::EmptyPayload
            | Self::InvalidPayload(_)
            | Self::UnsupportedFormat
            | Self::MalformedContainer(_)
            | Self::UnsupportedVersion(_) => 400,
            Self::SizeExceeded { .. } => 413,
            Self::HashMismatch { .. } | Self::SignatureInvalid => 422,
            Self::SignerTimeout { .. } => 504,
            Self::SignerUnavailable(_) => 500,
            Self::Cancelled => 499,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, MeveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_classes() {
        assert_eq!(MeveError::EmptyPayload.http_status(), 400);
        assert_eq!(
            MeveError::SizeExceeded {
                size: 5000,
                max: 4096
            }
            .http_status(),
            413
        );
        assert_eq!(
            MeveError::SignerUnavailable("no key".into()).http_status(),
            500
        );
        assert_eq!(MeveError::SignerTimeout { timeout_ms: 10 }.http_status(), 504);
    }

    #[test]
    fn test_current_version_is_supported() {
        assert!(SUPPORTED_VERSIONS.contains(&CURRENT_PROOF_VERSION));
    }
}
