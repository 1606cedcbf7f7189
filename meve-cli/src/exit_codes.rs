//! Exit codes following sysexits.h conventions.
//!
//! These codes let scripts and CI systems tell a tampered file apart from a
//! missing one or an unreachable signer.

use meve_core::MeveError;

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Data format error (no marker, mismatch, bad signature, unsupported file).
/// Maps to EX_DATAERR from sysexits.h.
pub const VERIFICATION_FAILED: i32 = 65;

/// Cannot open input file.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Signer unreachable or timed out.
/// Maps to EX_UNAVAILABLE from sysexits.h.
pub const NETWORK_ERROR: i32 = 69;

/// I/O error (cannot write output file).
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: i32 = 74;

/// Exit code with optional error context.
#[derive(Debug, PartialEq, Eq)]
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub const fn success() -> Self {
        Self {
            code: SUCCESS,
            message: None,
        }
    }

    pub const fn verification_failed() -> Self {
        Self {
            code: VERIFICATION_FAILED,
            message: None,
        }
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        // Context strings mark I/O failures; library errors carry their own kind.
        let code = if message.starts_with("Failed to read") {
            INPUT_ERROR
        } else if message.starts_with("Failed to write") {
            IO_ERROR
        } else if let Some(meve) = err.chain().find_map(|e| e.downcast_ref::<MeveError>()) {
            classify(meve)
        } else {
            GENERAL_ERROR
        };

        Self {
            code,
            message: Some(message),
        }
    }
}

fn classify(err: &MeveError) -> i32 {
    match err {
        MeveError::SignerUnavailable(_) | MeveError::SignerTimeout { .. } => NETWORK_ERROR,
        MeveError::Io(_) => IO_ERROR,
        MeveError::UnsupportedFormat
        | MeveError::MalformedContainer(_)
        | MeveError::InvalidPayload(_)
        | MeveError::UnsupportedVersion(_)
        | MeveError::HashMismatch { .. }
        | MeveError::SignatureInvalid
        | MeveError::Archive(_) => VERIFICATION_FAILED,
        _ => GENERAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn test_read_failure_is_input_error() {
        let err = std::fs::read("/definitely/not/here")
            .context("Failed to read file: /definitely/not/here")
            .unwrap_err();
        assert_eq!(ExitCode::from_anyhow(&err).code, INPUT_ERROR);
    }

    #[test]
    fn test_library_errors_classified() {
        let err = anyhow::Error::new(MeveError::UnsupportedFormat).context("Protect failed");
        assert_eq!(ExitCode::from_anyhow(&err).code, VERIFICATION_FAILED);

        let err = anyhow::Error::new(MeveError::SignerTimeout { timeout_ms: 10 });
        assert_eq!(ExitCode::from_anyhow(&err).code, NETWORK_ERROR);

        let err = anyhow::anyhow!("something else");
        assert_eq!(ExitCode::from_anyhow(&err).code, GENERAL_ERROR);
    }
}
