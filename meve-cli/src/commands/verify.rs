//! Verify command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use meve_core::crypto::public_key_from_hex;
use meve_core::{
    SignatureStatus, VerificationReport, VerificationStatus, Verifier, VerifierConfig,
};
use tracing::{debug, info};

use crate::exit_codes::ExitCode;
use crate::utils::{read_input, short_hash};

/// Execute the verify command.
pub fn execute(
    file: PathBuf,
    original: Option<PathBuf>,
    public_key: Option<String>,
    json: bool,
    quiet: bool,
) -> Result<ExitCode> {
    let candidate = read_input(&file)?;
    info!(path = %file.display(), bytes = candidate.len(), "Read file");

    let original = original.as_deref().map(read_input).transpose()?;

    let config = match public_key {
        Some(hex_key) => {
            VerifierConfig::default().with_public_key(public_key_from_hex(&hex_key).context("Invalid --public-key")?)
        }
        None => VerifierConfig::from_env().context("Invalid MEVE_PUBLIC_KEY")?,
    };
    debug!(has_key = config.public_key.is_some(), "Verifier configured");

    let report = Verifier::new(config).verify(&candidate, original.as_deref());

    if json {
        let text =
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{text}");
    } else if !quiet {
        print_report(&report);
    }

    Ok(if report.is_valid() {
        ExitCode::success()
    } else {
        ExitCode::verification_failed()
    })
}

fn print_report(report: &VerificationReport) {
    let banner = if report.is_valid() {
        [
            "╔════════════════════════════════════════╗".green(),
            "║                VALID                   ║".green().bold(),
            "╚════════════════════════════════════════╝".green(),
        ]
    } else {
        [
            "╔════════════════════════════════════════╗".red(),
            "║               NOT VALID                ║".red().bold(),
            "╚════════════════════════════════════════╝".red(),
        ]
    };
    println!();
    for line in banner {
        println!("{line}");
    }
    println!();
    println!("   {}", report.summary());
    println!();

    if let Some(format) = report.format {
        println!("   {} {}", "Format:".dimmed(), format);
    }
    if let Some(payload) = &report.payload {
        println!("   {} {}...", "SHA-256:".dimmed(), short_hash(&payload.hash));
        println!("   {} {}", "Protected at:".dimmed(), payload.ts);
        if let Some(issuer) = &payload.issuer {
            println!("   {} {}", "Issuer:".dimmed(), issuer);
        }
    }

    let content = match report.status {
        VerificationStatus::Valid => "Matches original".green(),
        VerificationStatus::ValidMissingOriginal => "Not compared (no original)".yellow(),
        VerificationStatus::HashMismatch => "Does NOT match original".red(),
        VerificationStatus::NoMarker | VerificationStatus::MarkerFound => "No proof".red(),
    };
    println!("   {} {}", "Content:".dimmed(), content);

    let signature = match report.signature {
        SignatureStatus::Absent => "Unsigned".dimmed(),
        SignatureStatus::Valid => "Valid (Ed25519)".green(),
        SignatureStatus::Invalid => "INVALID".red(),
        SignatureStatus::UnknownKey => "Signed, no trusted key to check".yellow(),
    };
    println!("   {} {}", "Signature:".dimmed(), signature);

    if let Some(reason) = &report.reason {
        println!("   {} {}", "Detail:".dimmed(), reason);
    }
}
