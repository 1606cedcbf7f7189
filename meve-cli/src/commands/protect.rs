//! Protect command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use meve_core::signer::{LocalSigner, Signer, SignerConfig, SignerProviderFactory};
use meve_core::{canonical, formats, protect, MeveError, Protected};
use tracing::{info, warn};

use crate::exit_codes::ExitCode;
use crate::utils::{default_output_path, read_input, short_hash};

/// How the marker gets signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signing {
    None,
    Remote,
    Mock,
}

impl Signing {
    pub fn from_flags(sign: bool, mock: bool) -> Self {
        match (sign, mock) {
            (_, true) => Self::Mock,
            (true, false) => Self::Remote,
            (false, false) => Self::None,
        }
    }
}

pub struct ProtectArgs {
    pub file: PathBuf,
    pub out: Option<PathBuf>,
    pub issuer: Option<String>,
    pub signing: Signing,
}

/// Execute the protect command.
pub async fn execute(args: ProtectArgs, quiet: bool) -> Result<ExitCode> {
    let original = read_input(&args.file)?;
    info!(path = %args.file.display(), bytes = original.len(), "Read file");

    let format = formats::detect(&original)
        .ok_or(MeveError::UnsupportedFormat)
        .with_context(|| format!("Cannot protect {}", args.file.display()))?;

    let ts = canonical::now_timestamp();
    let issuer = args.issuer.as_deref();

    let (protected, public_key) = match args.signing {
        Signing::None => (protect::protect(&original, &ts, issuer)?, None),
        Signing::Remote => {
            let signer = SignerProviderFactory::create(SignerConfig::Auto)
                .context("Remote signer is not configured")?;
            let protected = protect::protect_signed(&original, &ts, issuer, signer.as_ref()).await?;
            (protected, signer.public_key())
        }
        Signing::Mock => {
            warn!("Signing with a throwaway local key (not for production)");
            if !quiet {
                eprintln!(
                    "{}",
                    "Signing with a throwaway local key (NOT for production)".yellow()
                );
            }
            let signer = LocalSigner::generate();
            let protected = protect::protect_signed(&original, &ts, issuer, &signer).await?;
            (protected, Some(signer.verifying_key_bytes()))
        }
    };

    let out = args
        .out
        .unwrap_or_else(|| default_output_path(&args.file, format));
    std::fs::write(&out, &protected.bytes)
        .with_context(|| format!("Failed to write output file: {}", out.display()))?;
    info!(path = %out.display(), bytes = protected.bytes.len(), "Protected file saved");

    if !quiet {
        print_summary(&protected, &out, public_key);
    }
    Ok(ExitCode::success())
}

fn print_summary(protected: &Protected, out: &std::path::Path, public_key: Option<[u8; 32]>) {
    let payload = &protected.payload;
    println!();
    println!("{}", "╔════════════════════════════════════════╗".green());
    println!("{}", "║              PROTECTED                 ║".green().bold());
    println!("{}", "╚════════════════════════════════════════╝".green());
    println!();
    println!("   {} {}", "Format:".dimmed(), protected.format);
    println!("   {} {}...", "SHA-256:".dimmed(), short_hash(&payload.hash));
    println!("   {} {}", "Timestamp:".dimmed(), payload.ts);
    if let Some(issuer) = &payload.issuer {
        println!("   {} {}", "Issuer:".dimmed(), issuer);
    }
    if payload.is_signed() {
        let kid = payload.kid.as_deref().unwrap_or("unknown key");
        println!("   {} {}", "Signed by:".dimmed(), kid);
    }
    if let Some(key) = public_key {
        println!("   {} {}", "Public key:".dimmed(), hex::encode(key));
    }
    println!("   {} {}", "Output:".dimmed(), out.display());
}
