//! MEVE CLI - embed and verify invisible document proofs.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

mod commands;
mod exit_codes;
mod utils;

use exit_codes::ExitCode;

const EXIT_CODES_HELP: &str = "Exit codes:
  0   Success (proof valid, or valid pending the original)
  1   Unexpected error
  2   Usage error
  65  Verification failed (no marker, mismatch, bad signature, unsupported file)
  66  Cannot read input file
  69  Signer unavailable
  74  Cannot write output file";

#[derive(Parser)]
#[command(name = "meve")]
#[command(author, version, about = "Invisible, verifiable proofs for documents and images", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only print errors and machine-readable output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed a proof marker into a PDF, DOCX, PNG or JPEG file
    Protect {
        /// Path to the file to protect
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output path (defaults to <stem>.meve.<ext> next to FILE)
        #[arg(short, long, value_name = "PATH")]
        out: Option<PathBuf>,

        /// Issuer email recorded in the marker
        #[arg(long, value_name = "EMAIL")]
        issuer: Option<String>,

        /// Sign the marker with the remote signer (MEVE_SIGNER_URL)
        #[arg(long)]
        sign: bool,

        /// Sign with a throwaway in-process key (for testing)
        #[arg(long, conflicts_with = "sign")]
        mock_signer: bool,
    },

    /// Check a file's proof marker
    Verify {
        /// File carrying the marker
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Original, unmarked file to compare the recorded hash against
        #[arg(long, value_name = "PATH")]
        original: Option<PathBuf>,

        /// Trusted Ed25519 public key (hex); defaults to MEVE_PUBLIC_KEY
        #[arg(long, value_name = "HEX")]
        public_key: Option<String>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the detected format and decoded marker of a file
    Inspect {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the SHA-256 digest of a file
    Hash {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    utils::init_tracing(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Protect {
            file,
            out,
            issuer,
            sign,
            mock_signer,
        } => {
            let args = commands::protect::ProtectArgs {
                file,
                out,
                issuer,
                signing: commands::protect::Signing::from_flags(sign, mock_signer),
            };
            commands::protect::execute(args, cli.quiet).await
        }
        Commands::Verify {
            file,
            original,
            public_key,
            json,
        } => commands::verify::execute(file, original, public_key, json, cli.quiet),
        Commands::Inspect { file, json } => commands::inspect::execute(file, json, cli.quiet),
        Commands::Hash { file } => commands::hash::execute(file).await,
    };

    let exit = match result {
        Ok(code) => code,
        Err(err) => {
            let exit = ExitCode::from_anyhow(&err);
            if let Some(message) = &exit.message {
                eprintln!("Error: {message}");
            }
            exit
        }
    };
    std::process::exit(exit.code);
}
