//! Common utility functions shared across CLI commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use meve_core::ContainerFormat;
use tracing_subscriber::EnvFilter;

/// Initialize logging. `RUST_LOG` wins; otherwise `-v` flags pick the level.
pub fn init_tracing(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Read a whole input file.
pub fn read_input(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))
}

/// Build the protected output path from the original file path.
///
/// Transforms `dir/file.ext` into `dir/file.meve.ext`. Files without an
/// extension get the one of their detected format.
pub fn default_output_path(file: &Path, format: ContainerFormat) -> PathBuf {
    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    let ext = file
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or(format.extension());
    file.with_file_name(format!("{stem}.meve.{ext}"))
}

/// First 16 hex characters of a digest, for compact display.
pub fn short_hash(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("contract.pdf"), ContainerFormat::Pdf),
            PathBuf::from("contract.meve.pdf")
        );
        assert_eq!(
            default_output_path(Path::new("/tmp/scan.JPEG"), ContainerFormat::Jpeg),
            PathBuf::from("/tmp/scan.meve.JPEG")
        );
        assert_eq!(
            default_output_path(Path::new("noext"), ContainerFormat::Png),
            PathBuf::from("noext.meve.png")
        );
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(short_hash(&"ab".repeat(32)), "abababababababab");
        assert_eq!(short_hash("abc"), "abc");
    }
}
