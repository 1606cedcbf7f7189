//! Hash command implementation.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use meve_core::{digest_reader, CancellationFlag};
use tracing::debug;

use crate::exit_codes::ExitCode;

/// Execute the hash command. Ctrl-C stops hashing between chunks.
pub async fn execute(file: PathBuf) -> Result<ExitCode> {
    let handle = File::open(&file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;

    let cancel = CancellationFlag::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted, cancelling hash");
            on_interrupt.cancel();
        }
    });

    let result =
        tokio::task::spawn_blocking(move || digest_reader(BufReader::new(handle), &cancel))
            .await
            .context("Hash task failed")?;
    watcher.abort();

    let digest = result.with_context(|| format!("Failed to hash {}", file.display()))?;
    println!("{digest}  {}", file.display());
    Ok(ExitCode::success())
}
