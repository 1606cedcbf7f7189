//! Inspect command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use meve_core::formats;
use serde_json::json;

use crate::exit_codes::ExitCode;
use crate::utils::read_input;

/// Execute the inspect command.
pub fn execute(file: PathBuf, json: bool, quiet: bool) -> Result<ExitCode> {
    let bytes = read_input(&file)?;
    let format = formats::detect(&bytes);
    let payload = format.and_then(|f| f.codec().extract(&bytes));

    if json {
        let doc = json!({
            "format": format,
            "payload": payload,
        });
        let text = serde_json::to_string_pretty(&doc).context("Failed to serialize output")?;
        println!("{text}");
    } else if !quiet {
        match format {
            Some(format) => println!("{} {}", "Format:".dimmed(), format),
            None => println!("{} {}", "Format:".dimmed(), "not supported".red()),
        }
        match &payload {
            Some(payload) => {
                let text = serde_json::to_string_pretty(payload)
                    .context("Failed to serialize payload")?;
                println!("{}", "Marker:".dimmed());
                println!("{text}");
            }
            None => println!("{} {}", "Marker:".dimmed(), "none".yellow()),
        }
    }

    Ok(if payload.is_some() {
        ExitCode::success()
    } else {
        ExitCode::verification_failed()
    })
}
