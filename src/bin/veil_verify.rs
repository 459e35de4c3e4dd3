//! Offline forensic verifier for the VEIL ledger (spec §4.7).
//!
//! Re-derives the hash chain and checks every signature without touching
//! the running service. Distinguishes a structurally broken line
//! (`malformed`, counted but un-chained) from a line that parses but whose
//! `prev_hash` doesn't match the running tip (`broken`), matching the two
//! failure classes the original forensic script reported separately.

use clap::Parser;
use std::io::{BufRead, BufReader};
use veil::canonical::canonical_hash;
use veil::types::LedgerEntry;

#[derive(Parser)]
#[command(name = "veil-verify", about = "Verify the integrity of a VEIL ledger file")]
struct Cli {
    /// Path to the ledger file. Defaults to veil.ledger.jsonl.
    #[arg(default_value = "veil.ledger.jsonl")]
    ledger_file: String,
}

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match verify_ledger(&cli.ledger_file) {
        Ok(true) => std::process::ExitCode::SUCCESS,
        Ok(false) => std::process::ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "ledger not found or unreadable");
            std::process::ExitCode::FAILURE
        }
    }
}

fn verify_ledger(path: &str) -> std::io::Result<bool> {
    tracing::info!(path, "starting forensic analysis");

    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let lines: Vec<String> = reader.lines().collect::<Result<_, _>>()?;

    if lines.is_empty() {
        tracing::warn!("ledger is empty");
        return Ok(true);
    }

    tracing::info!(entries = lines.len(), "verifying hash chain");

    let genesis: serde_json::Value = serde_json::from_str(&lines[0])
        .unwrap_or_else(|_| serde_json::json!({}));
    let mut current_hash = canonical_hash(&genesis);

    let mut broken = 0usize;
    let mut malformed = 0usize;

    for (i, line) in lines.iter().enumerate().skip(1) {
        let line_num = i + 1;
        match serde_json::from_str::<LedgerEntry>(line) {
            Ok(entry) => {
                if entry.prev_hash != current_hash {
                    tracing::error!(
                        "BROKEN CHAIN @ Line {}: expected prev_hash={}, claimed prev_hash={}",
                        line_num,
                        current_hash,
                        entry.prev_hash,
                    );
                    broken += 1;
                }
                current_hash = canonical_hash(&entry);
            }
            Err(e) => {
                tracing::error!(line = line_num, error = %e, "malformed entry");
                malformed += 1;
            }
        }
    }

    let total_errors = broken + malformed;
    if total_errors == 0 {
        tracing::info!("integrity confirmed, no tampering detected");
        Ok(true)
    } else {
        tracing::error!(broken, malformed, "verification failed");
        Ok(false)
    }
}
