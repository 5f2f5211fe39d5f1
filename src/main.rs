//! Offline replay of recorded printer telemetry.
//!
//! Input files hold one JSON report per line; blank lines and lines starting with `#`
//! are skipped.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;

use printwatch::config::{self, Config};
use printwatch::tracker::{JobTracker, LogNotifier, Transition};
use printwatch::{MemoryLedger, SnapshotStore, normalize};

#[derive(Parser, Debug)]
#[command(name = "printwatch", about = "Printer telemetry normalizer and job tracker replay.")]
struct Cli {
    /// Path to a TOML config file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log at debug level regardless of the configured level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print one normalized snapshot per input report
    Normalize {
        file: PathBuf,
        /// Printer model hint (e.g. "X1C", "klipper")
        #[arg(long)]
        model: Option<String>,
    },
    /// Run every report through the job tracker and print the resulting jobs
    Replay {
        file: PathBuf,
        /// Device identity the reports belong to
        #[arg(long)]
        device: String,
        #[arg(long)]
        model: Option<String>,
        /// Spool on a slot (e.g. --spool 0=1000:200 for slot 0, full 1000 g, empty 200 g)
        #[arg(long, value_parser = parse_spool, number_of_values = 1)]
        spool: Vec<(u32, f64, f64)>,
    },
}

fn parse_spool(s: &str) -> Result<(u32, f64, f64), String> {
    let (slot, weights) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid SLOT=FULL:EMPTY: no `=` found in '{}'.", s))?;
    let (full, empty) = weights
        .split_once(':')
        .ok_or_else(|| format!("Invalid SLOT=FULL:EMPTY: no `:` found in '{}'.", s))?;
    let slot = slot.trim().parse().map_err(|e| format!("Invalid slot '{}': {}", slot, e))?;
    let full = full.trim().parse().map_err(|e| format!("Invalid full weight '{}': {}", full, e))?;
    let empty = empty.trim().parse().map_err(|e| format!("Invalid empty weight '{}': {}", empty, e))?;
    Ok((slot, full, empty))
}

fn read_reports(path: &Path) -> Result<Vec<Value>, Box<dyn std::error::Error>> {
    let file = std::fs::File::open(path).map_err(|e| {
        tracing::error!("Failed to open telemetry file '{}': {}", path.display(), e);
        e
    })?;
    let mut reports = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(value) => reports.push(value),
            Err(e) => tracing::warn!(line = index + 1, "Skipping unparsable report: {}", e),
        }
    }
    Ok(reports)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config(&path.to_string_lossy())?,
        None => Config::default(),
    };
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        config.logging.tracing_level()?
    };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();

    match cli.command {
        Commands::Normalize { file, model } => {
            for report in read_reports(&file)? {
                let snapshot = normalize(&report, model.as_deref());
                println!("{}", serde_json::to_string(&snapshot)?);
            }
        }
        Commands::Replay { file, device, model, spool } => {
            let store = SnapshotStore::new(&config.tracker.snapshot_path);
            let existing = store.list();
            if !existing.is_empty() {
                tracing::info!("Snapshots present for: {}", existing.join(", "));
            }

            let ledger = Arc::new(MemoryLedger::new());
            for (slot, full, empty) in spool {
                let id = ledger.add_spool(&device, slot, full, empty).await;
                tracing::info!(slot, spool = %id, "Registered spool");
            }

            let tracker = JobTracker::new(config.tracker.clone(), ledger.clone(), Arc::new(LogNotifier), store);
            let reports = read_reports(&file)?;
            tracing::info!(device = %device, "Replaying {} reports", reports.len());
            for report in &reports {
                let outcome = tracker.handle_telemetry(&device, report, model.as_deref()).await;
                if outcome.transition != Transition::None {
                    tracing::debug!(device = %device, transition = ?outcome.transition, "Transition");
                }
            }

            println!("{}", serde_json::to_string_pretty(&ledger.jobs().await)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spool() {
        assert_eq!(parse_spool("4=1000:250").unwrap(), (4, 1000.0, 250.0));
        assert!(parse_spool("4").is_err());
        assert!(parse_spool("x=1:2").is_err());
        assert!(parse_spool("1=1000").is_err());
    }

    #[test]
    fn test_cli_parses_replay() {
        let cli = Cli::try_parse_from([
            "printwatch", "--verbose", "replay", "log.jsonl", "--device", "p1", "--spool", "0=1000:200", "--spool", "1=500:100",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Replay { device, spool, .. } => {
                assert_eq!(device, "p1");
                assert_eq!(spool.len(), 2);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
