/// Calibrate: pick the best calibration config and write it with its hash.
///
/// Usage: calibrate --config <base.json> [--candidates <candidates.json>] --out <report.json>

use clap::Parser;
use narrative_harness::core::calibrator::{CalibrationConfig, Calibrator};
use narrative_harness::core::optimizer::{load_candidates, CandidateStats, Optimizer};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "calibrate", about = "Select a calibration config")]
struct Args {
    /// Base calibration config (JSON)
    #[arg(long)]
    config: PathBuf,

    /// Candidate configs with measured stats (JSON object keyed by name)
    #[arg(long)]
    candidates: Option<PathBuf>,

    /// Where to write the optimization report
    #[arg(long)]
    out: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let base = match CalibrationConfig::load_from_json(&args.config) {
        Ok(config) => Calibrator::new(config).config().clone(),
        Err(e) => {
            eprintln!("ERROR: Failed to load config '{}': {}", args.config.display(), e);
            process::exit(1);
        }
    };

    let mut candidates = match args.candidates {
        Some(ref path) => match load_candidates(path) {
            Ok(mut candidates) => {
                for stats in candidates.values_mut() {
                    stats.config = Calibrator::new(stats.config.clone()).config().clone();
                }
                candidates
            }
            Err(e) => {
                eprintln!("ERROR: Failed to load candidates '{}': {}", path.display(), e);
                process::exit(1);
            }
        },
        None => BTreeMap::new(),
    };
    // The base config always competes as "baseline" unless a candidate claims the name.
    candidates
        .entry("baseline".to_string())
        .or_insert_with(|| CandidateStats::baseline(base));

    let Some(best) = Optimizer.optimize(&candidates) else {
        eprintln!("ERROR: No candidate configurations to evaluate");
        process::exit(1);
    };

    let report = match best.report() {
        Ok(report) => report,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            process::exit(1);
        }
    };

    if let Some(parent) = args.out.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("ERROR: Failed to create '{}': {}", parent.display(), e);
            process::exit(1);
        }
    }

    let written = serde_json::to_string_pretty(&report)
        .map_err(|e| e.to_string())
        .and_then(|json| std::fs::write(&args.out, json).map_err(|e| e.to_string()));
    if let Err(e) = written {
        eprintln!("ERROR: Failed to write report: {}", e);
        process::exit(1);
    }

    println!(
        "Selected '{}' (score {:.3}, hash {})",
        report.candidate, best.score, report.hash
    );
}
