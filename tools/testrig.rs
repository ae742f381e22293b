/// Testrig: play the scenario catalog with scripted policies and write
/// per-run artifacts.
///
/// Usage:
///   testrig run --policy <name> [--seed N] [--runs N] [--max-steps N] [--output DIR]
///   testrig suite (--policy <name> | --all) [same flags]

use clap::{Args, Parser, Subcommand};
use narrative_harness::core::archetype::ArchetypeTable;
use narrative_harness::core::artifacts::{build_index, ArtifactWriter, DEFAULT_DOMINANCE_THRESHOLD};
use narrative_harness::core::audit::{AuditLimits, SuiteMetrics};
use narrative_harness::core::calibrator::{CalibrationConfig, Calibrator};
use narrative_harness::core::policy::PolicyKind;
use narrative_harness::core::reveal::RevealTable;
use narrative_harness::core::runner::{batch_seeds, Runner, DEFAULT_MAX_STEPS};
use narrative_harness::schema::trace::RunOutput;
use narrative_harness::schema::traits::TraitRegistry;
use rayon::prelude::*;
use std::error::Error;
use std::path::PathBuf;
use std::process;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "testrig", about = "Narrative simulation test rig")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute runs for a single policy
    Run {
        #[arg(long)]
        policy: PolicyKind,
        #[command(flatten)]
        batch: BatchArgs,
    },
    /// Run a suite of policies and summarize them
    Suite {
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        policy: Option<PolicyKind>,
        /// Run every shipped policy
        #[arg(long)]
        all: bool,
        #[command(flatten)]
        batch: BatchArgs,
    },
}

#[derive(Debug, Args)]
struct BatchArgs {
    /// First seed; run i uses seed + i
    #[arg(long, default_value_t = 0)]
    seed: u64,
    #[arg(long, default_value_t = 1)]
    runs: u64,
    #[arg(long, default_value_t = DEFAULT_MAX_STEPS)]
    max_steps: usize,
    #[arg(long, default_value_t = DEFAULT_DOMINANCE_THRESHOLD)]
    dominance_threshold: u32,
    #[arg(long, default_value = "data/test_results")]
    output: PathBuf,
    /// Directory of act1*/act2*/act3* scenario files
    #[arg(long, default_value = "data/scenarios")]
    catalog: PathBuf,
    /// Calibration config applied to rule-weighted policies (JSON)
    #[arg(long)]
    calibration: Option<PathBuf>,
    /// Archetype table used for ending ids (RON); built-in table otherwise
    #[arg(long)]
    archetypes: Option<PathBuf>,
    /// Reveal data (JSON or RON) used for each run's reveal text
    #[arg(long)]
    reveals: Option<PathBuf>,
}

/// Everything a batch needs, loaded once and shared across worker threads.
struct Rig {
    runner: Runner,
    writer: ArtifactWriter,
    calibrator: Option<Calibrator>,
    limits: AuditLimits,
}

impl Rig {
    fn load(batch: &BatchArgs) -> Result<Self, Box<dyn Error>> {
        let registry = TraitRegistry::standard();

        let endings = match batch.archetypes {
            Some(ref path) => ArchetypeTable::load_from_ron(path, &registry)?,
            None => ArchetypeTable::default(),
        };
        let runner = Runner::builder()
            .catalog_dir(&batch.catalog)
            .registry(registry.clone())
            .endings(endings)
            .build()?;

        let mut writer =
            ArtifactWriter::new(&batch.output).dominance_threshold(batch.dominance_threshold);
        if let Some(ref path) = batch.reveals {
            writer = writer.reveals(RevealTable::load(path, &registry)?);
        }

        let calibrator = match batch.calibration {
            Some(ref path) => Some(Calibrator::new(CalibrationConfig::load_from_json(path)?)),
            None => None,
        };

        let limits = AuditLimits {
            scene_cap: runner.scene_cap(),
            act_trait_cap: runner.act_trait_cap(),
        };

        Ok(Self {
            runner,
            writer,
            calibrator,
            limits,
        })
    }

    /// Run every seed of the batch in parallel, then write artifacts in seed
    /// order and rebuild the index.
    fn run_policy(&self, kind: PolicyKind, batch: &BatchArgs) -> Result<Vec<RunOutput>, Box<dyn Error>> {
        let seeds = batch_seeds(batch.seed, batch.runs)?;
        let results: Vec<_> = seeds
            .par_iter()
            .map(|&seed| {
                let mut policy = kind.build_with(self.calibrator.as_ref());
                self.runner
                    .run(policy.as_mut(), seed, batch.max_steps)
                    .map(|output| (seed, output))
            })
            .collect();

        let mut outputs = Vec::with_capacity(results.len());
        for result in results {
            let (seed, output) = result?;
            let record = self.writer.record(&self.runner, kind, seed, &output);
            self.writer.write(&record, &output)?;
            outputs.push(output);
        }

        build_index(self.writer.out_dir())?;
        println!("Completed {} runs for policy '{}'.", outputs.len(), kind);
        Ok(outputs)
    }
}

fn execute(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Command::Run { policy, batch } => {
            let rig = Rig::load(&batch)?;
            rig.run_policy(policy, &batch)?;
        }
        Command::Suite { policy, all, batch } => {
            let rig = Rig::load(&batch)?;
            let kinds: Vec<PolicyKind> = match policy {
                Some(kind) if !all => vec![kind],
                _ => PolicyKind::ALL.to_vec(),
            };

            let mut metrics = Vec::with_capacity(kinds.len());
            for kind in kinds {
                let outputs = rig.run_policy(kind, &batch)?;
                let summary = SuiteMetrics::collect(kind.name(), &outputs, &rig.limits);
                info!(
                    policy = %kind,
                    scenes = summary.scenes_visited,
                    entropy = summary.entropy,
                    "suite metrics"
                );
                metrics.push(summary);
            }

            let path = batch.output.join("suite_metrics.json");
            std::fs::write(&path, serde_json::to_string_pretty(&metrics)?)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = execute(Cli::parse()) {
        eprintln!("ERROR: {}", e);
        process::exit(1);
    }
}
