/// On-disk run artifacts: a detail JSON per run, its JSON Lines trace, and a
/// summary index over a results directory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::policy::PolicyKind;
use crate::core::reveal::RevealTable;
use crate::core::runner::{RunError, Runner};
use crate::schema::trace::RunOutput;
use crate::schema::traits::Trait;

pub const DEFAULT_DOMINANCE_THRESHOLD: u32 = 80;
pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("run failed: {0}")]
    Run(#[from] RunError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelinePoint {
    pub step: usize,
    pub totals: BTreeMap<Trait, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub step: usize,
    pub scene_id: String,
    pub choice_id: String,
    pub text: String,
    pub primary: Option<Trait>,
    pub pw: f64,
    pub secondary: Option<Trait>,
    pub sw: f64,
}

/// Everything written to `run_<policy>_<seed>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: String,
    pub policy: String,
    pub seed: u64,
    pub steps: usize,
    pub normalized: BTreeMap<Trait, u32>,
    pub top3: Vec<Trait>,
    pub ending_id: Option<String>,
    /// Top trait when its share reaches the dominance threshold.
    pub dominant: Option<Trait>,
    /// Distinct advisory failures seen during the run, sorted.
    pub flags: Vec<String>,
    pub timeline: Vec<TimelinePoint>,
    pub decisions: Vec<DecisionRecord>,
    pub reveal_text: String,
    pub timestamp: String,
    #[serde(rename = "dominance_threshold")]
    pub dominance_threshold: u32,
}

/// The subset of a [`RunRecord`] kept in `index.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub policy: String,
    pub seed: u64,
    pub steps: usize,
    pub normalized: BTreeMap<Trait, u32>,
    pub top3: Vec<Trait>,
    pub ending_id: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    pub timestamp: String,
    #[serde(rename = "dominance_threshold")]
    pub dominance_threshold: u32,
}

impl RunRecord {
    /// Assemble the detail record for a finished run. Choice text and tags
    /// are looked up in the runner's catalog.
    pub fn from_output(
        runner: &Runner,
        policy: &str,
        seed: u64,
        output: &RunOutput,
        dominance_threshold: u32,
        reveal_text: Option<String>,
    ) -> Self {
        let mut flags: Vec<String> = output
            .steps()
            .flat_map(|s| s.flags.iter())
            .filter(|f| f.ends_with("_fail"))
            .cloned()
            .collect();
        flags.sort();
        flags.dedup();

        let timeline = output
            .steps()
            .map(|s| TimelinePoint {
                step: s.step,
                totals: s.totals.clone(),
            })
            .collect();

        let decisions = output
            .steps()
            .map(|s| {
                let choice = runner
                    .catalog()
                    .scene(&s.scene_id)
                    .and_then(|scene| scene.choices.iter().find(|c| c.choice_id == s.choice_id));
                let primary = choice.and_then(|c| c.primary);
                let secondary = choice.and_then(|c| c.secondary);
                DecisionRecord {
                    step: s.step,
                    scene_id: s.scene_id.clone(),
                    choice_id: s.choice_id.clone(),
                    text: choice.map(|c| c.text.clone()).unwrap_or_default(),
                    primary: primary.map(|tw| tw.trait_id),
                    pw: primary.map_or(0.0, |tw| tw.weight),
                    secondary: secondary.map(|tw| tw.trait_id),
                    sw: secondary.map_or(0.0, |tw| tw.weight),
                }
            })
            .collect();

        let summary = &output.final_summary;
        let dominant = summary
            .top3
            .first()
            .copied()
            .filter(|t| summary.normalized.get(t).copied().unwrap_or(0) >= dominance_threshold);

        Self {
            run_id: format!("{}_{}", policy, seed),
            policy: policy.to_string(),
            seed,
            steps: output.steps().count(),
            normalized: summary.normalized.clone(),
            top3: summary.top3.clone(),
            ending_id: summary.ending_id.clone(),
            dominant,
            flags,
            timeline,
            decisions,
            reveal_text: reveal_text.unwrap_or_default(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            dominance_threshold,
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            policy: self.policy.clone(),
            seed: self.seed,
            steps: self.steps,
            normalized: self.normalized.clone(),
            top3: self.top3.clone(),
            ending_id: self.ending_id.clone(),
            flags: self.flags.clone(),
            timestamp: self.timestamp.clone(),
            dominance_threshold: self.dominance_threshold,
        }
    }
}

/// Writes run artifacts into one results directory.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    out_dir: PathBuf,
    dominance_threshold: u32,
    reveals: Option<RevealTable>,
}

impl ArtifactWriter {
    pub fn new(out_dir: &Path) -> Self {
        Self {
            out_dir: out_dir.to_path_buf(),
            dominance_threshold: DEFAULT_DOMINANCE_THRESHOLD,
            reveals: None,
        }
    }

    pub fn dominance_threshold(mut self, threshold: u32) -> Self {
        self.dominance_threshold = threshold;
        self
    }

    /// Render a reveal for every run from its final totals.
    pub fn reveals(mut self, table: RevealTable) -> Self {
        self.reveals = Some(table);
        self
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn record(&self, runner: &Runner, kind: PolicyKind, seed: u64, output: &RunOutput) -> RunRecord {
        let reveal_text = self.reveals.as_ref().map(|table| {
            let final_totals = output
                .steps()
                .last()
                .map(|s| s.totals.clone())
                .unwrap_or_default();
            table.pick(&final_totals).text
        });
        RunRecord::from_output(
            runner,
            kind.name(),
            seed,
            output,
            self.dominance_threshold,
            reveal_text,
        )
    }

    /// Write `run_<policy>_<seed>.json` and `trace_<policy>_<seed>.jsonl`.
    /// Returns the path of the detail file.
    pub fn write(&self, record: &RunRecord, output: &RunOutput) -> Result<PathBuf, ArtifactError> {
        std::fs::create_dir_all(&self.out_dir)?;
        let run_path = self.out_dir.join(format!("run_{}.json", record.run_id));
        std::fs::write(&run_path, serde_json::to_string_pretty(record)?)?;
        let trace_path = self.out_dir.join(format!("trace_{}.jsonl", record.run_id));
        std::fs::write(&trace_path, output.to_jsonl()?)?;
        debug!(file = %run_path.display(), "wrote run artifacts");
        Ok(run_path)
    }

    /// Run `kind` once with a fresh policy and write its artifacts.
    pub fn write_run(
        &self,
        runner: &Runner,
        kind: PolicyKind,
        seed: u64,
        max_steps: usize,
    ) -> Result<RunRecord, ArtifactError> {
        let mut policy = kind.build();
        let output = runner.run(policy.as_mut(), seed, max_steps)?;
        let record = self.record(runner, kind, seed, &output);
        self.write(&record, &output)?;
        Ok(record)
    }
}

/// Execute one run and write its artifacts into `out_dir`.
pub fn write_run(
    runner: &Runner,
    kind: PolicyKind,
    seed: u64,
    max_steps: usize,
    dominance_threshold: u32,
    out_dir: &Path,
) -> Result<RunRecord, ArtifactError> {
    ArtifactWriter::new(out_dir)
        .dominance_threshold(dominance_threshold)
        .write_run(runner, kind, seed, max_steps)
}

/// Summarize every `run_*.json` in `dir` (file-name order) into
/// `index.json`. A missing directory yields an empty index and writes nothing.
pub fn build_index(dir: &Path) -> Result<Vec<RunSummary>, ArtifactError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
        if path.is_file() && name.starts_with("run_") && name.ends_with(".json") {
            files.push(path);
        }
    }
    files.sort();

    let mut runs = Vec::with_capacity(files.len());
    for path in &files {
        let contents = std::fs::read_to_string(path)?;
        runs.push(serde_json::from_str::<RunSummary>(&contents)?);
    }

    std::fs::write(dir.join(INDEX_FILE), serde_json::to_string_pretty(&runs)?)?;
    info!(dir = %dir.display(), runs = runs.len(), "rebuilt index");
    Ok(runs)
}
