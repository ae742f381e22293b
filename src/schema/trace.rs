/// Trace records: one entry per decision plus the terminal summary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::traits::Trait;

/// Advisory flags recorded on each step. They never halt a run.
pub mod flags {
    pub const SCENE_CAP_OK: &str = "scene_cap_ok";
    pub const SCENE_CAP_FAIL: &str = "scene_cap_fail";
    pub const MAJOR_SPACING_OK: &str = "major_spacing_ok";
    pub const MAJOR_SPACING_FAIL: &str = "major_spacing_fail";
    pub const TRAIT_CAP_FAIL: &str = "trait_cap_fail";
}

/// One simulated decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub run_id: String,
    pub step: usize,
    pub scene_id: String,
    pub choice_id: String,
    pub delta: BTreeMap<Trait, f64>,
    pub totals: BTreeMap<Trait, f64>,
    pub flags: Vec<String>,
    /// Whether the chosen option carried a major weight on either tag.
    #[serde(default)]
    pub major: bool,
    pub end: bool,
}

impl TraceEntry {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

/// Terminal record of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalSummary {
    pub run_id: String,
    pub end: bool,
    /// Integer percentages of the grand total, nonzero traits only.
    pub normalized: BTreeMap<Trait, u32>,
    pub top3: Vec<Trait>,
    pub ending_id: Option<String>,
    pub payoffs: BTreeMap<String, f64>,
}

/// A line of trace output: a step or the final summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraceRecord {
    Step(TraceEntry),
    Final(FinalSummary),
}

impl TraceRecord {
    pub fn is_end(&self) -> bool {
        matches!(self, Self::Final(_))
    }

    pub fn as_step(&self) -> Option<&TraceEntry> {
        match self {
            Self::Step(entry) => Some(entry),
            Self::Final(_) => None,
        }
    }
}

/// Everything one run produced. `trace` ends with a copy of `final_summary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub trace: Vec<TraceRecord>,
    #[serde(rename = "final")]
    pub final_summary: FinalSummary,
}

impl RunOutput {
    /// Iterate over the non-terminal records.
    pub fn steps(&self) -> impl Iterator<Item = &TraceEntry> {
        self.trace.iter().filter_map(TraceRecord::as_step)
    }

    /// Serialize the trace as JSON Lines.
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for record in &self.trace {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }
}
