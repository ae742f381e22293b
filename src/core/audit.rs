/// Post-hoc checks over finished traces, and metrics across a suite of runs.
///
/// The checks re-derive the runner's advisory flags from the recorded deltas,
/// totals and major marks, so a trace loaded back from JSON Lines can be
/// audited on its own. Each returns one violation string per offending step.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::core::runner::{DEFAULT_ACT_TRAIT_CAP, DEFAULT_SCENE_CAP, TRAIT_CAP_TOLERANCE};
use crate::schema::trace::{FinalSummary, RunOutput, TraceEntry, TraceRecord};
use crate::schema::traits::Trait;

#[derive(Debug, Error, PartialEq)]
pub enum AuditError {
    #[error("expected {expected} in top3 but found {found:?}")]
    RevealMissing { expected: Trait, found: Vec<Trait> },
}

/// Caps the checks compare against. Mirrors the runner's configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuditLimits {
    pub scene_cap: f64,
    pub act_trait_cap: f64,
}

impl Default for AuditLimits {
    fn default() -> Self {
        Self {
            scene_cap: DEFAULT_SCENE_CAP,
            act_trait_cap: DEFAULT_ACT_TRAIT_CAP,
        }
    }
}

fn steps(trace: &[TraceRecord]) -> impl Iterator<Item = &TraceEntry> {
    trace.iter().filter_map(TraceRecord::as_step)
}

pub fn check_scene_caps(trace: &[TraceRecord], limits: &AuditLimits) -> Vec<String> {
    steps(trace)
        .filter(|s| s.delta.values().sum::<f64>() > limits.scene_cap)
        .map(|s| format!("scene_cap_exceeded:{}", s.scene_id))
        .collect()
}

/// One violation per trait per step whose running total is over tolerance.
pub fn check_trait_caps(trace: &[TraceRecord], limits: &AuditLimits) -> Vec<String> {
    let threshold = limits.act_trait_cap * TRAIT_CAP_TOLERANCE;
    let mut errors = Vec::new();
    for step in steps(trace) {
        for (trait_id, total) in &step.totals {
            if *total > threshold {
                errors.push(format!("trait_cap_exceeded:{}", trait_id));
            }
        }
    }
    errors
}

/// A step is major when the chosen option was, as recorded by the runner.
/// The delta alone cannot tell, since same-trait tags are summed into one
/// entry. A major right after an accepted major is a violation and does not
/// become the anchor.
pub fn check_major_spacing(trace: &[TraceRecord]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut last_major: Option<usize> = None;
    for step in steps(trace) {
        if !step.major {
            continue;
        }
        match last_major {
            Some(prev) if step.step <= prev + 1 => {
                errors.push(format!("major_spacing:{}", step.scene_id));
            }
            _ => last_major = Some(step.step),
        }
    }
    errors
}

pub fn check_tag_integrity(trace: &[TraceRecord]) -> Vec<String> {
    steps(trace)
        .filter(|s| s.delta.is_empty())
        .map(|s| format!("missing_tags:{}", s.scene_id))
        .collect()
}

/// Err unless `expected` is among the final top three.
pub fn reveal_contains(summary: &FinalSummary, expected: Trait) -> Result<(), AuditError> {
    if summary.top3.contains(&expected) {
        Ok(())
    } else {
        Err(AuditError::RevealMissing {
            expected,
            found: summary.top3.clone(),
        })
    }
}

pub fn path_coverage<'a, I>(runs: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a RunOutput>,
{
    runs.into_iter()
        .flat_map(|r| r.steps().map(|s| s.scene_id.clone()))
        .collect()
}

pub fn choice_coverage<'a, I>(runs: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a RunOutput>,
{
    runs.into_iter()
        .flat_map(|r| r.steps().map(|s| s.choice_id.clone()))
        .collect()
}

/// Mean normalized percentage per trait. Runs where a trait is absent count
/// as zero for it.
pub fn trait_distribution<'a, I>(runs: I) -> BTreeMap<Trait, f64>
where
    I: IntoIterator<Item = &'a RunOutput>,
{
    let mut sums: BTreeMap<Trait, f64> = BTreeMap::new();
    let mut count = 0usize;
    for run in runs {
        count += 1;
        for (trait_id, pct) in &run.final_summary.normalized {
            *sums.entry(*trait_id).or_insert(0.0) += f64::from(*pct);
        }
    }
    if count == 0 {
        return BTreeMap::new();
    }
    sums.into_iter()
        .map(|(t, v)| (t, v / count as f64))
        .collect()
}

/// Fraction of runs whose top3 contains `expected`; 0.0 for no runs.
pub fn reveal_accuracy_rate<'a, I>(finals: I, expected: Trait) -> f64
where
    I: IntoIterator<Item = &'a FinalSummary>,
{
    let mut total = 0usize;
    let mut hits = 0usize;
    for summary in finals {
        total += 1;
        if summary.top3.contains(&expected) {
            hits += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Shannon entropy in bits of a distribution given as unnormalized weights.
/// Non-positive weights are ignored.
pub fn entropy<I>(weights: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let weights: Vec<f64> = weights.into_iter().filter(|w| *w > 0.0).collect();
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    weights
        .iter()
        .map(|w| {
            let p = w / total;
            -p * p.log2()
        })
        .sum()
}

/// Aggregate view of a batch of runs for one policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuiteMetrics {
    pub policy: String,
    pub runs: usize,
    pub scenes_visited: usize,
    pub choices_taken: usize,
    pub trait_distribution: BTreeMap<Trait, f64>,
    pub entropy: f64,
    pub violations: BTreeMap<String, usize>,
}

impl SuiteMetrics {
    pub fn collect(policy: &str, runs: &[RunOutput], limits: &AuditLimits) -> Self {
        let distribution = trait_distribution(runs);
        let mut violations = BTreeMap::new();
        for run in runs {
            let found = [
                ("scene_cap", check_scene_caps(&run.trace, limits).len()),
                ("trait_cap", check_trait_caps(&run.trace, limits).len()),
                ("major_spacing", check_major_spacing(&run.trace).len()),
                ("missing_tags", check_tag_integrity(&run.trace).len()),
            ];
            for (kind, n) in found {
                *violations.entry(kind.to_string()).or_insert(0) += n;
            }
        }
        Self {
            policy: policy.to_string(),
            runs: runs.len(),
            scenes_visited: path_coverage(runs).len(),
            choices_taken: choice_coverage(runs).len(),
            entropy: entropy(distribution.values().copied()),
            trait_distribution: distribution,
            violations,
        }
    }
}
