/// Run context: owned per-run trait totals, step flags, and decision log.
use std::collections::BTreeMap;

use crate::schema::choice::TraitWeight;
use crate::schema::traits::Trait;

/// One recorded decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub step: usize,
    pub scene_id: String,
    pub choice_id: String,
    pub major: bool,
}

/// Mutable state of a single simulation run.
///
/// Totals only ever grow: [`RunContext::apply`] ignores non-positive weights.
#[derive(Debug, Clone)]
pub struct RunContext {
    totals: BTreeMap<Trait, f64>,
    decisions: Vec<Decision>,
    last_major_step: Option<usize>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            totals: Trait::zeroed(),
            decisions: Vec::new(),
            last_major_step: None,
        }
    }

    pub fn totals(&self) -> &BTreeMap<Trait, f64> {
        &self.totals
    }

    pub fn total(&self, trait_id: Trait) -> f64 {
        self.totals.get(&trait_id).copied().unwrap_or(0.0)
    }

    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    /// Add positive contributions to the totals and return the step delta.
    /// Two contributions to the same trait are summed.
    pub fn apply(&mut self, contributions: &[TraitWeight]) -> BTreeMap<Trait, f64> {
        let mut delta = BTreeMap::new();
        for tw in contributions.iter().filter(|tw| tw.weight > 0.0) {
            *self.totals.entry(tw.trait_id).or_insert(0.0) += tw.weight;
            *delta.entry(tw.trait_id).or_insert(0.0) += tw.weight;
        }
        delta
    }

    /// Record a decision. Returns `false` when a major lands directly after
    /// the last accepted major; such a major is not accepted as a new anchor.
    pub fn record(&mut self, decision: Decision) -> bool {
        let spaced = if decision.major {
            match self.last_major_step {
                Some(last) if decision.step <= last + 1 => false,
                _ => {
                    self.last_major_step = Some(decision.step);
                    true
                }
            }
        } else {
            true
        };
        self.decisions.push(decision);
        spaced
    }

    /// True if any running total exceeds `threshold`.
    pub fn any_total_above(&self, threshold: f64) -> bool {
        self.totals.values().any(|v| *v > threshold)
    }

    /// Integer percentages of the grand total for traits with a nonzero total.
    pub fn normalized(&self) -> BTreeMap<Trait, u32> {
        let grand: f64 = self.totals.values().sum();
        let grand = if grand > 0.0 { grand } else { 1.0 };
        self.totals
            .iter()
            .filter(|(_, v)| **v > 0.0)
            .map(|(t, v)| (*t, (v / grand * 100.0).floor() as u32))
            .collect()
    }
}
