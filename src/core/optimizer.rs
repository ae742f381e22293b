/// Search over candidate calibration configs with a composite objective.
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::calibrator::CalibrationConfig;

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn default_intent_lock() -> bool {
    true
}

/// Measured behaviour of one candidate configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateStats {
    #[serde(default)]
    pub config: CalibrationConfig,
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub policy_deviation: f64,
    #[serde(default = "default_intent_lock")]
    pub intent_lock: bool,
}

impl CandidateStats {
    /// A candidate with neutral stats, as used when only a base config is known.
    pub fn baseline(config: CalibrationConfig) -> Self {
        Self {
            config,
            balance: 0.0,
            policy_deviation: 0.0,
            intent_lock: true,
        }
    }

    pub fn score(&self) -> f64 {
        Optimizer::score(self.balance, self.policy_deviation, self.intent_lock)
    }
}

/// Candidates keyed by name. Loaded from `{name: {config, balance, ...}}`.
pub fn load_candidates(path: &Path) -> Result<BTreeMap<String, CandidateStats>, OptimizerError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// The winning candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Optimized {
    pub name: String,
    pub stats: CandidateStats,
    pub score: f64,
}

impl Optimized {
    pub fn config(&self) -> &CalibrationConfig {
        &self.stats.config
    }

    /// SHA-256 of the config's JSON form. Map keys serialize sorted.
    pub fn config_hash(&self) -> Result<String, OptimizerError> {
        let canonical = serde_json::to_string(&self.stats.config)?;
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    pub fn report(&self) -> Result<OptimizationReport, OptimizerError> {
        Ok(OptimizationReport {
            candidate: self.name.clone(),
            config: self.stats.config.clone(),
            stats: self.stats.clone(),
            hash: self.config_hash()?,
        })
    }
}

/// What the calibrate tool writes out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub candidate: String,
    pub config: CalibrationConfig,
    pub stats: CandidateStats,
    pub hash: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Optimizer;

impl Optimizer {
    pub const INTENT_LOCK_PENALTY: f64 = 1.0;

    /// Higher balance and lower deviation score better; losing the intent
    /// lock costs a flat penalty.
    pub fn score(balance: f64, deviation: f64, intent_lock: bool) -> f64 {
        let mut score = balance - deviation;
        if !intent_lock {
            score -= Self::INTENT_LOCK_PENALTY;
        }
        score
    }

    /// Linear scan for the best-scoring candidate. The first of equal scores
    /// (in name order) wins. `None` means no usable configuration.
    pub fn optimize(&self, candidates: &BTreeMap<String, CandidateStats>) -> Option<Optimized> {
        let mut best: Option<Optimized> = None;
        for (name, stats) in candidates {
            let score = stats.score();
            debug!(candidate = %name, score, "scored candidate");
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(Optimized {
                    name: name.clone(),
                    stats: stats.clone(),
                    score,
                });
            }
        }
        if let Some(ref winner) = best {
            info!(candidate = %winner.name, score = winner.score, "selected calibration");
        }
        best
    }
}
