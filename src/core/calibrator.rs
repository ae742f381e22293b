/// Calibration: bounded multipliers with anti-streak dampening and decay.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::schema::traits::TraitRegistry;

/// Safe ranges. Values outside are silently pulled back in.
pub const MULTIPLIER_RANGE: (f64, f64) = (0.8, 2.0);
pub const ANTI_STREAK_RANGE: (f64, f64) = (0.0, 0.15);
pub const DECAY_RANGE: (f64, f64) = (0.0, 0.03);
pub const SCENE_CAP_RANGE: (f64, f64) = (0.0, 0.5);
pub const ACT_CAP_RANGE: (f64, f64) = (0.0, 1.5);
pub const EPSILON_RANGE: (f64, f64) = (0.0, 0.03);

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn default_anti_streak() -> f64 {
    ANTI_STREAK_RANGE.1
}

fn default_decay() -> f64 {
    DECAY_RANGE.1
}

fn default_scene_cap() -> f64 {
    SCENE_CAP_RANGE.1
}

fn default_act_cap() -> f64 {
    ACT_CAP_RANGE.1
}

fn default_epsilon() -> f64 {
    EPSILON_RANGE.1
}

/// Tuning parameters as written in a calibration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Base multiplier per trait label.
    #[serde(default)]
    pub multipliers: BTreeMap<String, f64>,
    #[serde(default = "default_anti_streak")]
    pub anti_streak: f64,
    #[serde(default = "default_decay")]
    pub decay: f64,
    #[serde(default = "default_scene_cap")]
    pub scene_cap: f64,
    #[serde(default = "default_act_cap")]
    pub act_cap: f64,
    /// Probability of an exploratory pick.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            multipliers: BTreeMap::new(),
            anti_streak: default_anti_streak(),
            decay: default_decay(),
            scene_cap: default_scene_cap(),
            act_cap: default_act_cap(),
            epsilon: default_epsilon(),
        }
    }
}

impl CalibrationConfig {
    pub fn parse_json(input: &str) -> Result<Self, CalibrationError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn load_from_json(path: &Path) -> Result<Self, CalibrationError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_json(&contents)
    }

    /// A copy with every multiplier key that names a known trait rewritten to
    /// its canonical name. Keys collapsing onto one trait are summed; other
    /// keys are kept as written.
    pub fn canonicalized(&self, registry: &TraitRegistry) -> Self {
        let mut multipliers = BTreeMap::new();
        for (label, value) in &self.multipliers {
            let key = match registry.canonicalize(label) {
                Ok(trait_id) => trait_id.name().to_string(),
                Err(_) => label.clone(),
            };
            *multipliers.entry(key).or_insert(0.0) += value;
        }
        Self {
            multipliers,
            ..self.clone()
        }
    }

    /// A copy with every value pulled into its safe range.
    pub fn clamped(&self) -> Self {
        Self {
            multipliers: self
                .multipliers
                .iter()
                .map(|(k, v)| (k.clone(), clamp(*v, MULTIPLIER_RANGE)))
                .collect(),
            anti_streak: clamp(self.anti_streak, ANTI_STREAK_RANGE),
            decay: clamp(self.decay, DECAY_RANGE),
            scene_cap: clamp(self.scene_cap, SCENE_CAP_RANGE),
            act_cap: clamp(self.act_cap, ACT_CAP_RANGE),
            epsilon: clamp(self.epsilon, EPSILON_RANGE),
        }
    }
}

/// NaN collapses to the lower bound.
fn clamp(value: f64, (low, high): (f64, f64)) -> f64 {
    if value.is_nan() {
        low
    } else {
        value.max(low).min(high)
    }
}

/// Applies a clamped [`CalibrationConfig`]. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibrator {
    config: CalibrationConfig,
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new(CalibrationConfig::default())
    }
}

impl Calibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self::with_registry(config, &TraitRegistry::standard())
    }

    /// Canonicalize multiplier labels through `registry`, then clamp.
    pub fn with_registry(config: CalibrationConfig, registry: &TraitRegistry) -> Self {
        let prepared = config.canonicalized(registry).clamped();
        if prepared != config {
            debug!("calibration config canonicalized and clamped into safe ranges");
        }
        Self { config: prepared }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn multipliers(&self) -> &BTreeMap<String, f64> {
        &self.config.multipliers
    }

    pub fn anti_streak(&self) -> f64 {
        self.config.anti_streak
    }

    pub fn decay(&self) -> f64 {
        self.config.decay
    }

    pub fn scene_cap(&self) -> f64 {
        self.config.scene_cap
    }

    pub fn act_cap(&self) -> f64 {
        self.config.act_cap
    }

    pub fn epsilon(&self) -> f64 {
        self.config.epsilon
    }

    /// Multiplier for `label` given the selection `history` (oldest first).
    ///
    /// Starts from the configured base (1.0 if none), dampens by
    /// `anti_streak` when the last two selections were `label`, applies
    /// `decay`, and finally clamps into `[0, act_cap]`.
    pub fn calibrate<S: AsRef<str>>(&self, history: &[S], label: &str) -> f64 {
        let mut mult = self.config.multipliers.get(label).copied().unwrap_or(1.0);

        if let [.., prev, last] = history {
            if prev.as_ref() == label && last.as_ref() == label {
                mult *= 1.0 - self.config.anti_streak;
            }
        }

        mult *= 1.0 - self.config.decay;
        clamp(mult, (0.0, self.config.act_cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(multipliers: &[(&str, f64)]) -> CalibrationConfig {
        CalibrationConfig {
            multipliers: multipliers
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            ..CalibrationConfig::default()
        }
    }

    #[test]
    fn multipliers_clamped_on_construction() {
        let calib = Calibrator::new(config_with(&[("courage", 0.5)]));
        assert_eq!(calib.multipliers()["courage"], 0.8);

        let calib = Calibrator::new(config_with(&[("courage", 3.0)]));
        assert_eq!(calib.multipliers()["courage"], 2.0);
    }

    #[test]
    fn legacy_labels_reach_canonical_multipliers() {
        let config = CalibrationConfig::parse_json(
            r#"{"multipliers": {"Control & Perfectionism": 2.0}, "decay": 0.0, "anti_streak": 0.0}"#,
        )
        .unwrap();
        let calib = Calibrator::new(config);
        assert_eq!(calib.multipliers()["Control"], 2.0);
        // Act cap (default 1.5) bounds the result.
        assert_eq!(calib.calibrate::<&str>(&[], "Control"), 1.5);
        assert!(!calib.multipliers().contains_key("Control & Perfectionism"));

        let calib = Calibrator::new(CalibrationConfig {
            act_cap: 1.5,
            ..config_with(&[("Fear & Insecurity", 0.5), ("Fear", 0.6), ("courage", 1.1)])
        });
        assert_eq!(calib.multipliers()["Fear"], 1.1);
        assert_eq!(calib.multipliers()["courage"], 1.1);
        assert_eq!(calib.multipliers().len(), 2);
    }

    #[test]
    fn scalars_clamped_on_construction() {
        let calib = Calibrator::new(CalibrationConfig {
            anti_streak: 0.5,
            decay: -1.0,
            scene_cap: 0.9,
            act_cap: f64::NAN,
            epsilon: 0.05,
            ..CalibrationConfig::default()
        });
        assert_eq!(calib.anti_streak(), 0.15);
        assert_eq!(calib.decay(), 0.0);
        assert_eq!(calib.scene_cap(), 0.5);
        assert_eq!(calib.act_cap(), 0.0);
        assert_eq!(calib.epsilon(), 0.03);
    }

    #[test]
    fn anti_streak_and_decay() {
        let config = config_with(&[("courage", 1.0)]);
        let calib = Calibrator::new(config.clone());
        let mult = calib.calibrate(&["courage", "courage"], "courage");
        let expected = 1.0 * (1.0 - config.anti_streak) * (1.0 - config.decay);
        assert!((mult - expected).abs() < 1e-9);
    }

    #[test]
    fn no_streak_only_decays() {
        let calib = Calibrator::default();
        let mult = calib.calibrate(&["Fear", "Hubris"], "Hubris");
        assert!((mult - 0.97).abs() < 1e-9);
        let empty: [&str; 0] = [];
        assert!((calib.calibrate(&empty, "Hubris") - 0.97).abs() < 1e-9);
    }

    #[test]
    fn result_capped_by_act_cap() {
        let calib = Calibrator::new(CalibrationConfig {
            act_cap: 1.0,
            decay: 0.0,
            ..config_with(&[("Hubris", 2.0)])
        });
        assert_eq!(calib.calibrate(&["Hubris"], "Hubris"), 1.0);
    }

    #[test]
    fn parse_json_applies_defaults() {
        let config = CalibrationConfig::parse_json(r#"{"multipliers": {"Wrath": 1.2}, "decay": 0.01}"#)
            .unwrap();
        assert_eq!(config.decay, 0.01);
        assert_eq!(config.anti_streak, 0.15);
        assert_eq!(config.act_cap, 1.5);
        assert_eq!(config.multipliers["Wrath"], 1.2);
    }
}
