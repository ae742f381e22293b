/// Scripted decision policies used to play the catalog automatically.
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::core::calibrator::Calibrator;
use crate::schema::choice::ChoiceOption;
use crate::schema::traits::Trait;

pub type ChoiceId = String;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("scene '{0}' offers no options")]
    NoOptions(String),
    #[error("unknown policy: {0}")]
    UnknownPolicy(String),
}

/// What a policy sees at each step. Built fresh by the runner; `totals` is
/// a copy, never the live accumulator.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub act: u8,
    pub scene_id: String,
    pub options: Vec<ChoiceOption>,
    pub totals: BTreeMap<Trait, f64>,
    /// Zero-based index across the whole run.
    pub step: usize,
    /// Zero-based index within the current act.
    pub act_step: usize,
}

/// A decision strategy. Implementations may keep state for the current run
/// only; callers use a fresh instance (or [`Policy::reset`]) per run.
pub trait Policy: Send {
    fn name(&self) -> &str;

    /// Pick one of `snapshot.options` by id.
    fn decide(&mut self, snapshot: &StateSnapshot, rng: &mut StdRng)
        -> Result<ChoiceId, PolicyError>;

    /// Drop any run-local state.
    fn reset(&mut self) {}
}

fn pick_uniform(
    candidates: &[&ChoiceOption],
    snapshot: &StateSnapshot,
    rng: &mut StdRng,
) -> Result<ChoiceId, PolicyError> {
    candidates
        .choose(rng)
        .map(|o| o.choice_id.clone())
        .ok_or_else(|| PolicyError::NoOptions(snapshot.scene_id.clone()))
}

/// Scores options against preference and avoidance tables and takes the
/// best one, breaking exact ties with the RNG.
#[derive(Debug, Clone)]
pub struct RuleWeightedPolicy {
    name: String,
    prefer: BTreeMap<Trait, f64>,
    avoid: BTreeMap<Trait, f64>,
    calibration: Option<Calibrator>,
    history: Vec<&'static str>,
}

impl RuleWeightedPolicy {
    pub fn new(
        name: &str,
        prefer: BTreeMap<Trait, f64>,
        avoid: BTreeMap<Trait, f64>,
    ) -> Self {
        Self {
            name: name.to_string(),
            prefer,
            avoid,
            calibration: None,
            history: Vec::new(),
        }
    }

    /// Bold and dominant: chases Hubris, shies from Fear.
    pub fn aggressive() -> Self {
        Self::new(
            "hubris",
            BTreeMap::from([(Trait::Hubris, 2.0), (Trait::Control, 1.0)]),
            BTreeMap::from([(Trait::Fear, 1.0)]),
        )
    }

    /// Methodical: Control and Fear over Impulsivity and Wrath.
    pub fn cautious() -> Self {
        Self::new(
            "control_fear",
            BTreeMap::from([(Trait::Control, 2.0), (Trait::Fear, 1.5)]),
            BTreeMap::from([(Trait::Impulsivity, 2.0), (Trait::Wrath, 1.0)]),
        )
    }

    /// Profit through cunning.
    pub fn cunning() -> Self {
        Self::new(
            "deception_avarice",
            BTreeMap::from([(Trait::Deception, 2.0), (Trait::Avarice, 2.0)]),
            BTreeMap::from([(Trait::Apathy, 1.0)]),
        )
    }

    /// High variance: Impulsivity and Wrath, never careful Control.
    pub fn impulsive() -> Self {
        Self::new(
            "reckless_chaotic",
            BTreeMap::from([(Trait::Impulsivity, 2.0), (Trait::Wrath, 1.5)]),
            BTreeMap::from([(Trait::Control, 2.0)]),
        )
    }

    /// Scale preferences through a calibrator and explore with its epsilon.
    pub fn with_calibration(mut self, calibrator: Calibrator) -> Self {
        self.calibration = Some(calibrator);
        self
    }

    pub fn prefer(&self) -> &BTreeMap<Trait, f64> {
        &self.prefer
    }

    pub fn avoid(&self) -> &BTreeMap<Trait, f64> {
        &self.avoid
    }

    /// The trait this policy weights highest (ties by name).
    pub fn favourite(&self) -> Option<Trait> {
        crate::schema::traits::rank_desc(&self.prefer)
            .first()
            .map(|(t, _)| *t)
    }

    fn preference(&self, trait_id: Trait) -> Option<f64> {
        let base = *self.prefer.get(&trait_id)?;
        Some(match &self.calibration {
            Some(calib) => base * calib.calibrate(&self.history, trait_id.name()),
            None => base,
        })
    }

    pub fn score_option(&self, option: &ChoiceOption) -> f64 {
        let mut score = 0.0;
        for tw in option.primary.iter().chain(option.secondary.iter()) {
            if let Some(mult) = self.preference(tw.trait_id) {
                score += tw.weight * mult;
            }
            if let Some(mult) = self.avoid.get(&tw.trait_id) {
                score -= tw.weight * mult;
            }
        }
        score
    }

    fn remember(&mut self, snapshot: &StateSnapshot, choice_id: &str) {
        if self.calibration.is_none() {
            return;
        }
        let primary = snapshot
            .options
            .iter()
            .find(|o| o.choice_id == choice_id)
            .and_then(|o| o.primary);
        if let Some(tw) = primary {
            self.history.push(tw.trait_id.name());
        }
    }
}

impl Policy for RuleWeightedPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn decide(
        &mut self,
        snapshot: &StateSnapshot,
        rng: &mut StdRng,
    ) -> Result<ChoiceId, PolicyError> {
        let explore = match &self.calibration {
            Some(calib) if calib.epsilon() > 0.0 => rng.gen_bool(calib.epsilon()),
            _ => false,
        };

        let chosen = if explore {
            let all: Vec<&ChoiceOption> = snapshot.options.iter().collect();
            pick_uniform(&all, snapshot, rng)?
        } else {
            let mut best_score: Option<f64> = None;
            let mut best: Vec<&ChoiceOption> = Vec::new();
            for option in &snapshot.options {
                let score = self.score_option(option);
                match best_score {
                    Some(b) if score < b => {}
                    Some(b) if score == b => best.push(option),
                    _ => {
                        best_score = Some(score);
                        best.clear();
                        best.push(option);
                    }
                }
            }
            pick_uniform(&best, snapshot, rng)?
        };

        self.remember(snapshot, &chosen);
        Ok(chosen)
    }

    fn reset(&mut self) {
        self.history.clear();
    }
}

/// Monte-Carlo exploration that favours unseen choices and refuses a third
/// consecutive major when an alternative exists.
#[derive(Debug, Clone, Default)]
pub struct SeededRandomPolicy {
    seen: FxHashSet<String>,
    major_streak: u32,
}

impl SeededRandomPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Policy for SeededRandomPolicy {
    fn name(&self) -> &str {
        "random"
    }

    fn decide(
        &mut self,
        snapshot: &StateSnapshot,
        rng: &mut StdRng,
    ) -> Result<ChoiceId, PolicyError> {
        let mut candidates: Vec<&ChoiceOption> = snapshot.options.iter().collect();
        if self.major_streak >= 2 {
            let calm: Vec<&ChoiceOption> =
                candidates.iter().copied().filter(|o| !o.is_major()).collect();
            if !calm.is_empty() {
                candidates = calm;
            }
        }

        let unseen: Vec<&ChoiceOption> = candidates
            .iter()
            .copied()
            .filter(|o| !self.seen.contains(&o.choice_id))
            .collect();
        let pool = if unseen.is_empty() { &candidates } else { &unseen };
        let choice = *pool
            .choose(rng)
            .ok_or_else(|| PolicyError::NoOptions(snapshot.scene_id.clone()))?;

        if choice.is_major() {
            self.major_streak += 1;
        } else {
            self.major_streak = 0;
        }
        self.seen.insert(choice.choice_id.clone());
        Ok(choice.choice_id.clone())
    }

    fn reset(&mut self) {
        self.seen.clear();
        self.major_streak = 0;
    }
}

pub const DEFAULT_DECOY_CHANCE: f64 = 0.1;
pub const DEFAULT_MIDPOINT: f64 = 0.35;

/// A "plausible human": mid-weight options, with the occasional decoy.
#[derive(Debug, Clone)]
pub struct BalancedPolicy {
    decoy_chance: f64,
    midpoint: f64,
}

impl Default for BalancedPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_DECOY_CHANCE)
    }
}

impl BalancedPolicy {
    pub fn new(decoy_chance: f64) -> Self {
        Self {
            decoy_chance,
            midpoint: DEFAULT_MIDPOINT,
        }
    }

    fn distance(&self, option: &ChoiceOption) -> f64 {
        (self.midpoint - option.primary_weight()).abs()
    }
}

impl Policy for BalancedPolicy {
    fn name(&self) -> &str {
        "balanced_human"
    }

    fn decide(
        &mut self,
        snapshot: &StateSnapshot,
        rng: &mut StdRng,
    ) -> Result<ChoiceId, PolicyError> {
        let decoys: Vec<&ChoiceOption> = snapshot.options.iter().filter(|o| o.is_decoy).collect();
        if !decoys.is_empty() && rng.gen::<f64>() < self.decoy_chance {
            return pick_uniform(&decoys, snapshot, rng);
        }

        let closest = snapshot
            .options
            .iter()
            .map(|o| self.distance(o))
            .fold(f64::INFINITY, f64::min);
        let best: Vec<&ChoiceOption> = snapshot
            .options
            .iter()
            .filter(|o| self.distance(o) == closest)
            .collect();
        pick_uniform(&best, snapshot, rng)
    }
}

/// The shipped policies, addressable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyKind {
    Hubris,
    ControlFear,
    DeceptionAvarice,
    RecklessChaotic,
    Random,
    BalancedHuman,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 6] = [
        PolicyKind::Random,
        PolicyKind::Hubris,
        PolicyKind::ControlFear,
        PolicyKind::DeceptionAvarice,
        PolicyKind::RecklessChaotic,
        PolicyKind::BalancedHuman,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Hubris => "hubris",
            Self::ControlFear => "control_fear",
            Self::DeceptionAvarice => "deception_avarice",
            Self::RecklessChaotic => "reckless_chaotic",
            Self::Random => "random",
            Self::BalancedHuman => "balanced_human",
        }
    }

    /// The rule-weighted configuration behind this kind, if it has one.
    pub fn rule_weighted(&self) -> Option<RuleWeightedPolicy> {
        match self {
            Self::Hubris => Some(RuleWeightedPolicy::aggressive()),
            Self::ControlFear => Some(RuleWeightedPolicy::cautious()),
            Self::DeceptionAvarice => Some(RuleWeightedPolicy::cunning()),
            Self::RecklessChaotic => Some(RuleWeightedPolicy::impulsive()),
            Self::Random | Self::BalancedHuman => None,
        }
    }

    /// A fresh instance with no run-local state.
    pub fn build(&self) -> Box<dyn Policy> {
        self.build_with(None)
    }

    /// As [`PolicyKind::build`], attaching `calibration` to rule-weighted kinds.
    pub fn build_with(&self, calibration: Option<&Calibrator>) -> Box<dyn Policy> {
        if let Some(policy) = self.rule_weighted() {
            return match calibration {
                Some(calib) => Box::new(policy.with_calibration(calib.clone())),
                None => Box::new(policy),
            };
        }
        match self {
            Self::Random => Box::new(SeededRandomPolicy::new()),
            _ => Box::new(BalancedPolicy::default()),
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PolicyKind {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hubris" | "aggressive" => Ok(Self::Hubris),
            "control_fear" | "cautious" => Ok(Self::ControlFear),
            "deception_avarice" | "cunning" => Ok(Self::DeceptionAvarice),
            "reckless_chaotic" | "impulsive" => Ok(Self::RecklessChaotic),
            "random" => Ok(Self::Random),
            "balanced_human" | "balanced" => Ok(Self::BalancedHuman),
            other => Err(PolicyError::UnknownPolicy(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::choice::TraitWeight;
    use rand::SeedableRng;

    fn option(id: &str, primary: Option<(Trait, f64)>, secondary: Option<(Trait, f64)>) -> ChoiceOption {
        let primary = primary.map(|(t, w)| TraitWeight::new(t, w));
        let secondary = secondary.map(|(t, w)| TraitWeight::new(t, w));
        let pw = primary.map_or(0.0, |tw| tw.weight);
        let sw = secondary.map_or(0.0, |tw| tw.weight);
        ChoiceOption {
            choice_id: id.to_string(),
            scene_id: "scene".to_string(),
            text: String::new(),
            primary,
            secondary,
            is_decoy: pw == 0.0 && sw == 0.0,
        }
    }

    fn snapshot(options: Vec<ChoiceOption>) -> StateSnapshot {
        StateSnapshot {
            act: 1,
            scene_id: "scene".to_string(),
            options,
            totals: Trait::zeroed(),
            step: 0,
            act_step: 0,
        }
    }

    #[test]
    fn aggressive_scores_prefer_minus_avoid() {
        let policy = RuleWeightedPolicy::aggressive();
        let opt = option("a", Some((Trait::Hubris, 0.5)), Some((Trait::Fear, 0.2)));
        assert!((policy.score_option(&opt) - (0.5 * 2.0 - 0.2)).abs() < 1e-9);
        assert_eq!(policy.favourite(), Some(Trait::Hubris));
    }

    #[test]
    fn rule_weighted_picks_the_maximum() {
        let mut policy = RuleWeightedPolicy::cautious();
        let snap = snapshot(vec![
            option("wrath", Some((Trait::Wrath, 0.6)), None),
            option("control", Some((Trait::Control, 0.4)), None),
            option("fear", Some((Trait::Fear, 0.3)), None),
        ]);
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            assert_eq!(policy.decide(&snap, &mut rng).unwrap(), "control");
        }
    }

    #[test]
    fn rule_weighted_breaks_ties_with_rng() {
        let mut policy = RuleWeightedPolicy::cunning();
        let snap = snapshot(vec![
            option("lie", Some((Trait::Deception, 0.5)), None),
            option("steal", Some((Trait::Avarice, 0.5)), None),
        ]);
        let mut picks = FxHashSet::default();
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            picks.insert(policy.decide(&snap, &mut rng).unwrap());
        }
        assert_eq!(picks.len(), 2);
    }

    #[test]
    fn empty_options_error() {
        let mut rng = StdRng::seed_from_u64(1);
        let snap = snapshot(Vec::new());
        assert_eq!(
            RuleWeightedPolicy::impulsive().decide(&snap, &mut rng),
            Err(PolicyError::NoOptions("scene".to_string()))
        );
        assert!(SeededRandomPolicy::new().decide(&snap, &mut rng).is_err());
        assert!(BalancedPolicy::default().decide(&snap, &mut rng).is_err());
    }

    #[test]
    fn random_prefers_unseen_choices() {
        let mut policy = SeededRandomPolicy::new();
        let mut rng = StdRng::seed_from_u64(7);
        let snap = snapshot(vec![
            option("a", Some((Trait::Envy, 0.2)), None),
            option("b", Some((Trait::Envy, 0.3)), None),
            option("c", Some((Trait::Envy, 0.4)), None),
        ]);
        let mut picks: Vec<String> = (0..3)
            .map(|_| policy.decide(&snap, &mut rng).unwrap())
            .collect();
        picks.sort();
        assert_eq!(picks, vec!["a", "b", "c"]);
    }

    #[test]
    fn random_avoids_third_consecutive_major() {
        let mut policy = SeededRandomPolicy::new();
        let majors_only = snapshot(vec![option("m1", Some((Trait::Wrath, 0.9)), None)]);
        let majors_only_2 = snapshot(vec![option("m2", Some((Trait::Wrath, 0.9)), None)]);
        let mixed = snapshot(vec![
            option("m3", Some((Trait::Wrath, 0.9)), None),
            option("calm", Some((Trait::Wrath, 0.1)), None),
        ]);
        let mut rng = StdRng::seed_from_u64(3);
        policy.decide(&majors_only, &mut rng).unwrap();
        policy.decide(&majors_only_2, &mut rng).unwrap();
        assert_eq!(policy.decide(&mixed, &mut rng).unwrap(), "calm");
        assert_eq!(policy.major_streak, 0);
    }

    #[test]
    fn random_reset_forgets_history() {
        let mut policy = SeededRandomPolicy::new();
        let snap = snapshot(vec![option("a", Some((Trait::Envy, 0.2)), None)]);
        let mut rng = StdRng::seed_from_u64(0);
        policy.decide(&snap, &mut rng).unwrap();
        assert!(!policy.seen.is_empty());
        policy.reset();
        assert!(policy.seen.is_empty());
        assert_eq!(policy.major_streak, 0);
    }

    #[test]
    fn balanced_prefers_mid_weights() {
        let mut policy = BalancedPolicy::new(0.0);
        let snap = snapshot(vec![
            option("heavy", Some((Trait::Hubris, 0.8)), None),
            option("mid", Some((Trait::Fear, 0.3)), None),
            option("decoy", Some((Trait::Apathy, 0.0)), None),
        ]);
        let mut rng = StdRng::seed_from_u64(11);
        assert_eq!(policy.decide(&snap, &mut rng).unwrap(), "mid");
    }

    #[test]
    fn balanced_always_decoys_at_full_chance() {
        let mut policy = BalancedPolicy::new(1.0);
        let snap = snapshot(vec![
            option("mid", Some((Trait::Fear, 0.35)), None),
            option("decoy", Some((Trait::Apathy, 0.0)), None),
        ]);
        for seed in 0..10 {
            let mut rng = StdRng::seed_from_u64(seed);
            assert_eq!(policy.decide(&snap, &mut rng).unwrap(), "decoy");
        }
    }

    #[test]
    fn calibration_records_history() {
        let mut policy = RuleWeightedPolicy::aggressive().with_calibration(Calibrator::default());
        let snap = snapshot(vec![option("a", Some((Trait::Hubris, 0.5)), None)]);
        let mut rng = StdRng::seed_from_u64(5);
        policy.decide(&snap, &mut rng).unwrap();
        policy.decide(&snap, &mut rng).unwrap();
        assert_eq!(policy.history, vec!["Hubris", "Hubris"]);
        let damped = policy.score_option(&snap.options[0]);
        assert!(damped < 0.5 * 2.0);
        policy.reset();
        assert!(policy.history.is_empty());
    }

    #[test]
    fn kind_parses_names_and_aliases() {
        assert_eq!("aggressive".parse::<PolicyKind>(), Ok(PolicyKind::Hubris));
        assert_eq!("control_fear".parse::<PolicyKind>(), Ok(PolicyKind::ControlFear));
        assert_eq!("balanced".parse::<PolicyKind>(), Ok(PolicyKind::BalancedHuman));
        assert!("chaos".parse::<PolicyKind>().is_err());
        for kind in PolicyKind::ALL {
            assert_eq!(kind.name().parse::<PolicyKind>(), Ok(kind));
            assert_eq!(kind.build().name(), kind.name());
        }
    }
}
