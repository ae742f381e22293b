/// The simulation runner: Catalog → Policy decisions → Trace.
///
/// Walks the catalog in order, asks the active policy for a choice at every
/// scene, validates the chosen tags, accumulates trait totals, and records
/// advisory cap/spacing flags alongside each step.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::archetype::ArchetypeTable;
use crate::core::context::{Decision, RunContext};
use crate::core::policy::{Policy, PolicyError, StateSnapshot};
use crate::schema::catalog::{CatalogError, ScenarioCatalog};
use crate::schema::choice::{ChoiceOption, EffectError};
use crate::schema::trace::{flags, FinalSummary, RunOutput, TraceEntry, TraceRecord};
use crate::schema::traits::{rank_desc, Trait, TraitRegistry};

pub const DEFAULT_MAX_STEPS: usize = 100;
pub const DEFAULT_SCENE_CAP: f64 = 0.8;
pub const DEFAULT_ACT_TRAIT_CAP: f64 = 2.0;
/// Running totals above `act_trait_cap * TRAIT_CAP_TOLERANCE` are flagged.
pub const TRAIT_CAP_TOLERANCE: f64 = 1.2;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("scene '{scene_id}', choice '{choice_id}': choice has no primary trait tag")]
    TagIntegrity { scene_id: String, choice_id: String },
    #[error(
        "scene '{scene_id}', choice '{choice_id}': secondary weight {secondary} exceeds primary weight {primary}"
    )]
    WeightOrder {
        scene_id: String,
        choice_id: String,
        primary: f64,
        secondary: f64,
    },
    #[error("scene '{scene_id}': policy chose unknown choice '{choice_id}'")]
    InvalidChoice { scene_id: String, choice_id: String },
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("max_steps must be positive")]
    ZeroSteps,
    #[error("seed {seed} plus {runs} runs overflows u64")]
    SeedOverflow { seed: u64, runs: u64 },
}

/// Drives deterministic simulation runs over a shared, read-only catalog.
/// Built via `Runner::builder()`.
#[derive(Debug, Clone)]
pub struct Runner {
    catalog: ScenarioCatalog,
    scene_cap: f64,
    act_trait_cap: f64,
    endings: Option<ArchetypeTable>,
}

/// Builder for constructing a `Runner`.
#[derive(Debug, Default)]
pub struct RunnerBuilder {
    catalog_dir: Option<PathBuf>,
    registry: Option<TraitRegistry>,
    scene_cap: Option<f64>,
    act_trait_cap: Option<f64>,
    /// Directly provided catalog (for testing without files).
    catalog: Option<ScenarioCatalog>,
    endings: Option<ArchetypeTable>,
}

impl Runner {
    pub fn builder() -> RunnerBuilder {
        RunnerBuilder::default()
    }

    pub fn catalog(&self) -> &ScenarioCatalog {
        &self.catalog
    }

    pub fn scene_cap(&self) -> f64 {
        self.scene_cap
    }

    pub fn act_trait_cap(&self) -> f64 {
        self.act_trait_cap
    }

    /// Execute one run. Identical `(policy, seed, max_steps)` over the same
    /// catalog reproduce the same trace.
    #[instrument(skip_all, fields(policy = policy.name(), seed = seed, max_steps = max_steps))]
    pub fn run(
        &self,
        policy: &mut dyn Policy,
        seed: u64,
        max_steps: usize,
    ) -> Result<RunOutput, RunError> {
        if max_steps == 0 {
            return Err(RunError::ZeroSteps);
        }

        let run_id = format!("run_{}", seed);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut ctx = RunContext::new();
        let mut act_steps: BTreeMap<u8, usize> = BTreeMap::new();
        let mut trace = Vec::new();
        let mut advisories = 0usize;

        for (idx, scene) in self.catalog.scenes().iter().take(max_steps).enumerate() {
            let step = idx + 1;
            let act_counter = act_steps.entry(scene.act).or_insert(0);
            let act_step = *act_counter;
            *act_counter += 1;

            let snapshot = StateSnapshot {
                act: scene.act,
                scene_id: scene.scene_id.clone(),
                options: scene
                    .choices
                    .iter()
                    .map(|c| ChoiceOption::project(scene, c))
                    .collect(),
                totals: ctx.totals().clone(),
                step: idx,
                act_step,
            };

            let choice_id = policy.decide(&snapshot, &mut rng)?;
            let chosen = snapshot
                .options
                .iter()
                .find(|o| o.choice_id == choice_id)
                .ok_or_else(|| RunError::InvalidChoice {
                    scene_id: scene.scene_id.clone(),
                    choice_id: choice_id.clone(),
                })?;

            let effect = chosen.effect().map_err(|e| match e {
                EffectError::MissingPrimary => RunError::TagIntegrity {
                    scene_id: scene.scene_id.clone(),
                    choice_id: choice_id.clone(),
                },
                EffectError::WeightOrder { primary, secondary } => RunError::WeightOrder {
                    scene_id: scene.scene_id.clone(),
                    choice_id: choice_id.clone(),
                    primary,
                    secondary,
                },
            })?;
            if effect.primary().is_none() {
                return Err(RunError::TagIntegrity {
                    scene_id: scene.scene_id.clone(),
                    choice_id,
                });
            }

            let delta = ctx.apply(&effect.contributions());

            let mut step_flags = Vec::with_capacity(3);
            let scene_total: f64 = delta.values().sum();
            if scene_total <= self.scene_cap {
                step_flags.push(flags::SCENE_CAP_OK.to_string());
            } else {
                step_flags.push(flags::SCENE_CAP_FAIL.to_string());
            }

            let major = chosen.is_major();
            let spaced = ctx.record(Decision {
                step,
                scene_id: scene.scene_id.clone(),
                choice_id: choice_id.clone(),
                major,
            });
            if spaced {
                step_flags.push(flags::MAJOR_SPACING_OK.to_string());
            } else {
                step_flags.push(flags::MAJOR_SPACING_FAIL.to_string());
            }

            if ctx.any_total_above(self.act_trait_cap * TRAIT_CAP_TOLERANCE) {
                step_flags.push(flags::TRAIT_CAP_FAIL.to_string());
            }

            advisories += step_flags.iter().filter(|f| f.ends_with("_fail")).count();
            debug!(step, scene = %scene.scene_id, choice = %choice_id, ?step_flags, "step");

            trace.push(TraceRecord::Step(TraceEntry {
                run_id: run_id.clone(),
                step,
                scene_id: scene.scene_id.clone(),
                choice_id,
                delta,
                totals: ctx.totals().clone(),
                flags: step_flags,
                major,
                end: false,
            }));
        }

        let final_summary = self.summarize(&run_id, &ctx);
        if advisories > 0 {
            warn!(advisories, "run finished with advisory failures");
        }
        info!(
            steps = trace.len(),
            advisories,
            top = ?final_summary.top3.first(),
            "run complete"
        );
        trace.push(TraceRecord::Final(final_summary.clone()));

        Ok(RunOutput {
            trace,
            final_summary,
        })
    }

    fn summarize(&self, run_id: &str, ctx: &RunContext) -> FinalSummary {
        let normalized = ctx.normalized();

        let mut ranked: Vec<(Trait, u32)> = normalized.iter().map(|(t, v)| (*t, *v)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.name().cmp(b.0.name())));
        let top3 = ranked.into_iter().take(3).map(|(t, _)| t).collect();

        let ending_id = self.endings.as_ref().map(|table| {
            let scored: BTreeMap<Trait, f64> = ctx
                .totals()
                .iter()
                .filter(|(_, v)| **v > 0.0)
                .map(|(t, v)| (*t, *v))
                .collect();
            table.resolve(&scored).id()
        });

        FinalSummary {
            run_id: run_id.to_string(),
            end: true,
            normalized,
            top3,
            ending_id,
            payoffs: BTreeMap::new(),
        }
    }
}

/// Top `count` traits of a raw score map, score descending, ties by name.
pub fn top_traits(scores: &BTreeMap<Trait, f64>, count: usize) -> Vec<Trait> {
    rank_desc(scores)
        .into_iter()
        .take(count)
        .map(|(t, _)| t)
        .collect()
}

/// Seeds for a batch of `runs` starting at `first`: `first + i` for each run.
pub fn batch_seeds(first: u64, runs: u64) -> Result<Vec<u64>, RunError> {
    (0..runs)
        .map(|i| {
            first
                .checked_add(i)
                .ok_or(RunError::SeedOverflow { seed: first, runs })
        })
        .collect()
}

impl RunnerBuilder {
    /// Load the catalog from `act<N>*` files in `path`.
    pub fn catalog_dir(mut self, path: &Path) -> Self {
        self.catalog_dir = Some(path.to_path_buf());
        self
    }

    /// Provide the catalog directly (for testing without files).
    pub fn with_catalog(mut self, catalog: ScenarioCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Registry used to canonicalize trait labels when loading from disk.
    pub fn registry(mut self, registry: TraitRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn scene_cap(mut self, cap: f64) -> Self {
        self.scene_cap = Some(cap);
        self
    }

    pub fn act_trait_cap(mut self, cap: f64) -> Self {
        self.act_trait_cap = Some(cap);
        self
    }

    /// Resolve an ending id for every run's final summary.
    pub fn endings(mut self, table: ArchetypeTable) -> Self {
        self.endings = Some(table);
        self
    }

    pub fn build(self) -> Result<Runner, RunError> {
        let catalog = match (self.catalog, self.catalog_dir) {
            (Some(catalog), _) => catalog,
            (None, Some(dir)) => {
                let registry = self.registry.unwrap_or_default();
                ScenarioCatalog::load_dir(&dir, &registry)?
            }
            (None, None) => ScenarioCatalog::default(),
        };
        info!(scenes = catalog.len(), "catalog ready");

        Ok(Runner {
            catalog,
            scene_cap: self.scene_cap.unwrap_or(DEFAULT_SCENE_CAP),
            act_trait_cap: self.act_trait_cap.unwrap_or(DEFAULT_ACT_TRAIT_CAP),
            endings: self.endings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::{ChoiceId, RuleWeightedPolicy, SeededRandomPolicy};
    use crate::schema::choice::{Choice, Scene, TraitWeight};

    fn choice(id: &str, primary: Option<(Trait, f64)>, secondary: Option<(Trait, f64)>) -> Choice {
        Choice {
            choice_id: id.to_string(),
            text: String::new(),
            primary: primary.map(|(t, w)| TraitWeight::new(t, w)),
            secondary: secondary.map(|(t, w)| TraitWeight::new(t, w)),
        }
    }

    fn scene(id: &str, act: u8, choices: Vec<Choice>) -> Scene {
        Scene {
            scene_id: id.to_string(),
            act,
            text: String::new(),
            choices,
        }
    }

    fn runner(scenes: Vec<Scene>) -> Runner {
        Runner::builder()
            .with_catalog(ScenarioCatalog::from_scenes(scenes).unwrap())
            .build()
            .unwrap()
    }

    /// Always answers with a fixed id.
    struct Fixed(&'static str);

    impl Policy for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn decide(&mut self, _: &StateSnapshot, _: &mut StdRng) -> Result<ChoiceId, PolicyError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn accumulates_delta_and_totals() {
        let r = runner(vec![
            scene("s1", 1, vec![choice("a", Some((Trait::Hubris, 0.5)), Some((Trait::Control, 0.2)))]),
            scene("s2", 1, vec![choice("a2", Some((Trait::Hubris, 0.3)), None)]),
        ]);
        let out = r.run(&mut Fixed("a"), 1, 1).unwrap();
        let step = out.steps().next().unwrap();
        assert_eq!(step.delta, BTreeMap::from([(Trait::Hubris, 0.5), (Trait::Control, 0.2)]));
        assert_eq!(step.totals[&Trait::Hubris], 0.5);
        assert_eq!(step.totals.len(), Trait::ALL.len());
        assert_eq!(out.steps().count(), 1);
        assert_eq!(out.final_summary.normalized[&Trait::Hubris], 71);
        assert_eq!(out.final_summary.normalized[&Trait::Control], 28);
    }

    #[test]
    fn missing_primary_is_fatal() {
        let r = runner(vec![scene("s1", 1, vec![choice("bare", None, None)])]);
        let err = r.run(&mut Fixed("bare"), 1, 10).unwrap_err();
        assert!(matches!(err, RunError::TagIntegrity { ref scene_id, ref choice_id }
            if scene_id == "s1" && choice_id == "bare"));
    }

    #[test]
    fn inverted_weights_are_fatal() {
        let r = runner(vec![scene(
            "s1",
            1,
            vec![choice("bad", Some((Trait::Fear, 0.2)), Some((Trait::Envy, 0.4)))],
        )]);
        let err = r.run(&mut Fixed("bad"), 1, 10).unwrap_err();
        assert!(matches!(err, RunError::WeightOrder { .. }));
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn unknown_choice_is_fatal() {
        let r = runner(vec![scene("s1", 1, vec![choice("a", Some((Trait::Fear, 0.2)), None)])]);
        let err = r.run(&mut Fixed("zzz"), 1, 10).unwrap_err();
        assert!(matches!(err, RunError::InvalidChoice { ref choice_id, .. } if choice_id == "zzz"));
    }

    #[test]
    fn zero_steps_rejected() {
        let r = runner(Vec::new());
        assert!(matches!(r.run(&mut Fixed("a"), 1, 0), Err(RunError::ZeroSteps)));
    }

    #[test]
    fn batch_seeds_count_up_and_refuse_overflow() {
        assert_eq!(batch_seeds(7, 3).unwrap(), vec![7, 8, 9]);
        assert!(batch_seeds(0, 0).unwrap().is_empty());
        assert_eq!(batch_seeds(u64::MAX, 1).unwrap(), vec![u64::MAX]);
        assert!(matches!(
            batch_seeds(u64::MAX - 1, 3),
            Err(RunError::SeedOverflow { seed, runs: 3 }) if seed == u64::MAX - 1
        ));
    }

    #[test]
    fn empty_catalog_gives_only_final() {
        let r = runner(Vec::new());
        let out = r.run(&mut SeededRandomPolicy::new(), 3, 10).unwrap();
        assert_eq!(out.trace.len(), 1);
        assert!(out.final_summary.normalized.is_empty());
        assert!(out.final_summary.top3.is_empty());
    }

    #[test]
    fn scene_cap_flag() {
        let r = runner(vec![
            scene("s1", 1, vec![choice("big", Some((Trait::Wrath, 0.6)), Some((Trait::Envy, 0.3)))]),
            scene("s2", 1, vec![choice("small", Some((Trait::Wrath, 0.4)), Some((Trait::Envy, 0.4)))]),
        ]);
        let mut policy = SeededRandomPolicy::new();
        let out = r.run(&mut policy, 1, 10).unwrap();
        let steps: Vec<&TraceEntry> = out.steps().collect();
        assert!(steps[0].has_flag(flags::SCENE_CAP_FAIL));
        assert!(steps[1].has_flag(flags::SCENE_CAP_OK));
    }

    #[test]
    fn spacing_and_trait_cap_flags() {
        let majors: Vec<Scene> = (0..4)
            .map(|i| scene(&format!("s{}", i), 1, vec![choice(&format!("m{}", i), Some((Trait::Wrath, 0.8)), None)]))
            .collect();
        let r = runner(majors);
        let out = r.run(&mut RuleWeightedPolicy::impulsive(), 9, 10).unwrap();
        let steps: Vec<&TraceEntry> = out.steps().collect();
        assert!(steps[0].has_flag(flags::MAJOR_SPACING_OK));
        assert!(steps[1].has_flag(flags::MAJOR_SPACING_FAIL));
        assert!(steps[2].has_flag(flags::MAJOR_SPACING_OK));
        assert!(steps[3].has_flag(flags::MAJOR_SPACING_FAIL));
        assert!(!steps[1].has_flag(flags::TRAIT_CAP_FAIL));
        assert!(steps[3].has_flag(flags::TRAIT_CAP_FAIL));
    }

    #[test]
    fn snapshot_indices_track_acts() {
        struct Recorder(Vec<(usize, usize, u8)>);
        impl Policy for Recorder {
            fn name(&self) -> &str {
                "recorder"
            }
            fn decide(&mut self, s: &StateSnapshot, _: &mut StdRng) -> Result<ChoiceId, PolicyError> {
                self.0.push((s.step, s.act_step, s.act));
                Ok(s.options[0].choice_id.clone())
            }
        }
        let r = runner(vec![
            scene("a", 1, vec![choice("a1", Some((Trait::Fear, 0.1)), None)]),
            scene("b", 1, vec![choice("b1", Some((Trait::Fear, 0.1)), None)]),
            scene("c", 2, vec![choice("c1", Some((Trait::Fear, 0.1)), None)]),
        ]);
        let mut rec = Recorder(Vec::new());
        r.run(&mut rec, 0, 10).unwrap();
        assert_eq!(rec.0, vec![(0, 0, 1), (1, 1, 1), (2, 0, 2)]);
    }

    #[test]
    fn endings_fill_ending_id() {
        let r = Runner::builder()
            .with_catalog(
                ScenarioCatalog::from_scenes(vec![scene(
                    "s1",
                    1,
                    vec![choice("a", Some((Trait::Avarice, 0.6)), Some((Trait::Fear, 0.2)))],
                )])
                .unwrap(),
            )
            .endings(ArchetypeTable::default())
            .build()
            .unwrap();
        let out = r.run(&mut Fixed("a"), 1, 5).unwrap();
        assert_eq!(out.final_summary.ending_id.as_deref(), Some("the_collector"));
    }

    #[test]
    fn top_traits_orders_by_score_then_name() {
        let scores = BTreeMap::from([(Trait::Envy, 1.0), (Trait::Apathy, 1.0), (Trait::Wrath, 3.0)]);
        assert_eq!(top_traits(&scores, 2), vec![Trait::Wrath, Trait::Apathy]);
    }
}
