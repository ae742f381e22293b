//! Property-based tests for the harness invariants
//!
//! Tests invariants:
//! - Identical seed and catalog reproduce the identical trace
//! - Normalized percentages never sum past 100; top3 is ordered and short
//! - Calibrated multipliers stay inside [0, act_cap]
//! - Dual effects exist only with secondary weight <= primary weight

use proptest::prelude::*;

use narrative_harness::core::calibrator::{CalibrationConfig, Calibrator};
use narrative_harness::core::context::RunContext;
use narrative_harness::core::policy::PolicyKind;
use narrative_harness::core::runner::Runner;
use narrative_harness::schema::catalog::ScenarioCatalog;
use narrative_harness::schema::choice::{Choice, Effect, Scene, TraitWeight};
use narrative_harness::schema::traits::Trait;

// ============================================================================
// Strategies
// ============================================================================

fn arb_trait() -> impl Strategy<Value = Trait> {
    prop::sample::select(Trait::ALL.to_vec())
}

/// A choice with a valid tag pair (secondary never outweighs primary).
fn arb_choice(id: String) -> impl Strategy<Value = Choice> {
    (arb_trait(), 0.0f64..0.9, prop::option::of((arb_trait(), 0.0f64..1.0))).prop_map(
        move |(primary, pw, secondary)| Choice {
            choice_id: id.clone(),
            text: String::new(),
            primary: Some(TraitWeight::new(primary, pw)),
            secondary: secondary.map(|(t, frac)| TraitWeight::new(t, pw * frac)),
        },
    )
}

fn arb_scene(index: usize) -> impl Strategy<Value = Scene> {
    (1usize..4)
        .prop_flat_map(move |n| {
            (0..n)
                .map(|c| arb_choice(format!("s{}_c{}", index, c)))
                .collect::<Vec<_>>()
        })
        .prop_map(move |choices| Scene {
            scene_id: format!("s{}", index),
            act: 1 + (index % 3) as u8,
            text: String::new(),
            choices,
        })
}

fn arb_runner() -> impl Strategy<Value = Runner> {
    (1usize..12)
        .prop_flat_map(|n| (0..n).map(arb_scene).collect::<Vec<_>>())
        .prop_map(|mut scenes| {
            scenes.sort_by_key(|s| s.act);
            Runner::builder()
                .with_catalog(ScenarioCatalog::from_scenes(scenes).unwrap())
                .build()
                .unwrap()
        })
}

fn arb_policy() -> impl Strategy<Value = PolicyKind> {
    prop::sample::select(PolicyKind::ALL.to_vec())
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #[test]
    fn prop_runs_are_deterministic(
        runner in arb_runner(),
        kind in arb_policy(),
        seed in any::<u64>(),
        max_steps in 1usize..20,
    ) {
        let first = runner.run(kind.build().as_mut(), seed, max_steps).unwrap();
        let second = runner.run(kind.build().as_mut(), seed, max_steps).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_summary_shape(
        runner in arb_runner(),
        kind in arb_policy(),
        seed in any::<u64>(),
    ) {
        let output = runner.run(kind.build().as_mut(), seed, 100).unwrap();
        prop_assert_eq!(output.steps().count(), runner.catalog().len());

        let summary = &output.final_summary;
        let sum: u32 = summary.normalized.values().sum();
        prop_assert!(sum <= 100);
        prop_assert!(summary.top3.len() <= 3);
        prop_assert!(summary.top3.len() <= summary.normalized.len());
        for pair in summary.top3.windows(2) {
            prop_assert!(summary.normalized[&pair[0]] >= summary.normalized[&pair[1]]);
        }
    }

    #[test]
    fn prop_normalized_within_rounding_of_100(
        weights in prop::collection::vec((arb_trait(), 0.01f64..1.0), 1..30),
    ) {
        let mut ctx = RunContext::new();
        let contributions: Vec<TraitWeight> =
            weights.iter().map(|(t, w)| TraitWeight::new(*t, *w)).collect();
        ctx.apply(&contributions);

        let normalized = ctx.normalized();
        let sum: u32 = normalized.values().sum();
        prop_assert!(sum <= 100);
        // Flooring loses less than one point per trait.
        prop_assert!(sum + normalized.len() as u32 >= 100);
    }

    #[test]
    fn prop_calibrate_stays_bounded(
        multiplier in -5.0f64..5.0,
        anti_streak in -1.0f64..1.0,
        decay in -1.0f64..1.0,
        act_cap in -1.0f64..3.0,
        history in prop::collection::vec(prop::sample::select(vec!["courage", "Hubris"]), 0..6),
    ) {
        let calibrator = Calibrator::new(CalibrationConfig {
            multipliers: [("courage".to_string(), multiplier)].into_iter().collect(),
            anti_streak,
            decay,
            act_cap,
            ..CalibrationConfig::default()
        });
        for label in ["courage", "Hubris"] {
            let value = calibrator.calibrate(&history, label);
            prop_assert!(value >= 0.0);
            prop_assert!(value <= calibrator.act_cap());
        }
    }

    #[test]
    fn prop_dual_enforces_weight_order(
        p in 0.0f64..1.0,
        s in 0.0f64..1.0,
        a in arb_trait(),
        b in arb_trait(),
    ) {
        let result = Effect::dual(TraitWeight::new(a, p), TraitWeight::new(b, s));
        prop_assert_eq!(result.is_ok(), s <= p);
    }
}
