/// Scene Linter: validates scenario act files before they reach the harness.
///
/// Usage: scene_linter <catalog_dir> [--scene-cap <f64>]

use clap::Parser;
use narrative_harness::core::runner::DEFAULT_SCENE_CAP;
use narrative_harness::schema::catalog::{ScenarioCatalog, FIRST_ACT, LAST_ACT};
use narrative_harness::schema::choice::{EffectError, Scene};
use narrative_harness::schema::traits::TraitRegistry;
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Debug, Parser)]
#[command(name = "scene_linter", about = "Validate scenario act files")]
struct Args {
    /// Directory holding act1*/act2*/act3* files (.json or .ron)
    catalog_dir: PathBuf,

    /// Per-scene weight cap used for the overweight warning
    #[arg(long, default_value_t = DEFAULT_SCENE_CAP)]
    scene_cap: f64,
}

fn main() {
    let args = Args::parse();

    if !args.catalog_dir.is_dir() {
        eprintln!("ERROR: Path '{}' is not a directory", args.catalog_dir.display());
        process::exit(1);
    }

    let registry = TraitRegistry::standard();
    let mut errors = Vec::new();
    let scenes = load_scenes(&args.catalog_dir, &registry, &mut errors);
    println!("Loaded {} scenes", scenes.len());

    let warnings = lint_scenes(&scenes, args.scene_cap, &mut errors);

    println!("\n=== Scene Lint Report ===\n");

    if errors.is_empty() && warnings.is_empty() {
        println!("All checks passed!");
    }

    for warning in &warnings {
        println!("WARNING: {}", warning);
    }

    for error in &errors {
        println!("ERROR: {}", error);
    }

    println!(
        "\nSummary: {} errors, {} warnings",
        errors.len(),
        warnings.len()
    );

    if errors.is_empty() {
        process::exit(0);
    } else {
        process::exit(1);
    }
}

/// Load every act file on its own so one broken file doesn't hide the rest.
fn load_scenes(dir: &Path, registry: &TraitRegistry, errors: &mut Vec<String>) -> Vec<Scene> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries.flatten().map(|e| e.path()).collect(),
        Err(e) => {
            errors.push(format!("Failed to read '{}': {}", dir.display(), e));
            return Vec::new();
        }
    };
    files.sort();

    let mut scenes = Vec::new();
    for act in FIRST_ACT..=LAST_ACT {
        let prefix = format!("act{}", act);
        for path in &files {
            let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
            let ext = path.extension().and_then(|s| s.to_str());
            if !name.starts_with(&prefix) || !matches!(ext, Some("json") | Some("ron")) {
                continue;
            }
            match ScenarioCatalog::load_act(act, path, registry) {
                Ok(loaded) => {
                    println!("  Loaded: {} ({} scenes)", path.display(), loaded.len());
                    scenes.extend(loaded);
                }
                Err(e) => errors.push(format!("{}: {}", path.display(), e)),
            }
        }
    }
    scenes
}

fn lint_scenes(scenes: &[Scene], scene_cap: f64, errors: &mut Vec<String>) -> Vec<String> {
    let mut warnings = Vec::new();
    let mut scene_ids: FxHashSet<&str> = FxHashSet::default();

    for scene in scenes {
        if !scene_ids.insert(scene.scene_id.as_str()) {
            errors.push(format!("Duplicate scene id '{}'", scene.scene_id));
        }

        if scene.choices.is_empty() {
            errors.push(format!("Scene '{}' has no choices", scene.scene_id));
            continue;
        }
        if scene.choices.len() == 1 {
            warnings.push(format!("Scene '{}' offers a single choice", scene.scene_id));
        }

        let mut choice_ids: FxHashSet<&str> = FxHashSet::default();
        for choice in &scene.choices {
            if !choice_ids.insert(choice.choice_id.as_str()) {
                errors.push(format!(
                    "Scene '{}' repeats choice id '{}'",
                    scene.scene_id, choice.choice_id
                ));
            }

            match choice.effect() {
                Ok(effect) => {
                    let weight: f64 = effect.contributions().iter().map(|tw| tw.weight).sum();
                    if weight > scene_cap {
                        warnings.push(format!(
                            "Choice '{}/{}' carries {:.2} total weight (cap {:.2})",
                            scene.scene_id, choice.choice_id, weight, scene_cap
                        ));
                    }
                }
                Err(EffectError::MissingPrimary) => errors.push(format!(
                    "Choice '{}/{}' has a secondary tag but no primary",
                    scene.scene_id, choice.choice_id
                )),
                Err(EffectError::WeightOrder { primary, secondary }) => errors.push(format!(
                    "Choice '{}/{}' secondary weight {} exceeds primary weight {}",
                    scene.scene_id, choice.choice_id, secondary, primary
                )),
            }

            if choice.primary.is_none() && choice.secondary.is_none() {
                errors.push(format!(
                    "Choice '{}/{}' has no trait tags",
                    scene.scene_id, choice.choice_id
                ));
            }
        }
    }

    warnings
}
