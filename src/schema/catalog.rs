/// Scenario catalog: read-only scene data loaded from per-act files.
use rustc_hash::FxHashSet;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use super::choice::{Choice, Scene, TraitWeight};
use super::traits::{TraitError, TraitRegistry};

pub const FIRST_ACT: u8 = 1;
pub const LAST_ACT: u8 = 3;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("scene '{scene_id}': {source}")]
    Trait {
        scene_id: String,
        #[source]
        source: TraitError,
    },
    #[error("duplicate scene id: {0}")]
    DuplicateScene(String),
    #[error("act {0} is outside 1..=3")]
    InvalidAct(u8),
    #[error("unsupported catalog file: {0}")]
    UnsupportedFormat(PathBuf),
}

// On-disk shapes. Trait labels arrive as free text and are canonicalized
// while converting into the typed scene model.

#[derive(Debug, Deserialize)]
struct RawAct {
    #[serde(default)]
    scenes: Vec<RawScene>,
}

#[derive(Debug, Deserialize)]
struct RawScene {
    scene_id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    choices: Vec<RawChoice>,
}

#[derive(Debug, Deserialize)]
struct RawChoice {
    choice_id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    primary_trait: Option<String>,
    #[serde(default)]
    primary_weight: Option<f64>,
    #[serde(default)]
    secondary_trait: Option<String>,
    #[serde(default)]
    secondary_weight: Option<f64>,
}

fn tag_slot(
    registry: &TraitRegistry,
    scene_id: &str,
    label: Option<String>,
    weight: Option<f64>,
) -> Result<Option<TraitWeight>, CatalogError> {
    let Some(label) = label.filter(|l| !l.is_empty()) else {
        return Ok(None);
    };
    let trait_id = registry
        .canonicalize(&label)
        .map_err(|source| CatalogError::Trait {
            scene_id: scene_id.to_string(),
            source,
        })?;
    Ok(Some(TraitWeight::new(trait_id, weight.unwrap_or(0.0))))
}

fn convert_act(act: u8, raw: RawAct, registry: &TraitRegistry) -> Result<Vec<Scene>, CatalogError> {
    if !(FIRST_ACT..=LAST_ACT).contains(&act) {
        return Err(CatalogError::InvalidAct(act));
    }
    let mut scenes = Vec::with_capacity(raw.scenes.len());
    for raw_scene in raw.scenes {
        let mut choices = Vec::with_capacity(raw_scene.choices.len());
        for c in raw_scene.choices {
            choices.push(Choice {
                primary: tag_slot(registry, &raw_scene.scene_id, c.primary_trait, c.primary_weight)?,
                secondary: tag_slot(
                    registry,
                    &raw_scene.scene_id,
                    c.secondary_trait,
                    c.secondary_weight,
                )?,
                choice_id: c.choice_id,
                text: c.text,
            });
        }
        scenes.push(Scene {
            scene_id: raw_scene.scene_id,
            act,
            text: raw_scene.text,
            choices,
        });
    }
    Ok(scenes)
}

/// Ordered scenes across all acts. Iteration order is play order.
#[derive(Debug, Clone, Default)]
pub struct ScenarioCatalog {
    scenes: Vec<Scene>,
}

impl ScenarioCatalog {
    /// Build a catalog from already-typed scenes, checking id uniqueness
    /// and act range.
    pub fn from_scenes(scenes: Vec<Scene>) -> Result<Self, CatalogError> {
        let mut catalog = Self::default();
        catalog.extend(scenes)?;
        Ok(catalog)
    }

    /// Parse one act from a JSON string (`{"scenes": [...]}`).
    pub fn parse_json(
        act: u8,
        input: &str,
        registry: &TraitRegistry,
    ) -> Result<Vec<Scene>, CatalogError> {
        let raw: RawAct = serde_json::from_str(input)?;
        convert_act(act, raw, registry)
    }

    /// Parse one act from a RON string (`(scenes: [...])`).
    pub fn parse_ron(
        act: u8,
        input: &str,
        registry: &TraitRegistry,
    ) -> Result<Vec<Scene>, CatalogError> {
        let raw: RawAct = ron::from_str(input)?;
        convert_act(act, raw, registry)
    }

    /// Load one act file, picking the format from the extension.
    pub fn load_act(
        act: u8,
        path: &Path,
        registry: &TraitRegistry,
    ) -> Result<Vec<Scene>, CatalogError> {
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => Self::parse_json(act, &contents, registry),
            Some("ron") => Self::parse_ron(act, &contents, registry),
            _ => Err(CatalogError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    /// Load every `act<N>*.json` / `act<N>*.ron` file in `dir`, acts in
    /// order and files sorted by name within an act. Missing acts are skipped.
    pub fn load_dir(dir: &Path, registry: &TraitRegistry) -> Result<Self, CatalogError> {
        let mut files: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let ext = path.extension().and_then(|s| s.to_str());
            if path.is_file() && matches!(ext, Some("json") | Some("ron")) {
                files.push(path);
            }
        }
        files.sort();

        let mut catalog = Self::default();
        for act in FIRST_ACT..=LAST_ACT {
            let prefix = format!("act{}", act);
            for path in &files {
                let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
                if name.starts_with(&prefix) {
                    let scenes = Self::load_act(act, path, registry)?;
                    debug!(act, file = %path.display(), scenes = scenes.len(), "loaded act file");
                    catalog.extend(scenes)?;
                }
            }
        }
        Ok(catalog)
    }

    /// Append scenes after the existing ones.
    pub fn extend(&mut self, scenes: Vec<Scene>) -> Result<(), CatalogError> {
        let mut seen: FxHashSet<String> =
            self.scenes.iter().map(|s| s.scene_id.clone()).collect();
        for scene in &scenes {
            if !(FIRST_ACT..=LAST_ACT).contains(&scene.act) {
                return Err(CatalogError::InvalidAct(scene.act));
            }
            if !seen.insert(scene.scene_id.clone()) {
                return Err(CatalogError::DuplicateScene(scene.scene_id.clone()));
            }
        }
        self.scenes.extend(scenes);
        Ok(())
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn scene(&self, scene_id: &str) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.scene_id == scene_id)
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}
