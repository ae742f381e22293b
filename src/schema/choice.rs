/// Scene and choice records, tag weights, and the validated choice effect.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::traits::Trait;

/// Weight at or above which a choice counts as a major beat.
pub const MAJOR_WEIGHT: f64 = 0.8;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EffectError {
    #[error("choice has no primary trait")]
    MissingPrimary,
    #[error("secondary weight {secondary} exceeds primary weight {primary}")]
    WeightOrder { primary: f64, secondary: f64 },
}

/// A single trait/weight pairing carried by a choice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraitWeight {
    pub trait_id: Trait,
    pub weight: f64,
}

impl TraitWeight {
    pub fn new(trait_id: Trait, weight: f64) -> Self {
        Self { trait_id, weight }
    }
}

/// What picking a choice does to the trait totals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Effect {
    None,
    Single(TraitWeight),
    Dual {
        primary: TraitWeight,
        secondary: TraitWeight,
    },
}

impl Effect {
    /// Builds a two-trait effect. The secondary may never outweigh the primary.
    pub fn dual(primary: TraitWeight, secondary: TraitWeight) -> Result<Self, EffectError> {
        if secondary.weight > primary.weight {
            return Err(EffectError::WeightOrder {
                primary: primary.weight,
                secondary: secondary.weight,
            });
        }
        Ok(Self::Dual { primary, secondary })
    }

    /// Builds an effect from optional tag slots as they appear in scene data.
    pub fn from_tags(
        primary: Option<TraitWeight>,
        secondary: Option<TraitWeight>,
    ) -> Result<Self, EffectError> {
        match (primary, secondary) {
            (None, None) => Ok(Self::None),
            (None, Some(_)) => Err(EffectError::MissingPrimary),
            (Some(p), None) => Ok(Self::Single(p)),
            (Some(p), Some(s)) => Self::dual(p, s),
        }
    }

    pub fn primary(&self) -> Option<TraitWeight> {
        match self {
            Self::None => None,
            Self::Single(p) => Some(*p),
            Self::Dual { primary, .. } => Some(*primary),
        }
    }

    pub fn secondary(&self) -> Option<TraitWeight> {
        match self {
            Self::Dual { secondary, .. } => Some(*secondary),
            _ => None,
        }
    }

    /// Trait/weight pairs with a positive weight, primary first.
    pub fn contributions(&self) -> Vec<TraitWeight> {
        self.primary()
            .into_iter()
            .chain(self.secondary())
            .filter(|tw| tw.weight > 0.0)
            .collect()
    }
}

/// A choice as authored in the scenario catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub choice_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub primary: Option<TraitWeight>,
    #[serde(default)]
    pub secondary: Option<TraitWeight>,
}

impl Choice {
    pub fn effect(&self) -> Result<Effect, EffectError> {
        Effect::from_tags(self.primary, self.secondary)
    }
}

/// A scene: one decision point inside an act.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub scene_id: String,
    pub act: u8,
    #[serde(default)]
    pub text: String,
    pub choices: Vec<Choice>,
}

/// The decision-facing projection of a [`Choice`] handed to policies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChoiceOption {
    pub choice_id: String,
    pub scene_id: String,
    pub text: String,
    pub primary: Option<TraitWeight>,
    pub secondary: Option<TraitWeight>,
    pub is_decoy: bool,
}

impl ChoiceOption {
    pub fn project(scene: &Scene, choice: &Choice) -> Self {
        let mut option = Self {
            choice_id: choice.choice_id.clone(),
            scene_id: scene.scene_id.clone(),
            text: choice.text.clone(),
            primary: choice.primary,
            secondary: choice.secondary,
            is_decoy: false,
        };
        option.is_decoy = option.primary_weight() == 0.0 && option.secondary_weight() == 0.0;
        option
    }

    pub fn primary_weight(&self) -> f64 {
        self.primary.map_or(0.0, |tw| tw.weight)
    }

    pub fn secondary_weight(&self) -> f64 {
        self.secondary.map_or(0.0, |tw| tw.weight)
    }

    /// Either weight at or above [`MAJOR_WEIGHT`].
    pub fn is_major(&self) -> bool {
        self.primary_weight() >= MAJOR_WEIGHT || self.secondary_weight() >= MAJOR_WEIGHT
    }

    pub fn effect(&self) -> Result<Effect, EffectError> {
        Effect::from_tags(self.primary, self.secondary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tw(t: Trait, w: f64) -> TraitWeight {
        TraitWeight::new(t, w)
    }

    #[test]
    fn dual_rejects_inverted_weights() {
        let err = Effect::dual(tw(Trait::Hubris, 0.3), tw(Trait::Fear, 0.5)).unwrap_err();
        assert_eq!(
            err,
            EffectError::WeightOrder {
                primary: 0.3,
                secondary: 0.5
            }
        );
    }

    #[test]
    fn dual_accepts_equal_weights() {
        assert!(Effect::dual(tw(Trait::Hubris, 0.4), tw(Trait::Fear, 0.4)).is_ok());
    }

    #[test]
    fn from_tags_variants() {
        assert_eq!(Effect::from_tags(None, None), Ok(Effect::None));
        assert_eq!(
            Effect::from_tags(None, Some(tw(Trait::Envy, 0.1))),
            Err(EffectError::MissingPrimary)
        );
        assert_eq!(
            Effect::from_tags(Some(tw(Trait::Envy, 0.3)), None),
            Ok(Effect::Single(tw(Trait::Envy, 0.3)))
        );
    }

    #[test]
    fn contributions_skip_zero_weights() {
        let effect = Effect::dual(tw(Trait::Wrath, 0.5), tw(Trait::Fear, 0.0)).unwrap();
        assert_eq!(effect.contributions(), vec![tw(Trait::Wrath, 0.5)]);
    }

    fn scene_with(choice: Choice) -> Scene {
        Scene {
            scene_id: "s1".to_string(),
            act: 1,
            text: String::new(),
            choices: vec![choice],
        }
    }

    #[test]
    fn projection_marks_decoys() {
        let choice = Choice {
            choice_id: "c1".to_string(),
            text: "Look away".to_string(),
            primary: Some(tw(Trait::Apathy, 0.0)),
            secondary: None,
        };
        let scene = scene_with(choice.clone());
        let option = ChoiceOption::project(&scene, &choice);
        assert!(option.is_decoy);
        assert!(!option.is_major());
        assert_eq!(option.scene_id, "s1");
    }

    #[test]
    fn projection_detects_majors() {
        let choice = Choice {
            choice_id: "c2".to_string(),
            text: String::new(),
            primary: Some(tw(Trait::Hubris, 0.8)),
            secondary: Some(tw(Trait::Control, 0.2)),
        };
        let scene = scene_with(choice.clone());
        let option = ChoiceOption::project(&scene, &choice);
        assert!(option.is_major());
        assert!(!option.is_decoy);
    }
}
