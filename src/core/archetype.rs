/// Archetype resolution from a final trait-score vector.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::schema::traits::{rank_desc, Trait, TraitError, TraitRegistry};

#[derive(Debug, Error)]
pub enum ArchetypeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("trait error: {0}")]
    Trait(#[from] TraitError),
}

/// A named outcome with its one-line description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archetype {
    pub name: String,
    pub description: String,
}

impl Archetype {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
        }
    }

    /// Identifier form of the name: "The Collector" -> "the_collector".
    pub fn id(&self) -> String {
        self.name
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// Combo keys are stored with the two traits in alphabetical order.
fn pair_key(a: Trait, b: Trait) -> (Trait, Trait) {
    if a.name() <= b.name() {
        (a, b)
    } else {
        (b, a)
    }
}

/// Lookup tables for archetype resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchetypeTable {
    combos: BTreeMap<(Trait, Trait), Archetype>,
    singles: BTreeMap<Trait, Archetype>,
    default: Archetype,
}

impl Default for ArchetypeTable {
    fn default() -> Self {
        let singles = BTreeMap::from([
            (
                Trait::Hubris,
                Archetype::new("The Ascendant", "soaring ever higher beyond all limits."),
            ),
            (
                Trait::Avarice,
                Archetype::new("The Collector", "gathering all that glitters into your grasp."),
            ),
            (
                Trait::Deception,
                Archetype::new("The Maskbearer", "hiding truths behind careful facades."),
            ),
            (
                Trait::Control,
                Archetype::new("The Architect", "shaping every path to your design."),
            ),
            (
                Trait::Wrath,
                Archetype::new("The Flame", "letting fury blaze at every turn."),
            ),
            (
                Trait::Fear,
                Archetype::new("The Shade", "moving with caution in the looming dark."),
            ),
        ]);

        let mut table = Self {
            combos: BTreeMap::new(),
            singles,
            default: Archetype::new("The Enigma", "leaving little of yourself revealed."),
        };
        table.insert_combo(
            Trait::Avarice,
            Trait::Deception,
            Archetype::new("The Broker", "trading in half-truths and always collecting."),
        );
        table.insert_combo(
            Trait::Control,
            Trait::Fear,
            Archetype::new("The Warden", "locking every door, then checking the locks again."),
        );
        table.insert_combo(
            Trait::Hubris,
            Trait::Control,
            Archetype::new("The Sovereign", "bending the world into a throne of your own making."),
        );
        table.insert_combo(
            Trait::Impulsivity,
            Trait::Wrath,
            Archetype::new("The Wildfire", "burning through every moment before it can cool."),
        );
        table
    }
}

// RON shape of an archetype table; trait labels are free text.

#[derive(Debug, Deserialize)]
struct RonCombo {
    traits: (String, String),
    name: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct RonTable {
    default: Archetype,
    #[serde(default)]
    singles: BTreeMap<String, Archetype>,
    #[serde(default)]
    combos: Vec<RonCombo>,
}

impl ArchetypeTable {
    /// A table with no entries; everything resolves to `default`.
    pub fn empty(default: Archetype) -> Self {
        Self {
            combos: BTreeMap::new(),
            singles: BTreeMap::new(),
            default,
        }
    }

    pub fn insert_combo(&mut self, a: Trait, b: Trait, archetype: Archetype) {
        self.combos.insert(pair_key(a, b), archetype);
    }

    pub fn insert_single(&mut self, t: Trait, archetype: Archetype) {
        self.singles.insert(t, archetype);
    }

    pub fn default_archetype(&self) -> &Archetype {
        &self.default
    }

    pub fn load_from_ron(path: &Path, registry: &TraitRegistry) -> Result<Self, ArchetypeError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents, registry)
    }

    pub fn parse_ron(input: &str, registry: &TraitRegistry) -> Result<Self, ArchetypeError> {
        let raw: RonTable = ron::from_str(input)?;
        let mut table = Self::empty(raw.default);
        for (label, archetype) in raw.singles {
            table.insert_single(registry.canonicalize(&label)?, archetype);
        }
        for combo in raw.combos {
            let a = registry.canonicalize(&combo.traits.0)?;
            let b = registry.canonicalize(&combo.traits.1)?;
            table.insert_combo(a, b, Archetype::new(&combo.name, &combo.description));
        }
        Ok(table)
    }

    /// Resolve the archetype for `scores`.
    ///
    /// The top two traits (score descending, name ascending on ties) are
    /// tried as a combo first, then the top trait alone, then the default.
    pub fn resolve(&self, scores: &BTreeMap<Trait, f64>) -> &Archetype {
        let ranked = rank_desc(scores);
        let Some((top, _)) = ranked.first().copied() else {
            return &self.default;
        };

        if let Some((second, _)) = ranked.get(1).copied() {
            if let Some(combo) = self.combos.get(&pair_key(top, second)) {
                return combo;
            }
        }

        self.singles.get(&top).unwrap_or(&self.default)
    }
}
