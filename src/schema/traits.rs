/// Trait taxonomy and label canonicalization.
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TraitError {
    #[error("unknown trait: {0}")]
    Unknown(String),
}

/// The closed set of personality traits a choice can weigh on.
///
/// Declaration order is the order totals are reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Trait {
    Hubris,
    Avarice,
    Deception,
    Control,
    Wrath,
    Fear,
    Impulsivity,
    Envy,
    Apathy,
    Cynicism,
    Moodiness,
    Rigidity,
}

impl Trait {
    pub const ALL: [Trait; 12] = [
        Trait::Hubris,
        Trait::Avarice,
        Trait::Deception,
        Trait::Control,
        Trait::Wrath,
        Trait::Fear,
        Trait::Impulsivity,
        Trait::Envy,
        Trait::Apathy,
        Trait::Cynicism,
        Trait::Moodiness,
        Trait::Rigidity,
    ];

    /// Canonical display name, e.g. "Control".
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hubris => "Hubris",
            Self::Avarice => "Avarice",
            Self::Deception => "Deception",
            Self::Control => "Control",
            Self::Wrath => "Wrath",
            Self::Fear => "Fear",
            Self::Impulsivity => "Impulsivity",
            Self::Envy => "Envy",
            Self::Apathy => "Apathy",
            Self::Cynicism => "Cynicism",
            Self::Moodiness => "Moodiness",
            Self::Rigidity => "Rigidity",
        }
    }

    /// Returns a map holding every trait at 0.0.
    pub fn zeroed() -> BTreeMap<Trait, f64> {
        Self::ALL.iter().map(|t| (*t, 0.0)).collect()
    }
}

impl fmt::Display for Trait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Legacy labels still found in older scene files.
const LEGACY_ALIASES: &[(&str, Trait)] = &[
    ("Control & Perfectionism", Trait::Control),
    ("Apathy & Sloth", Trait::Apathy),
    ("Pessimism & Cynicism", Trait::Cynicism),
    ("Moodiness & Indirectness", Trait::Moodiness),
    ("Fear & Insecurity", Trait::Fear),
];

/// Resolves raw trait labels to canonical [`Trait`] values.
///
/// Lookups are exact and case-sensitive. Anything not registered is
/// rejected rather than passed through.
#[derive(Debug, Clone)]
pub struct TraitRegistry {
    labels: FxHashMap<String, Trait>,
}

impl Default for TraitRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl TraitRegistry {
    /// A registry that knows only the canonical names.
    pub fn canonical_only() -> Self {
        let labels = Trait::ALL
            .iter()
            .map(|t| (t.name().to_string(), *t))
            .collect();
        Self { labels }
    }

    /// Canonical names plus the legacy alias table.
    pub fn standard() -> Self {
        let mut registry = Self::canonical_only();
        for (label, canonical) in LEGACY_ALIASES {
            registry.labels.insert(label.to_string(), *canonical);
        }
        registry
    }

    /// Register an extra alias. Later registrations override earlier ones.
    pub fn with_alias(mut self, label: &str, canonical: Trait) -> Self {
        self.labels.insert(label.to_string(), canonical);
        self
    }

    pub fn canonicalize(&self, label: &str) -> Result<Trait, TraitError> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| TraitError::Unknown(label.to_string()))
    }

    /// Canonicalize every key, summing values whose labels collapse onto
    /// the same trait.
    pub fn normalize_traits<I, S>(&self, mapping: I) -> Result<BTreeMap<Trait, f64>, TraitError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        let mut result = BTreeMap::new();
        for (label, value) in mapping {
            let canonical = self.canonicalize(label.as_ref())?;
            *result.entry(canonical).or_insert(0.0) += value;
        }
        Ok(result)
    }
}

/// Orders `(trait, score)` pairs by score descending, then by name.
pub(crate) fn rank_desc<'a, I>(scores: I) -> Vec<(Trait, f64)>
where
    I: IntoIterator<Item = (&'a Trait, &'a f64)>,
{
    let mut ranked: Vec<(Trait, f64)> = scores.into_iter().map(|(t, v)| (*t, *v)).collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.name().cmp(b.0.name()))
    });
    ranked
}
