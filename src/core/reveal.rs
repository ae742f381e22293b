/// Endgame reveals: template parsing, loading, and selection.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::schema::traits::{rank_desc, Trait, TraitError, TraitRegistry};

#[derive(Debug, Error)]
pub enum RevealError {
    #[error("template parse error: {0}")]
    TemplateParse(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("trait error: {0}")]
    Trait(#[from] TraitError),
    #[error("unsupported reveal file: {0}")]
    UnsupportedFormat(String),
}

/// Value a template placeholder is filled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    PrimaryTrait,
    SecondaryTrait,
    PrimaryMetaphor,
    SecondaryMetaphor,
}

/// A segment of a parsed reveal template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplateSegment {
    /// Literal text, emitted as-is.
    Literal(String),
    /// `{primary_trait}`, `{secondary_metaphor}`, ...
    Placeholder(Slot),
}

/// A parsed template: a sequence of segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub segments: Vec<TemplateSegment>,
}

impl Template {
    /// Parse a template string.
    ///
    /// Syntax:
    /// - `{primary_trait}` / `{secondary_trait}` → trait names
    /// - `{primary_metaphor}` / `{secondary_metaphor}` → configured metaphors
    /// - `{{` / `}}` → literal braces
    /// - Everything else → `Literal`
    pub fn parse(input: &str) -> Result<Template, RevealError> {
        let mut segments = Vec::new();
        let mut literal_buf = String::new();
        let chars: Vec<char> = input.chars().collect();
        let len = chars.len();
        let mut i = 0;

        while i < len {
            if chars[i] == '{' {
                if i + 1 < len && chars[i + 1] == '{' {
                    literal_buf.push('{');
                    i += 2;
                    continue;
                }

                if !literal_buf.is_empty() {
                    segments.push(TemplateSegment::Literal(std::mem::take(&mut literal_buf)));
                }

                let start = i + 1;
                let mut end = start;
                while end < len && chars[end] != '}' {
                    if chars[end] == '{' {
                        return Err(RevealError::TemplateParse(
                            "nested braces are not allowed".to_string(),
                        ));
                    }
                    end += 1;
                }
                if end == len {
                    return Err(RevealError::TemplateParse("unclosed brace".to_string()));
                }

                let content: String = chars[start..end].iter().collect();
                segments.push(TemplateSegment::Placeholder(Self::parse_slot(&content)?));
                i = end + 1;
            } else if chars[i] == '}' {
                if i + 1 < len && chars[i + 1] == '}' {
                    literal_buf.push('}');
                    i += 2;
                    continue;
                }
                return Err(RevealError::TemplateParse(
                    "unmatched closing brace".to_string(),
                ));
            } else {
                literal_buf.push(chars[i]);
                i += 1;
            }
        }

        if !literal_buf.is_empty() {
            segments.push(TemplateSegment::Literal(literal_buf));
        }

        Ok(Template { segments })
    }

    fn parse_slot(content: &str) -> Result<Slot, RevealError> {
        match content {
            "primary_trait" => Ok(Slot::PrimaryTrait),
            "secondary_trait" => Ok(Slot::SecondaryTrait),
            "primary_metaphor" => Ok(Slot::PrimaryMetaphor),
            "secondary_metaphor" => Ok(Slot::SecondaryMetaphor),
            "" => Err(RevealError::TemplateParse("empty braces".to_string())),
            other => Err(RevealError::TemplateParse(format!(
                "unknown placeholder '{}'",
                other
            ))),
        }
    }

    fn render(&self, fill: impl Fn(Slot) -> String) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                TemplateSegment::Literal(text) => out.push_str(text),
                TemplateSegment::Placeholder(slot) => out.push_str(&fill(*slot)),
            }
        }
        out
    }
}

/// A reveal keyed by an ordered (primary, secondary) trait pair.
#[derive(Debug, Clone, PartialEq)]
pub struct RevealTemplate {
    pub id: String,
    pub primary: Trait,
    pub secondary: Trait,
    pub template: Template,
}

/// The selected reveal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reveal {
    pub id: String,
    pub text: String,
}

/// Fallback used on ties or when no template matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeutralFallback {
    pub id: String,
    pub template: String,
}

// File shape, shared by the JSON and RON loaders.

#[derive(Debug, Deserialize)]
struct RawTemplate {
    id: String,
    primary_trait: String,
    secondary_trait: String,
    template: String,
}

#[derive(Debug, Deserialize)]
struct RawReveals {
    #[serde(default)]
    reveal_templates: Vec<RawTemplate>,
    #[serde(default)]
    trait_metaphors: BTreeMap<String, String>,
    neutral_fallback: NeutralFallback,
}

/// Loaded reveal data.
#[derive(Debug, Clone, PartialEq)]
pub struct RevealTable {
    templates: Vec<RevealTemplate>,
    metaphors: BTreeMap<Trait, String>,
    fallback: NeutralFallback,
}

impl RevealTable {
    pub fn load(path: &Path, registry: &TraitRegistry) -> Result<Self, RevealError> {
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => Self::parse_json(&contents, registry),
            Some("ron") => Self::parse_ron(&contents, registry),
            _ => Err(RevealError::UnsupportedFormat(path.display().to_string())),
        }
    }

    pub fn parse_json(input: &str, registry: &TraitRegistry) -> Result<Self, RevealError> {
        let raw: RawReveals = serde_json::from_str(input)?;
        Self::from_raw(raw, registry)
    }

    pub fn parse_ron(input: &str, registry: &TraitRegistry) -> Result<Self, RevealError> {
        let raw: RawReveals = ron::from_str(input)?;
        Self::from_raw(raw, registry)
    }

    fn from_raw(raw: RawReveals, registry: &TraitRegistry) -> Result<Self, RevealError> {
        let mut templates = Vec::with_capacity(raw.reveal_templates.len());
        for tpl in raw.reveal_templates {
            templates.push(RevealTemplate {
                primary: registry.canonicalize(&tpl.primary_trait)?,
                secondary: registry.canonicalize(&tpl.secondary_trait)?,
                template: Template::parse(&tpl.template)?,
                id: tpl.id,
            });
        }
        let metaphors = raw
            .trait_metaphors
            .into_iter()
            .map(|(label, text)| Ok((registry.canonicalize(&label)?, text)))
            .collect::<Result<BTreeMap<_, _>, TraitError>>()?;
        Ok(Self {
            templates,
            metaphors,
            fallback: raw.neutral_fallback,
        })
    }

    pub fn fallback(&self) -> Reveal {
        Reveal {
            id: self.fallback.id.clone(),
            text: self.fallback.template.clone(),
        }
    }

    fn metaphor(&self, t: Trait) -> String {
        self.metaphors
            .get(&t)
            .cloned()
            .unwrap_or_else(|| t.name().to_string())
    }

    /// Pick a reveal for the top two nonzero traits of `scores`.
    ///
    /// Falls back to the neutral reveal when fewer than two traits scored,
    /// when the top two are exactly tied, or when no template matches the
    /// ordered pair.
    pub fn pick(&self, scores: &BTreeMap<Trait, f64>) -> Reveal {
        let ranked: Vec<(Trait, f64)> = rank_desc(scores)
            .into_iter()
            .filter(|(_, v)| *v > 0.0)
            .collect();
        let &[(primary, p_score), (secondary, s_score), ..] = ranked.as_slice() else {
            return self.fallback();
        };
        if p_score == s_score {
            return self.fallback();
        }

        let Some(tpl) = self
            .templates
            .iter()
            .find(|t| t.primary == primary && t.secondary == secondary)
        else {
            return self.fallback();
        };

        let text = tpl.template.render(|slot| match slot {
            Slot::PrimaryTrait => primary.name().to_string(),
            Slot::SecondaryTrait => secondary.name().to_string(),
            Slot::PrimaryMetaphor => self.metaphor(primary),
            Slot::SecondaryMetaphor => self.metaphor(secondary),
        });
        Reveal {
            id: tpl.id.clone(),
            text,
        }
    }
}
