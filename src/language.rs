//! Cultural learning: turning text into candidate beliefs.
//!
//! A [`LanguageInterface`] only proposes. Proposals are checked at the
//! boundary ([`Proposal::to_rule`]) and enter the store unverified; the
//! reality filter decides what they are worth.

use regex::Regex;
use tracing::trace;

use crate::confidence::Confidence;
use crate::error::{GroundError, GroundResult, ValidationError};
use crate::pattern::{ActionPattern, EntityPattern};
use crate::rule::{CausalRule, Effect};
use crate::schema::{AttributeKey, MATERIALS};
use crate::value::Value;

/// A candidate belief as proposed by a language interface.
///
/// Fields are optional because proposers are not trusted to fill them;
/// missing ones are rejected when the proposal is converted.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    /// Who the belief is about.
    pub pattern: Option<EntityPattern>,
    /// Which actions it covers.
    pub action: ActionPattern,
    /// The claimed attribute.
    pub attribute: Option<AttributeKey>,
    /// The claimed value.
    pub value: Option<Value>,
    /// Suggested initial confidence.
    pub confidence_hint: f32,
    /// Document or corpus the proposal came from.
    pub source: String,
    /// The sentence the proposal was read from.
    pub snippet: String,
}

impl Proposal {
    /// A fully populated proposal.
    #[must_use]
    pub fn new(
        pattern: EntityPattern,
        attribute: AttributeKey,
        value: impl Into<Value>,
        confidence_hint: f32,
        snippet: impl Into<String>,
    ) -> Self {
        Self {
            pattern: Some(pattern),
            action: ActionPattern::Any,
            attribute: Some(attribute),
            value: Some(value.into()),
            confidence_hint,
            source: String::new(),
            snippet: snippet.into(),
        }
    }

    /// Sets the source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Converts the proposal into a checked rule.
    ///
    /// # Errors
    ///
    /// `MissingField` when the pattern or the effect is missing, and the
    /// usual schema errors when the effect does not type-check.
    pub fn to_rule(&self) -> Result<CausalRule, ValidationError> {
        let pattern = self.pattern.clone().ok_or(ValidationError::MissingField {
            field: "pattern".to_string(),
        })?;
        let (Some(attribute), Some(value)) = (self.attribute, self.value.clone()) else {
            return Err(ValidationError::MissingField {
                field: "effect".to_string(),
            });
        };
        let rule = CausalRule::new(pattern, self.action, Effect::new(attribute, value)?);
        rule.validate()?;
        Ok(rule)
    }

    /// The hint as a checked confidence.
    pub fn confidence(&self) -> Result<Confidence, ValidationError> {
        Confidence::new(self.confidence_hint)
    }
}

/// Proposes candidate beliefs from documents.
pub trait LanguageInterface: Send + Sync {
    /// Extracts candidate beliefs from `document`.
    fn propose_beliefs(&self, document: &str) -> GroundResult<Vec<Proposal>>;
}

const DISPOSITION: &str = r"(?i)^(?:an?\s+|the\s+)?(?P<subject>[a-z][a-z _-]*?)\s+(?P<copula>is|are)\s+(?P<neg>not\s+)?(?P<word>brittle|fragile|elastic|bouncy|buoyant|hard)$";
const OUTCOME: &str = r"(?i)^(?:an?\s+|the\s+)?(?P<subject>[a-z][a-z _-]*?)\s+(?P<neg>(?:does|do)\s+not\s+|never\s+)?(?P<word>shatters?|bounces?|floats?)(?:\s+when\s+\w+(?:\s+\w+)*)?$";

/// Reference proposer built on a small phrasebook.
///
/// Recognises sentences such as "Porcelain dolls are brittle", "A rubber
/// ball is not brittle" and "Wood floats". The subject becomes an entity
/// pattern; a leading material word ("glass bottle") becomes a material
/// constraint on it.
#[derive(Debug, Clone)]
pub struct PhrasebookInterface {
    disposition: Regex,
    outcome: Regex,
    confidence_hint: f32,
    source: String,
}

impl PhrasebookInterface {
    /// Compiles the phrasebook. Proposals are attributed to `source`.
    pub fn new(source: impl Into<String>) -> GroundResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| GroundError::internal(format!("invalid phrasebook pattern: {e}")))
        };
        Ok(Self {
            disposition: compile(DISPOSITION)?,
            outcome: compile(OUTCOME)?,
            confidence_hint: 0.6,
            source: source.into(),
        })
    }

    /// Sets the confidence hint given to every proposal.
    #[must_use]
    pub fn with_confidence_hint(mut self, hint: f32) -> Self {
        self.confidence_hint = hint;
        self
    }

    fn propose_sentence(&self, sentence: &str) -> Option<Proposal> {
        let (caps, plural) = if let Some(caps) = self.disposition.captures(sentence) {
            let plural = caps
                .name("copula")
                .is_some_and(|m| m.as_str().eq_ignore_ascii_case("are"));
            (caps, plural)
        } else {
            let caps = self.outcome.captures(sentence)?;
            let word = caps.name("word")?.as_str().to_ascii_lowercase();
            (caps, !word.ends_with('s'))
        };

        let attribute = match caps.name("word")?.as_str().to_ascii_lowercase().as_str() {
            "brittle" | "fragile" => AttributeKey::IsBrittle,
            "elastic" | "bouncy" => AttributeKey::IsElastic,
            "buoyant" => AttributeKey::IsBuoyant,
            "hard" => AttributeKey::IsHard,
            "shatter" | "shatters" => AttributeKey::Shatters,
            "bounce" | "bounces" => AttributeKey::Bounces,
            "float" | "floats" => AttributeKey::Floats,
            _ => return None,
        };
        let value = caps.name("neg").is_none();
        let subject = subject_name(caps.name("subject")?.as_str(), plural);
        if subject.is_empty() {
            return None;
        }

        let mut pattern = EntityPattern::entity(&subject);
        let first = subject.split('_').next().unwrap_or_default();
        if MATERIALS.contains(&first) {
            pattern = pattern
                .with_attribute(AttributeKey::Material, Value::symbol(first))
                .ok()?;
        }

        trace!(%sentence, %subject, %attribute, value, "phrase matched");
        Some(
            Proposal::new(pattern, attribute, value, self.confidence_hint, sentence)
                .with_source(self.source.clone()),
        )
    }
}

impl LanguageInterface for PhrasebookInterface {
    fn propose_beliefs(&self, document: &str) -> GroundResult<Vec<Proposal>> {
        Ok(document
            .split(['.', '!', '?', ';', '\n'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| self.propose_sentence(s))
            .collect())
    }
}

/// Canonical entity name for a subject phrase, singularising the last
/// word of plural subjects.
fn subject_name(raw: &str, plural: bool) -> String {
    let mut words: Vec<String> = raw
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();
    if plural {
        if let Some(last) = words.last_mut() {
            *last = singular(last);
        }
    }
    words.join("_")
}

fn singular(word: &str) -> String {
    for suffix in ["sses", "shes", "ches", "xes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if let Some(stem) = word.strip_suffix("ies") {
        return format!("{stem}y");
    }
    match word.strip_suffix('s') {
        Some(stem) if !stem.is_empty() && !stem.ends_with('s') => stem.to_string(),
        _ => word.to_string(),
    }
}
