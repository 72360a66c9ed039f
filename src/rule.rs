//! Causal rules: "if an entity like P undergoes action A, attribute X is V".
//!
//! Rules are immutable once created. A correction never edits a rule; it
//! creates a new belief around a new rule and links the two.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::pattern::{ActionPattern, EntityPattern, Specificity};
use crate::schema::{Action, AttributeKey};
use crate::value::Value;

/// Stable hash of a rule's canonical text, used for duplicate detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleFingerprint(#[serde(with = "hex_bytes")] [u8; 32]);

impl RuleFingerprint {
    /// The first six bytes in hex, for logs.
    #[must_use]
    pub fn short(&self) -> String {
        self.0[..6].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for RuleFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        let text: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        s.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(d)?;
        if text.len() != 64 || !text.is_ascii() {
            return Err(serde::de::Error::custom("fingerprint must be 64 hex characters"));
        }
        let mut out = [0u8; 32];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = u8::from_str_radix(&text[i * 2..i * 2 + 2], 16)
                .map_err(serde::de::Error::custom)?;
        }
        Ok(out)
    }
}

/// The condition under which a rule applies.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Precondition {
    /// Which entities the rule applies to.
    pub pattern: EntityPattern,
    /// Which actions the rule applies to.
    #[serde(default)]
    pub action: ActionPattern,
}

/// The attribute value a rule predicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    /// The attribute the rule speaks about.
    pub attribute: AttributeKey,
    /// Its predicted value.
    pub value: Value,
}

impl Effect {
    /// Creates a checked effect.
    pub fn new(attribute: AttributeKey, value: impl Into<Value>) -> Result<Self, ValidationError> {
        let value = value.into();
        attribute.check(&value)?;
        Ok(Self { attribute, value })
    }

    /// The outcome this effect predicts when `action` is performed.
    ///
    /// Dispositions manifest with the same truth value as their outcome
    /// (brittle <-> shatters).
    #[must_use]
    pub fn observable(&self, action: Action) -> Option<Effect> {
        self.attribute.manifestation(action).map(|attribute| Effect {
            attribute,
            value: self.value.clone(),
        })
    }

    /// Rewrites an observed outcome back into this effect's attribute.
    ///
    /// This is how a falsified rule learns its corrected effect.
    #[must_use]
    pub fn from_observation(&self, action: Action, observed: &Value) -> Option<Effect> {
        self.attribute.manifestation(action).map(|_| Effect {
            attribute: self.attribute,
            value: observed.clone(),
        })
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.attribute, self.value)
    }
}

/// A causal rule: precondition plus effect.
///
/// # Examples
///
/// ```
/// use groundwork::{Action, AttributeKey, CausalRule, Effect, EntityPattern};
///
/// let rule = CausalRule::new(
///     EntityPattern::entity("rubber_ball"),
///     Action::Drop.into(),
///     Effect::new(AttributeKey::IsBrittle, true).unwrap(),
/// );
/// assert_eq!(rule.probe_action(), Some(Action::Drop));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalRule {
    /// When the rule applies.
    pub precondition: Precondition,
    /// What it predicts.
    pub effect: Effect,
}

impl CausalRule {
    /// A rule from its parts.
    #[must_use]
    pub fn new(pattern: EntityPattern, action: ActionPattern, effect: Effect) -> Self {
        Self {
            precondition: Precondition { pattern, action },
            effect,
        }
    }

    /// Returns the same precondition with a different effect.
    #[must_use]
    pub fn with_effect(&self, effect: Effect) -> Self {
        Self {
            precondition: self.precondition.clone(),
            effect,
        }
    }

    /// Re-checks every embedded value against the schema.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.effect.attribute.check(&self.effect.value)?;
        for (key, value) in &self.precondition.pattern.attributes {
            key.check(value)?;
        }
        Ok(())
    }

    /// Canonical text, stable across runs.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!(
            "{} | {} => {}={}",
            self.precondition.pattern.canonical(),
            self.precondition.action,
            self.effect.attribute,
            self.effect.value.canonical()
        )
    }

    /// `blake3` hash of the canonical text.
    #[must_use]
    pub fn fingerprint(&self) -> RuleFingerprint {
        RuleFingerprint(*blake3::hash(self.canonical().as_bytes()).as_bytes())
    }

    /// Identity of the (entity-pattern, attribute) pair this rule speaks for.
    #[must_use]
    pub fn pair(&self) -> PairKey {
        PairKey {
            pattern: self.precondition.pattern.canonical(),
            attribute: self.effect.attribute,
        }
    }

    /// The rule's rank when competing with others for one outcome.
    #[must_use]
    pub fn specificity(&self) -> Specificity {
        Specificity {
            exact_action: self.precondition.action.as_action().is_some(),
            ..self.precondition.pattern.specificity()
        }
    }

    /// Whether this rule speaks about `action` and the effect is observable under it.
    #[must_use]
    pub fn applies_to(&self, action: Action) -> bool {
        self.precondition.action.matches(action) && self.effect.observable(action).is_some()
    }

    /// The action used to build the minimal test scenario.
    #[must_use]
    pub fn probe_action(&self) -> Option<Action> {
        match self.precondition.action.as_action() {
            Some(action) => self.effect.observable(action).map(|_| action),
            None => self.effect.attribute.probe_action(),
        }
    }
}

impl fmt::Display for CausalRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}) => {}",
            self.precondition.action, self.precondition.pattern, self.effect
        )
    }
}

/// The (entity-pattern, attribute) pair at most one active belief speaks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    /// Canonical pattern text.
    pub pattern: String,
    /// The attribute.
    pub attribute: AttributeKey,
}

impl PairKey {
    /// The pair a rule with this pattern and effect attribute speaks for.
    #[must_use]
    pub fn new(pattern: &EntityPattern, attribute: AttributeKey) -> Self {
        Self {
            pattern: pattern.canonical(),
            attribute,
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.pattern, self.attribute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brittle_ball() -> CausalRule {
        CausalRule::new(
            EntityPattern::entity("rubber_ball"),
            ActionPattern::Any,
            Effect::new(AttributeKey::IsBrittle, true).unwrap(),
        )
    }

    #[test]
    fn test_effect_rejects_wrong_kind() {
        assert!(Effect::new(AttributeKey::IsBrittle, 0.5).is_err());
    }

    #[test]
    fn test_fingerprint_distinguishes_effects() {
        let a = brittle_ball();
        let b = a.with_effect(Effect::new(AttributeKey::IsBrittle, false).unwrap());
        assert_eq!(a.fingerprint(), brittle_ball().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.pair(), b.pair());
    }

    #[test]
    fn test_fingerprint_serde_roundtrip() {
        let fp = brittle_ball().fingerprint();
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json.len(), 66);
        let back: RuleFingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(fp, back);
        assert_eq!(fp.short().len(), 12);
    }

    #[test]
    fn test_observable_and_back() {
        let rule = brittle_ball();
        let observable = rule.effect.observable(Action::Drop).unwrap();
        assert_eq!(observable.attribute, AttributeKey::Shatters);
        assert_eq!(observable.value, Value::Bool(true));

        let corrected = rule
            .effect
            .from_observation(Action::Drop, &Value::Bool(false))
            .unwrap();
        assert_eq!(corrected, Effect::new(AttributeKey::IsBrittle, false).unwrap());
    }

    #[test]
    fn test_probe_action() {
        assert_eq!(brittle_ball().probe_action(), Some(Action::Drop));

        let strike = CausalRule::new(
            EntityPattern::any(),
            Action::Strike.into(),
            Effect::new(AttributeKey::IsBrittle, true).unwrap(),
        );
        assert_eq!(strike.probe_action(), Some(Action::Strike));

        let untestable = CausalRule::new(
            EntityPattern::any(),
            Action::Submerge.into(),
            Effect::new(AttributeKey::IsBrittle, true).unwrap(),
        );
        assert_eq!(untestable.probe_action(), None);

        let intrinsic = CausalRule::new(
            EntityPattern::any(),
            ActionPattern::Any,
            Effect::new(AttributeKey::Material, "glass").unwrap(),
        );
        assert_eq!(intrinsic.probe_action(), None);
    }

    #[test]
    fn test_specificity_counts_exact_action() {
        let any = brittle_ball();
        let exact = CausalRule::new(
            EntityPattern::entity("rubber_ball"),
            Action::Drop.into(),
            Effect::new(AttributeKey::IsBrittle, true).unwrap(),
        );
        assert!(exact.specificity() > any.specificity());
    }
}
