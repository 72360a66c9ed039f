//! Hypotheses, sandbox outcomes and the validation audit trail.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::belief::BeliefId;
use crate::confidence::Confidence;
use crate::rule::Effect;
use crate::schema::{Action, AttributeKey, EntityKind};
use crate::value::Value;

/// Unique identifier for a validation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// A fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a hypothesis, linking it to its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HypothesisId(Uuid);

impl HypothesisId {
    /// A fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HypothesisId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HypothesisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The object an action is performed with, such as the hammer in a strike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Canonical name of the tool.
    pub entity: String,
    /// Intrinsic attributes of the tool.
    pub attributes: BTreeMap<AttributeKey, Value>,
}

impl Instrument {
    /// The value of one tool attribute, if given.
    #[must_use]
    pub fn attribute(&self, key: AttributeKey) -> Option<&Value> {
        self.attributes.get(&key)
    }

    /// The tool's material, if given.
    #[must_use]
    pub fn material(&self) -> Option<&str> {
        self.attribute(AttributeKey::Material).and_then(Value::as_symbol)
    }
}

/// A concrete situation handed to the sandbox: one entity, one action,
/// optionally performed with an instrument.
///
/// Only intrinsic attributes are included; dispositions are what the
/// sandbox is asked to reveal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Canonical name of the subject.
    pub entity: String,
    /// Kind of the subject.
    pub kind: EntityKind,
    /// Intrinsic attributes of the subject.
    pub attributes: BTreeMap<AttributeKey, Value>,
    /// What is done to the subject.
    pub action: Action,
    /// What the action is performed with, if anything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<Instrument>,
}

impl Scenario {
    /// Performs the action with `instrument`.
    #[must_use]
    pub fn with_instrument(mut self, instrument: Instrument) -> Self {
        self.instrument = Some(instrument);
        self
    }

    /// The value of one subject attribute, if given.
    #[must_use]
    pub fn attribute(&self, key: AttributeKey) -> Option<&Value> {
        self.attributes.get(&key)
    }

    /// The subject's material, if given.
    #[must_use]
    pub fn material(&self) -> Option<&str> {
        self.attribute(AttributeKey::Material).and_then(Value::as_symbol)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}", self.action, self.entity)?;
        for (key, value) in &self.attributes {
            write!(f, ", {key}={value}")?;
        }
        write!(f, ")")?;
        if let Some(tool) = &self.instrument {
            write!(f, " with {}", tool.entity)?;
        }
        Ok(())
    }
}

/// A belief bound to a scenario, awaiting a sandbox verdict.
///
/// Exists only for the duration of one validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    /// Unique identifier.
    pub id: HypothesisId,
    /// The belief under test.
    pub belief: BeliefId,
    /// The belief version the hypothesis was derived from.
    pub belief_version: u64,
    /// What the sandbox is asked to run.
    pub scenario: Scenario,
    /// The observable outcome the belief predicts for the scenario.
    pub predicted: Effect,
}

/// What the sandbox observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationOutcome {
    /// Observed outcome attributes.
    pub observations: BTreeMap<AttributeKey, Value>,
    /// Declared numeric tolerance of scalar observations.
    #[serde(default)]
    pub tolerance: f64,
    /// How much the sandbox trusts the observation.
    pub confidence: Confidence,
}

impl SimulationOutcome {
    /// An outcome with no observations yet.
    #[must_use]
    pub fn new(confidence: Confidence) -> Self {
        Self {
            observations: BTreeMap::new(),
            tolerance: 0.0,
            confidence,
        }
    }

    /// Adds one observation.
    #[must_use]
    pub fn observe(mut self, key: AttributeKey, value: impl Into<Value>) -> Self {
        self.observations.insert(key, value.into());
        self
    }

    /// Sets the declared tolerance. Negative values are taken by magnitude.
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance.abs();
        self
    }

    /// The observed value of `key`, if reported.
    #[must_use]
    pub fn get(&self, key: AttributeKey) -> Option<&Value> {
        self.observations.get(&key)
    }
}

/// Outcome of comparing a prediction with an observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// The observation matches the prediction.
    Confirmed,
    /// The observation contradicts the prediction.
    Falsified,
    /// No usable observation.
    Inconclusive {
        /// Why the sandbox gave no answer.
        reason: String,
    },
}

impl Verdict {
    /// An inconclusive verdict with its reason.
    #[must_use]
    pub fn inconclusive(reason: impl Into<String>) -> Self {
        Self::Inconclusive {
            reason: reason.into(),
        }
    }

    /// Returns true for confirmed and falsified verdicts.
    #[must_use]
    pub const fn is_conclusive(&self) -> bool {
        !matches!(self, Self::Inconclusive { .. })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirmed => write!(f, "confirmed"),
            Self::Falsified => write!(f, "falsified"),
            Self::Inconclusive { reason } => write!(f, "inconclusive({reason})"),
        }
    }
}

/// Append-only audit entry for one hypothesis test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    /// Unique identifier.
    pub id: RecordId,
    /// The hypothesis that was tested.
    pub hypothesis: HypothesisId,
    /// The belief under test.
    pub belief: BeliefId,
    /// What the sandbox ran.
    pub scenario: Scenario,
    /// The outcome the belief predicted.
    pub predicted: Effect,
    /// What the sandbox observed, if anything.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<Effect>,
    /// How the two compared.
    pub verdict: Verdict,
    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
}

impl ValidationRecord {
    /// Records the test of `hypothesis`.
    #[must_use]
    pub fn new(hypothesis: &Hypothesis, observed: Option<Effect>, verdict: Verdict) -> Self {
        Self {
            id: RecordId::new(),
            hypothesis: hypothesis.id,
            belief: hypothesis.belief,
            scenario: hypothesis.scenario.clone(),
            predicted: hypothesis.predicted.clone(),
            observed,
            verdict,
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> Scenario {
        let mut attributes = BTreeMap::new();
        attributes.insert(AttributeKey::Material, Value::symbol("rubber"));
        Scenario {
            entity: "rubber_ball".to_string(),
            kind: EntityKind::PhysicalObject,
            attributes,
            action: Action::Drop,
            instrument: None,
        }
    }

    #[test]
    fn test_scenario_display() {
        let s = scenario();
        assert_eq!(s.material(), Some("rubber"));
        assert_eq!(s.to_string(), "drop(rubber_ball, material=rubber)");

        let mut tool = BTreeMap::new();
        tool.insert(AttributeKey::Material, Value::symbol("metal"));
        let s = s.with_instrument(Instrument {
            entity: "hammer".to_string(),
            attributes: tool,
        });
        assert_eq!(s.instrument.as_ref().and_then(Instrument::material), Some("metal"));
        assert_eq!(s.to_string(), "drop(rubber_ball, material=rubber) with hammer");
    }

    #[test]
    fn test_scenario_without_instrument_omits_field() {
        let json = serde_json::to_string(&scenario()).unwrap();
        assert!(!json.contains("instrument"));
        let back: Scenario = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scenario());
    }

    #[test]
    fn test_outcome_builder() {
        let outcome = SimulationOutcome::new(Confidence::CERTAIN)
            .observe(AttributeKey::Shatters, false)
            .with_tolerance(-0.5);
        assert_eq!(outcome.get(AttributeKey::Shatters), Some(&Value::Bool(false)));
        assert!((outcome.tolerance - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_verdict_conclusive() {
        assert!(Verdict::Confirmed.is_conclusive());
        assert!(!Verdict::inconclusive("timeout").is_conclusive());
        assert_eq!(Verdict::inconclusive("timeout").to_string(), "inconclusive(timeout)");
    }

    #[test]
    fn test_record_serialization() {
        let hypothesis = Hypothesis {
            id: HypothesisId::new(),
            belief: BeliefId::new(),
            belief_version: 1,
            scenario: scenario(),
            predicted: Effect::new(AttributeKey::Shatters, true).unwrap(),
        };
        let record = ValidationRecord::new(
            &hypothesis,
            Some(Effect::new(AttributeKey::Shatters, false).unwrap()),
            Verdict::Falsified,
        );
        let json = serde_json::to_string(&record).unwrap();
        let back: ValidationRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
