//! Causal prediction over the knowledge store.
//!
//! The logic engine only reads. Every prediction is computed from one
//! consistent store view, so predictions may run concurrently with each
//! other and with commits.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::belief::{Belief, BeliefId, BeliefStatus};
use crate::confidence::Confidence;
use crate::entity::{canonical_name, Entity};
use crate::error::{ExecutionError, GroundResult, ValidationError};
use crate::record::{Hypothesis, HypothesisId, Instrument, Scenario};
use crate::schema::{Action, AttributeKey, AttributeRole, EntityKind};
use crate::store::{KnowledgeStore, StoreView};
use crate::value::Value;

/// Which beliefs a query may rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReasoningMode {
    /// Only active (verified or corrected) beliefs.
    #[default]
    VerifiedOnly,
    /// Active beliefs plus unverified candidates. Must be asked for.
    AllowUnverified,
}

impl ReasoningMode {
    /// Maps the downstream `allow_unverified` flag to a mode.
    #[must_use]
    pub const fn from_allow_unverified(allow: bool) -> Self {
        if allow {
            Self::AllowUnverified
        } else {
            Self::VerifiedOnly
        }
    }

    /// Returns true if `belief` may be relied on in this mode.
    #[must_use]
    pub fn admits(self, belief: &Belief) -> bool {
        belief.is_active() || (self == Self::AllowUnverified && belief.is_candidate())
    }
}

/// One predicted outcome and the belief it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictedEffect {
    /// Outcome attribute observable under the action.
    pub attribute: AttributeKey,
    /// The predicted value.
    pub value: Value,
    /// The winning belief.
    pub belief: BeliefId,
    /// Its status when the prediction was made.
    pub status: BeliefStatus,
    /// Its confidence when the prediction was made.
    pub confidence: Confidence,
}

/// The result of a prediction: one effect per observable outcome the
/// knowledge base has an opinion on.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Canonical name of the entity.
    pub entity: String,
    /// The action performed.
    pub action: Action,
    /// Which beliefs were admitted.
    pub mode: ReasoningMode,
    /// One entry per observable outcome, ordered by attribute.
    pub effects: Vec<PredictedEffect>,
}

impl Prediction {
    /// The predicted effect on `attribute`, if any.
    #[must_use]
    pub fn effect(&self, attribute: AttributeKey) -> Option<&PredictedEffect> {
        self.effects.iter().find(|e| e.attribute == attribute)
    }

    /// Ids of the beliefs relied upon.
    #[must_use]
    pub fn beliefs(&self) -> Vec<BeliefId> {
        self.effects.iter().map(|e| e.belief).collect()
    }

    /// Returns true if any effect rests on an unverified belief.
    #[must_use]
    pub fn uses_unverified(&self) -> bool {
        self.effects.iter().any(|e| e.status == BeliefStatus::Unverified)
    }
}

/// Mass assumed for a tool the store knows no mass for.
const DEFAULT_TOOL_MASS_KG: f64 = 0.1;
/// A tool must be heavier than this to break what it strikes.
const MIN_BREAKING_MASS_KG: f64 = 0.2;

/// What striking a target with a tool is expected to do.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUsePrediction {
    /// Canonical name of the tool.
    pub tool: String,
    /// The target's predicted reaction to a strike, from its beliefs.
    pub strike: Prediction,
    /// Whether the tool is hard and heavy enough to break something brittle.
    pub breaking_blow: bool,
    /// The concrete situation the prediction answers, for the sandbox.
    pub scenario: Scenario,
}

impl ToolUsePrediction {
    /// Predicted `shatters` outcome. `None` when no belief covers it.
    #[must_use]
    pub fn shatters(&self) -> Option<bool> {
        let effect = self.strike.effect(AttributeKey::Shatters)?;
        effect.value.as_bool().map(|brittle| brittle && self.breaking_blow)
    }
}

/// Intrinsic attributes of an entity, as handed to the sandbox.
fn intrinsics(entity: &Entity) -> BTreeMap<AttributeKey, Value> {
    entity
        .attributes
        .iter()
        .filter(|(key, _)| key.role() == AttributeRole::Intrinsic)
        .map(|(key, value)| (*key, value.clone()))
        .collect()
}

fn stored_or_bare(view: &StoreView<'_>, name: &str) -> GroundResult<Entity> {
    match view.entity_named(name) {
        Some(stored) => Ok(stored.clone()),
        None => Ok(Entity::new(name, EntityKind::default())?),
    }
}

fn checked_name(raw: &str) -> GroundResult<String> {
    let name = canonical_name(raw);
    if name.is_empty() {
        return Err(ValidationError::EmptyName.into());
    }
    Ok(name)
}

fn recency(belief: &Belief) -> chrono::DateTime<chrono::Utc> {
    belief
        .verified_at
        .or(belief.last_tested_at)
        .unwrap_or(belief.created_at)
}

/// Orders two competing beliefs: more specific, then more confident, then
/// more recently verified.
fn rank(a: &Belief, b: &Belief) -> Ordering {
    a.rule
        .specificity()
        .cmp(&b.rule.specificity())
        .then_with(|| a.confidence.value().total_cmp(&b.confidence.value()))
        .then_with(|| recency(a).cmp(&recency(b)))
}

/// Picks the winner among beliefs competing for one outcome.
///
/// Returns `None` only for an empty slice.
fn select<'a>(candidates: &[&'a Belief]) -> Option<&'a Belief> {
    let (first, rest) = candidates.split_first()?;
    let mut best = *first;
    for &b in rest {
        match rank(b, best) {
            Ordering::Greater => best = b,
            // Deterministic tie-breaker: smaller BeliefId.
            Ordering::Equal if b.id < best.id => best = b,
            _ => {}
        }
    }
    Some(best)
}

/// Derives predictions from the beliefs in a [`KnowledgeStore`].
#[derive(Clone)]
pub struct LogicEngine {
    store: Arc<KnowledgeStore>,
}

impl LogicEngine {
    /// A logic engine reading from `store`.
    #[must_use]
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }

    /// The store predictions are read from.
    #[must_use]
    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    /// Predicts what happens when `action` is performed on the named entity.
    ///
    /// An entity the store has never seen is treated as a bare physical
    /// object: only wildcard-like patterns can match it.
    ///
    /// # Errors
    ///
    /// `NoApplicableBelief` when no admitted belief matches. This is the
    /// "unknown" answer and must not be replaced with a default outcome.
    pub fn predict(
        &self,
        entity: &str,
        action: Action,
        mode: ReasoningMode,
    ) -> GroundResult<Prediction> {
        let name = checked_name(entity)?;
        let view = self.store.read()?;
        let entity = stored_or_bare(&view, &name)?;
        Self::predict_in(&view, &entity, action, mode)
    }

    fn predict_in(
        view: &StoreView<'_>,
        entity: &Entity,
        action: Action,
        mode: ReasoningMode,
    ) -> GroundResult<Prediction> {
        let name = entity.name.clone();
        let lineage = view.concept_lineage(&entity.concept);

        let mut by_outcome: BTreeMap<AttributeKey, Vec<&Belief>> = BTreeMap::new();
        for belief in view.beliefs() {
            if !mode.admits(belief)
                || !belief.rule.applies_to(action)
                || !belief.rule.precondition.pattern.matches(entity, &lineage)
            {
                continue;
            }
            if let Some(observable) = belief.rule.effect.observable(action) {
                by_outcome.entry(observable.attribute).or_default().push(belief);
            }
        }

        let effects: Vec<PredictedEffect> = by_outcome
            .into_iter()
            .filter_map(|(attribute, candidates)| {
                let winner = select(&candidates)?;
                Some(PredictedEffect {
                    attribute,
                    value: winner.rule.effect.value.clone(),
                    belief: winner.id,
                    status: winner.status,
                    confidence: winner.confidence,
                })
            })
            .collect();

        if effects.is_empty() {
            debug!(entity = %name, %action, ?mode, "no applicable belief");
            return Err(ExecutionError::NoApplicableBelief {
                entity: name,
                action,
            }
            .into());
        }

        debug!(entity = %name, %action, effects = effects.len(), ?mode, "prediction derived");
        Ok(Prediction {
            entity: name,
            action,
            mode,
            effects,
        })
    }

    /// The downstream query surface: predict with an explicit opt-in for
    /// unverified knowledge.
    pub fn reason(
        &self,
        entity: &str,
        action: Action,
        allow_unverified: bool,
    ) -> GroundResult<Prediction> {
        self.predict(entity, action, ReasoningMode::from_allow_unverified(allow_unverified))
    }

    /// Predicts what striking `target` with `tool` does.
    ///
    /// The target's reaction comes from its beliefs, as in [`predict`].
    /// The tool is judged from its stored intrinsic attributes: it breaks
    /// what is brittle when it is not declared soft and weighs more than
    /// 0.2 kg. A tool with no recorded mass is assumed light.
    ///
    /// [`predict`]: Self::predict
    ///
    /// # Errors
    ///
    /// `NoApplicableBelief` when nothing admissible is known about the
    /// target under a strike.
    pub fn predict_tool_use(
        &self,
        tool: &str,
        target: &str,
        mode: ReasoningMode,
    ) -> GroundResult<ToolUsePrediction> {
        let tool = checked_name(tool)?;
        let target = checked_name(target)?;
        let view = self.store.read()?;
        let tool = stored_or_bare(&view, &tool)?;
        let target = stored_or_bare(&view, &target)?;

        let strike = Self::predict_in(&view, &target, Action::Strike, mode)?;
        let hard = tool.attribute(AttributeKey::IsHard).and_then(Value::as_bool) != Some(false);
        let mass = tool
            .attribute(AttributeKey::MassKg)
            .and_then(Value::as_scalar)
            .unwrap_or(DEFAULT_TOOL_MASS_KG);
        let breaking_blow = hard && mass > MIN_BREAKING_MASS_KG;
        debug!(
            tool = %tool.name,
            target = %target.name,
            mass,
            hard,
            breaking_blow,
            "tool use predicted"
        );

        let scenario = Scenario {
            entity: target.name.clone(),
            kind: target.kind,
            attributes: intrinsics(&target),
            action: Action::Strike,
            instrument: None,
        }
        .with_instrument(Instrument {
            entity: tool.name.clone(),
            attributes: intrinsics(&tool),
        });
        Ok(ToolUsePrediction {
            tool: tool.name,
            strike,
            breaking_blow,
            scenario,
        })
    }

    /// Binds a belief to the minimal scenario its precondition implies.
    ///
    /// The scenario carries the entity's intrinsic attributes plus the
    /// pattern's intrinsic constraints; never the attribute under test.
    /// Returns `Ok(None)` when the belief's effect cannot be observed under
    /// any action.
    pub fn hypothesize(&self, belief: &Belief) -> GroundResult<Option<Hypothesis>> {
        let Some(action) = belief.rule.probe_action() else {
            return Ok(None);
        };
        let Some(predicted) = belief.rule.effect.observable(action) else {
            return Ok(None);
        };
        let pattern = &belief.rule.precondition.pattern;
        let tested = belief.rule.effect.attribute;

        let view = self.store.read()?;
        let subject = match &pattern.entity {
            Some(name) => stored_or_bare(&view, name)?,
            None => {
                let name = pattern
                    .concept
                    .as_deref()
                    .map_or_else(|| "prototype".to_string(), |c| format!("{c}_prototype"));
                Entity::new(&name, EntityKind::default())?
            }
        };

        let mut attributes = intrinsics(&subject);
        for (key, value) in &pattern.attributes {
            if key.role() == AttributeRole::Intrinsic {
                attributes.insert(*key, value.clone());
            }
        }
        attributes.remove(&tested);

        Ok(Some(Hypothesis {
            id: HypothesisId::new(),
            belief: belief.id,
            belief_version: belief.version,
            scenario: Scenario {
                entity: subject.name,
                kind: subject.kind,
                attributes,
                action,
                instrument: None,
            },
            predicted,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belief::Provenance;
    use crate::error::GroundError;
    use crate::pattern::{ActionPattern, EntityPattern};
    use crate::rule::{CausalRule, Effect};

    fn engine() -> LogicEngine {
        LogicEngine::new(Arc::new(KnowledgeStore::in_memory()))
    }

    fn add(
        engine: &LogicEngine,
        pattern: EntityPattern,
        action: ActionPattern,
        attribute: AttributeKey,
        value: bool,
        status: BeliefStatus,
        confidence: f32,
    ) -> BeliefId {
        engine
            .store()
            .add_belief(
                CausalRule::new(pattern, action, Effect::new(attribute, value).unwrap()),
                Provenance::genesis("test"),
                status,
                Confidence::new(confidence).unwrap(),
            )
            .unwrap()
    }

    #[test]
    fn test_verified_only_ignores_candidates() {
        let engine = engine();
        let id = add(
            &engine,
            EntityPattern::entity("porcelain_doll"),
            ActionPattern::Any,
            AttributeKey::IsBrittle,
            true,
            BeliefStatus::Unverified,
            0.7,
        );

        let err = engine.reason("porcelain doll", Action::Drop, false).unwrap_err();
        assert!(err.is_no_applicable_belief());

        let prediction = engine.reason("porcelain doll", Action::Drop, true).unwrap();
        let shatters = prediction.effect(AttributeKey::Shatters).unwrap();
        assert_eq!(shatters.value, Value::Bool(true));
        assert_eq!(shatters.belief, id);
        assert!(prediction.uses_unverified());
    }

    #[test]
    fn test_specific_pattern_beats_concept() {
        let engine = engine();
        engine.store().ensure_concept("container", None).unwrap();
        add(
            &engine,
            EntityPattern::concept("container"),
            ActionPattern::Any,
            AttributeKey::IsBrittle,
            true,
            BeliefStatus::Verified,
            0.99,
        );
        let specific = add(
            &engine,
            EntityPattern {
                concept: Some("container".to_string()),
                ..EntityPattern::entity("tin_can")
            },
            ActionPattern::Any,
            AttributeKey::IsBrittle,
            false,
            BeliefStatus::Verified,
            0.6,
        );

        let prediction = engine.reason("tin_can", Action::Strike, false).unwrap();
        let shatters = prediction.effect(AttributeKey::Shatters).unwrap();
        assert_eq!(shatters.belief, specific);
        assert_eq!(shatters.value, Value::Bool(false));
    }

    #[test]
    fn test_confidence_breaks_specificity_ties() {
        let engine = engine();
        add(
            &engine,
            EntityPattern::entity("glass_bottle"),
            ActionPattern::Any,
            AttributeKey::Shatters,
            true,
            BeliefStatus::Verified,
            0.7,
        );
        let confident = add(
            &engine,
            EntityPattern::entity("glass_bottle"),
            ActionPattern::Any,
            AttributeKey::IsBrittle,
            true,
            BeliefStatus::Verified,
            0.95,
        );
        let prediction = engine.reason("glass_bottle", Action::Drop, false).unwrap();
        assert_eq!(prediction.effect(AttributeKey::Shatters).unwrap().belief, confident);
    }

    #[test]
    fn test_action_must_make_effect_observable() {
        let engine = engine();
        add(
            &engine,
            EntityPattern::entity("rubber_ball"),
            ActionPattern::Any,
            AttributeKey::IsElastic,
            true,
            BeliefStatus::Verified,
            0.9,
        );
        assert!(engine.reason("rubber_ball", Action::Drop, false).is_ok());
        let err = engine.reason("rubber_ball", Action::Submerge, false).unwrap_err();
        assert!(matches!(
            err,
            GroundError::Execution(ExecutionError::NoApplicableBelief { action: Action::Submerge, .. })
        ));
    }

    #[test]
    fn test_hypothesis_uses_intrinsic_attributes_only() {
        let engine = engine();
        let pattern = EntityPattern::entity("glass_bottle")
            .with_attribute(AttributeKey::Material, "glass")
            .unwrap();
        let id = add(
            &engine,
            pattern,
            ActionPattern::Any,
            AttributeKey::IsBrittle,
            true,
            BeliefStatus::Unverified,
            0.8,
        );
        let belief = engine.store().get_belief(id).unwrap().unwrap();
        let hypothesis = engine.hypothesize(&belief).unwrap().unwrap();

        assert_eq!(hypothesis.scenario.action, Action::Drop);
        assert_eq!(hypothesis.scenario.entity, "glass_bottle");
        assert_eq!(hypothesis.scenario.material(), Some("glass"));
        assert!(hypothesis.scenario.attribute(AttributeKey::IsBrittle).is_none());
        assert_eq!(hypothesis.predicted.attribute, AttributeKey::Shatters);
        assert_eq!(hypothesis.belief_version, belief.version);
    }

    #[test]
    fn test_tool_use_needs_heavy_hard_tool() {
        let engine = engine();
        let store = engine.store();
        let vase = Entity::new("vase", EntityKind::PhysicalObject)
            .unwrap()
            .with_attribute(AttributeKey::Material, "porcelain")
            .unwrap();
        store.ensure_entity(vase).unwrap();
        let tools = [("hammer", 0.8, true), ("pebble", 0.05, true), ("pillow", 0.5, false)];
        for (name, mass, hard) in tools {
            let tool = Entity::new(name, EntityKind::PhysicalObject)
                .unwrap()
                .with_attribute(AttributeKey::MassKg, mass)
                .unwrap()
                .with_attribute(AttributeKey::IsHard, hard)
                .unwrap();
            store.ensure_entity(tool).unwrap();
        }
        let brittle = add(
            &engine,
            EntityPattern::entity("vase"),
            ActionPattern::Any,
            AttributeKey::IsBrittle,
            true,
            BeliefStatus::Verified,
            0.9,
        );

        let hammer = engine
            .predict_tool_use("hammer", "vase", ReasoningMode::VerifiedOnly)
            .unwrap();
        assert!(hammer.breaking_blow);
        assert_eq!(hammer.shatters(), Some(true));
        assert_eq!(hammer.strike.beliefs(), vec![brittle]);
        assert_eq!(hammer.scenario.action, Action::Strike);
        assert_eq!(hammer.scenario.material(), Some("porcelain"));
        let tool = hammer.scenario.instrument.as_ref().unwrap();
        assert_eq!(tool.entity, "hammer");
        assert_eq!(tool.attribute(AttributeKey::MassKg), Some(&Value::Scalar(0.8)));

        for light_or_soft in ["pebble", "pillow"] {
            let p = engine
                .predict_tool_use(light_or_soft, "vase", ReasoningMode::VerifiedOnly)
                .unwrap();
            assert!(!p.breaking_blow);
            assert_eq!(p.shatters(), Some(false));
        }

        // An unknown tool has no recorded mass and is assumed light.
        let twig = engine
            .predict_tool_use("twig", "vase", ReasoningMode::VerifiedOnly)
            .unwrap();
        assert!(!twig.breaking_blow);

        let err = engine
            .predict_tool_use("hammer", "feather", ReasoningMode::VerifiedOnly)
            .unwrap_err();
        assert!(err.is_no_applicable_belief());
    }

    #[test]
    fn test_untestable_belief_has_no_hypothesis() {
        let engine = engine();
        let id = engine
            .store()
            .add_belief(
                CausalRule::new(
                    EntityPattern::entity("anvil"),
                    ActionPattern::Any,
                    Effect::new(AttributeKey::IsHard, true).unwrap(),
                ),
                Provenance::genesis("test"),
                BeliefStatus::Unverified,
                Confidence::default(),
            )
            .unwrap();
        let belief = engine.store().get_belief(id).unwrap().unwrap();
        assert!(engine.hypothesize(&belief).unwrap().is_none());
    }
}
