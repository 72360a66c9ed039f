//! Seed knowledge loaded before any learning happens.

use crate::confidence::Confidence;
use crate::entity::Entity;
use crate::error::GroundResult;
use crate::pattern::{ActionPattern, EntityPattern};
use crate::rule::{CausalRule, Effect};
use crate::schema::{AttributeKey, EntityKind};

/// The pre-seeded knowledge base validated during genesis.
///
/// Concepts and entities are plain graph nodes. Only `beliefs` are
/// tested; everything an entity "knows" about itself beyond its
/// intrinsic attributes has to come from a belief that survives the
/// sandbox.
#[derive(Debug, Clone, Default)]
pub struct Worldview {
    /// Name recorded in each seed's provenance.
    pub source: String,
    /// `(name, parent)` pairs; a missing parent means the root concept.
    pub concepts: Vec<(String, Option<String>)>,
    /// Entities created before any belief is added.
    pub entities: Vec<Entity>,
    /// Seed beliefs with their initial confidence.
    pub beliefs: Vec<(CausalRule, Confidence)>,
}

impl Worldview {
    /// An empty worldview.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Adds a concept under `parent`, or under the root.
    #[must_use]
    pub fn concept(mut self, name: impl Into<String>, parent: Option<&str>) -> Self {
        self.concepts.push((name.into(), parent.map(str::to_string)));
        self
    }

    /// Adds an entity.
    #[must_use]
    pub fn entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    /// Adds a seed belief.
    #[must_use]
    pub fn belief(mut self, rule: CausalRule, confidence: Confidence) -> Self {
        self.beliefs.push((rule, confidence));
        self
    }

    /// Returns true if there is nothing to seed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty() && self.entities.is_empty() && self.beliefs.is_empty()
    }

    /// The classic bootstrap world: a glass bottle, a tile floor and a
    /// rubber ball, with one deliberately wrong belief about the ball.
    pub fn classic() -> GroundResult<Self> {
        let glass_bottle = Entity::new("glass_bottle", EntityKind::PhysicalObject)?
            .with_concept("container")
            .with_attribute(AttributeKey::Material, "glass")?
            .with_attribute(AttributeKey::Phase, "solid")?
            .with_attribute(AttributeKey::MassKg, 0.7)?;
        let tile_floor = Entity::new("tile_floor", EntityKind::Surface)?
            .with_concept("floor")
            .with_attribute(AttributeKey::Material, "ceramic")?
            .with_attribute(AttributeKey::Phase, "solid")?
            .with_attribute(AttributeKey::IsHard, true)?;
        let rubber_ball = Entity::new("rubber_ball", EntityKind::PhysicalObject)?
            .with_concept("toy")
            .with_attribute(AttributeKey::Material, "rubber")?
            .with_attribute(AttributeKey::Phase, "solid")?
            .with_attribute(AttributeKey::MassKg, 0.2)?;

        let rule = |entity: &str, attribute, value: bool| -> GroundResult<CausalRule> {
            Ok(CausalRule::new(
                EntityPattern::entity(entity),
                ActionPattern::Any,
                Effect::new(attribute, value)?,
            ))
        };

        Ok(Self::new("classic-worldview")
            .concept("container", None)
            .concept("toy", None)
            .concept("floor", None)
            .entity(glass_bottle)
            .entity(tile_floor)
            .entity(rubber_ball)
            .belief(
                rule("glass_bottle", AttributeKey::IsBrittle, true)?,
                Confidence::clamped(0.8),
            )
            .belief(
                rule("rubber_ball", AttributeKey::IsBrittle, true)?,
                Confidence::clamped(0.7),
            )
            .belief(
                rule("rubber_ball", AttributeKey::IsElastic, true)?,
                Confidence::clamped(0.8),
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_classic_worldview() {
        let world = Worldview::classic().unwrap();
        assert_eq!(world.entities.len(), 3);
        assert_eq!(world.beliefs.len(), 3);
        let floor = world.entities.iter().find(|e| e.name == "tile_floor").unwrap();
        assert_eq!(floor.kind, EntityKind::Surface);
        assert_eq!(floor.attribute(AttributeKey::IsHard), Some(&Value::Bool(true)));

        let flawed = &world.beliefs[1].0;
        assert_eq!(flawed.precondition.pattern.entity.as_deref(), Some("rubber_ball"));
        assert_eq!(flawed.effect.value, Value::Bool(true));
    }

    #[test]
    fn test_builder() {
        let world = Worldview::new("unit").concept("vase", Some("container"));
        assert!(!world.is_empty());
        assert_eq!(world.concepts, vec![("vase".to_string(), Some("container".to_string()))]);
        assert!(Worldview::default().is_empty());
    }
}
