//! Entities and concepts: the nodes of the knowledge graph.
//!
//! Entity identity is derived from the canonical name, so the same name
//! always maps to the same [`EntityId`], including across restarts and
//! journal replays.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::schema::{AttributeKey, EntityKind};
use crate::value::{normalize_symbol, Value};

const ENTITY_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_42c0_9d3e_4f1b_8a55_0c7e_2b91_d404);
const CONCEPT_NAMESPACE: Uuid = Uuid::from_u128(0x3c9e_71aa_05b4_4e62_9f10_d8a3_6e27_b5c1);

/// Root of the concept taxonomy.
pub const ROOT_CONCEPT: &str = "physical_object";

/// Normalizes a free-form name into its canonical form.
///
/// Leading articles are dropped ("a porcelain doll" -> "porcelain_doll").
#[must_use]
pub fn canonical_name(raw: &str) -> String {
    let normalized = normalize_symbol(raw);
    for article in ["a_", "an_", "the_"] {
        if let Some(rest) = normalized.strip_prefix(article) {
            if !rest.is_empty() {
                return rest.to_string();
            }
        }
    }
    normalized
}

/// Stable entity identifier derived from the canonical name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Returns the id for a (raw) entity name.
    #[must_use]
    pub fn for_name(name: &str) -> Self {
        Self(Uuid::new_v5(&ENTITY_NAMESPACE, canonical_name(name).as_bytes()))
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable concept identifier derived from the concept name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConceptId(Uuid);

impl ConceptId {
    /// The id every reference to `name` resolves to.
    #[must_use]
    pub fn for_name(name: &str) -> Self {
        Self(Uuid::new_v5(&CONCEPT_NAMESPACE, canonical_name(name).as_bytes()))
    }
}

impl fmt::Display for ConceptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An abstract concept in the `is_a` taxonomy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    /// Derived from the name.
    pub id: ConceptId,
    /// Canonical name.
    pub name: String,
    /// The concept this one is a kind of. `None` at the root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ConceptId>,
    /// When the concept was first referenced.
    pub created_at: DateTime<Utc>,
}

impl Concept {
    /// Creates a concept with canonicalized names.
    #[must_use]
    pub fn new(name: &str, parent: Option<&str>) -> Self {
        let name = canonical_name(name);
        Self {
            id: ConceptId::for_name(&name),
            parent: parent.map(ConceptId::for_name),
            name,
            created_at: Utc::now(),
        }
    }
}

/// A concrete thing the knowledge base holds beliefs about.
///
/// Attributes given at first reference are intrinsic facts. Afterwards the
/// store only changes them when an active belief's effect applies to the
/// entity.
///
/// # Examples
///
/// ```
/// use groundwork::{AttributeKey, Entity, EntityKind, Value};
///
/// let ball = Entity::new("Rubber Ball", EntityKind::PhysicalObject)
///     .unwrap()
///     .with_attribute(AttributeKey::Material, Value::symbol("rubber"))
///     .unwrap();
/// assert_eq!(ball.name, "rubber_ball");
/// assert_eq!(ball.version, 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Derived from the name.
    pub id: EntityId,
    /// Canonical name.
    pub name: String,
    /// Decides which attributes the entity may carry.
    pub kind: EntityKind,
    /// Name of the concept the entity is an instance of.
    pub concept: String,
    /// Intrinsic attributes, plus dispositions inferred from active beliefs.
    #[serde(default)]
    pub attributes: BTreeMap<AttributeKey, Value>,
    /// When the entity was first referenced.
    pub created_at: DateTime<Utc>,
    /// When an active belief last changed an attribute.
    pub updated_at: DateTime<Utc>,
    /// Starts at 1 and is bumped on every change.
    pub version: u64,
}

impl Entity {
    /// Creates a new entity under the root concept.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyName` if the name normalizes to nothing.
    pub fn new(name: &str, kind: EntityKind) -> Result<Self, ValidationError> {
        let name = canonical_name(name);
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        let now = Utc::now();
        Ok(Self {
            id: EntityId::for_name(&name),
            name,
            kind,
            concept: ROOT_CONCEPT.to_string(),
            attributes: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            version: 1,
        })
    }

    /// Places the entity under a concept.
    #[must_use]
    pub fn with_concept(mut self, concept: &str) -> Self {
        let concept = canonical_name(concept);
        if !concept.is_empty() {
            self.concept = concept;
        }
        self
    }

    /// Sets an intrinsic attribute, checked against the kind's schema.
    pub fn with_attribute(
        mut self,
        attribute: AttributeKey,
        value: impl Into<Value>,
    ) -> Result<Self, ValidationError> {
        let value = value.into();
        self.kind.check(attribute, &value)?;
        self.attributes.insert(attribute, value);
        Ok(self)
    }

    /// The value of one attribute, if known.
    #[must_use]
    pub fn attribute(&self, attribute: AttributeKey) -> Option<&Value> {
        self.attributes.get(&attribute)
    }

    /// Applies a belief-driven attribute change.
    ///
    /// Returns true if the value actually changed (and the version moved).
    pub(crate) fn apply_inferred(&mut self, attribute: AttributeKey, value: &Value) -> bool {
        if !self.kind.allows(attribute) || self.attributes.get(&attribute) == Some(value) {
            return false;
        }
        self.attributes.insert(attribute, value.clone());
        self.version += 1;
        self.updated_at = Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name("A Porcelain Doll"), "porcelain_doll");
        assert_eq!(canonical_name("the  glass bottle "), "glass_bottle");
        assert_eq!(canonical_name("anvil"), "anvil");
        assert_eq!(canonical_name("a_"), "a_");
    }

    #[test]
    fn test_entity_id_is_stable() {
        assert_eq!(EntityId::for_name("Rubber Ball"), EntityId::for_name("rubber_ball"));
        assert_ne!(EntityId::for_name("rubber_ball"), EntityId::for_name("glass_bottle"));
    }

    #[test]
    fn test_entity_empty_name_rejected() {
        assert!(matches!(
            Entity::new("   ", EntityKind::PhysicalObject),
            Err(ValidationError::EmptyName)
        ));
    }

    #[test]
    fn test_with_attribute_respects_schema() {
        let floor = Entity::new("tile floor", EntityKind::Surface).unwrap();
        assert!(floor
            .clone()
            .with_attribute(AttributeKey::IsHard, true)
            .is_ok());
        assert!(floor.with_attribute(AttributeKey::Floats, true).is_err());
    }

    #[test]
    fn test_apply_inferred_bumps_version_once() {
        let mut ball = Entity::new("rubber_ball", EntityKind::PhysicalObject).unwrap();
        assert!(ball.apply_inferred(AttributeKey::IsBrittle, &Value::Bool(false)));
        assert_eq!(ball.version, 2);
        assert!(!ball.apply_inferred(AttributeKey::IsBrittle, &Value::Bool(false)));
        assert_eq!(ball.version, 2);
    }

    #[test]
    fn test_concept_parent_link() {
        let c = Concept::new("Container", Some(ROOT_CONCEPT));
        assert_eq!(c.name, "container");
        assert_eq!(c.parent, Some(ConceptId::for_name(ROOT_CONCEPT)));
    }
}
