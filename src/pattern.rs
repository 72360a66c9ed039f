//! Entity and action patterns used in rule preconditions.
//!
//! A pattern selects the entities a rule applies to. Patterns are compared
//! by specificity when several rules compete for the same attribute: a rule
//! about a named entity beats a rule about a material, which beats a rule
//! about a whole concept, which beats a wildcard.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::{canonical_name, Entity};
use crate::error::ValidationError;
use crate::schema::{Action, AttributeKey};
use crate::value::Value;

/// How specific a precondition is. Ordered: larger wins.
///
/// Field order matters: comparison is lexicographic in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Specificity {
    /// The pattern names an entity.
    pub named_entity: bool,
    /// Number of attribute constraints.
    pub attribute_constraints: usize,
    /// The pattern names a concept.
    pub concept: bool,
    /// The rule applies to one action only.
    pub exact_action: bool,
}

/// Selects entities by name, concept and exact attribute values.
///
/// Every populated field must match. An empty pattern is a wildcard.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityPattern {
    /// Exact canonical entity name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,

    /// Concept the entity must descend from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,

    /// Attribute values the entity must carry.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<AttributeKey, Value>,
}

impl EntityPattern {
    /// The wildcard pattern.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Matches exactly one named entity.
    #[must_use]
    pub fn entity(name: &str) -> Self {
        Self {
            entity: Some(canonical_name(name)),
            ..Self::default()
        }
    }

    /// Matches every entity under a concept (including sub-concepts).
    #[must_use]
    pub fn concept(name: &str) -> Self {
        Self {
            concept: Some(canonical_name(name)),
            ..Self::default()
        }
    }

    /// Adds an exact attribute constraint.
    pub fn with_attribute(
        mut self,
        attribute: AttributeKey,
        value: impl Into<Value>,
    ) -> Result<Self, ValidationError> {
        let value = value.into();
        attribute.check(&value)?;
        self.attributes.insert(attribute, value);
        Ok(self)
    }

    /// Returns true if the pattern matches every entity.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.entity.is_none() && self.concept.is_none() && self.attributes.is_empty()
    }

    /// The pattern's specificity, with `exact_action` left unset.
    #[must_use]
    pub fn specificity(&self) -> Specificity {
        Specificity {
            named_entity: self.entity.is_some(),
            attribute_constraints: self.attributes.len(),
            concept: self.concept.is_some(),
            exact_action: false,
        }
    }

    /// Returns true if `entity` satisfies every constraint.
    ///
    /// `lineage` is the entity's concept followed by its ancestors.
    #[must_use]
    pub fn matches(&self, entity: &Entity, lineage: &[String]) -> bool {
        if let Some(name) = &self.entity {
            if *name != entity.name {
                return false;
            }
        }
        if let Some(concept) = &self.concept {
            if !lineage.iter().any(|c| c == concept) {
                return false;
            }
        }
        self.attributes
            .iter()
            .all(|(key, want)| entity.attributes.get(key) == Some(want))
    }

    /// Canonical text, stable across field insertion order.
    #[must_use]
    pub fn canonical(&self) -> String {
        let mut parts = Vec::with_capacity(2 + self.attributes.len());
        if let Some(name) = &self.entity {
            parts.push(format!("entity={name}"));
        }
        if let Some(concept) = &self.concept {
            parts.push(format!("concept={concept}"));
        }
        for (key, value) in &self.attributes {
            parts.push(format!("{key}={}", value.canonical()));
        }
        if parts.is_empty() {
            "*".to_string()
        } else {
            parts.join(";")
        }
    }
}

impl fmt::Display for EntityPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// The action part of a precondition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "action", rename_all = "snake_case")]
pub enum ActionPattern {
    /// Any action.
    #[default]
    Any,
    /// Exactly this action.
    Exactly(Action),
}

impl ActionPattern {
    /// Returns true if `action` is covered.
    #[must_use]
    pub const fn matches(self, action: Action) -> bool {
        match self {
            Self::Any => true,
            Self::Exactly(a) => a as u8 == action as u8,
        }
    }

    /// The exact action, if there is one.
    #[must_use]
    pub const fn as_action(self) -> Option<Action> {
        match self {
            Self::Any => None,
            Self::Exactly(a) => Some(a),
        }
    }
}

impl fmt::Display for ActionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Exactly(a) => write!(f, "{a}"),
        }
    }
}

impl From<Action> for ActionPattern {
    fn from(a: Action) -> Self {
        Self::Exactly(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ROOT_CONCEPT;
    use crate::schema::EntityKind;

    fn bottle() -> Entity {
        Entity::new("glass_bottle", EntityKind::PhysicalObject)
            .unwrap()
            .with_concept("container")
            .with_attribute(AttributeKey::Material, "glass")
            .unwrap()
    }

    fn lineage() -> Vec<String> {
        vec!["container".to_string(), ROOT_CONCEPT.to_string()]
    }

    #[test]
    fn test_wildcard_matches_everything() {
        let p = EntityPattern::any();
        assert!(p.is_wildcard());
        assert!(p.matches(&bottle(), &lineage()));
        assert_eq!(p.canonical(), "*");
    }

    #[test]
    fn test_named_pattern() {
        assert!(EntityPattern::entity("Glass Bottle").matches(&bottle(), &lineage()));
        assert!(!EntityPattern::entity("rubber_ball").matches(&bottle(), &lineage()));
    }

    #[test]
    fn test_concept_matches_ancestors() {
        assert!(EntityPattern::concept(ROOT_CONCEPT).matches(&bottle(), &lineage()));
        assert!(!EntityPattern::concept("tool").matches(&bottle(), &lineage()));
    }

    #[test]
    fn test_attribute_constraints() {
        let glass = EntityPattern::any()
            .with_attribute(AttributeKey::Material, "glass")
            .unwrap();
        let rubber = EntityPattern::any()
            .with_attribute(AttributeKey::Material, "rubber")
            .unwrap();
        assert!(glass.matches(&bottle(), &lineage()));
        assert!(!rubber.matches(&bottle(), &lineage()));
    }

    #[test]
    fn test_specificity_ordering() {
        let named = EntityPattern::entity("glass_bottle").specificity();
        let material = EntityPattern::any()
            .with_attribute(AttributeKey::Material, "glass")
            .unwrap()
            .specificity();
        let concept = EntityPattern::concept("container").specificity();
        let wildcard = EntityPattern::any().specificity();
        assert!(named > material);
        assert!(material > concept);
        assert!(concept > wildcard);
    }

    #[test]
    fn test_canonical_is_order_independent() {
        let a = EntityPattern::any()
            .with_attribute(AttributeKey::Material, "glass")
            .unwrap()
            .with_attribute(AttributeKey::Phase, "solid")
            .unwrap();
        let b = EntityPattern::any()
            .with_attribute(AttributeKey::Phase, "solid")
            .unwrap()
            .with_attribute(AttributeKey::Material, "glass")
            .unwrap();
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_action_pattern() {
        assert!(ActionPattern::Any.matches(Action::Strike));
        assert!(ActionPattern::Exactly(Action::Drop).matches(Action::Drop));
        assert!(!ActionPattern::Exactly(Action::Drop).matches(Action::Strike));
    }
}
