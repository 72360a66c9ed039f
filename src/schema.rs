//! The closed attribute schema.
//!
//! Attributes, entity kinds and actions are enumerated rather than
//! open-ended key/value bags. Every attribute declares the kind of value it
//! accepts and its role:
//!
//! - **intrinsic**: given when an entity is first referenced (material, mass)
//! - **dispositional**: what a belief claims about behaviour (is brittle)
//! - **outcome**: what the sandbox observes when an action is performed
//!   (shatters)
//!
//! The manifestation table links the last two: a disposition is tested by
//! performing an action and observing the outcome it manifests as.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::value::{normalize_symbol, Value};

/// Allowed `material` symbols.
pub const MATERIALS: &[&str] = &[
    "glass", "porcelain", "ceramic", "rubber", "wood", "plastic", "metal", "stone",
];

/// Allowed `phase` symbols.
pub const PHASES: &[&str] = &["solid", "liquid", "gas"];

/// The kind of value an attribute accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// `true` or `false`.
    Bool,
    /// A finite number.
    Scalar {
        /// Unit the number is expressed in.
        unit: &'static str,
    },
    /// One of a fixed set of symbols.
    Enum(&'static [&'static str]),
}

impl ValueKind {
    /// Checks a value against this kind.
    pub fn check(self, attribute: AttributeKey, value: &Value) -> Result<(), ValidationError> {
        match (self, value) {
            (Self::Bool, Value::Bool(_)) => Ok(()),
            (Self::Scalar { .. }, Value::Scalar(v)) if v.is_finite() => Ok(()),
            (Self::Enum(allowed), Value::Symbol(sym)) => {
                if allowed.contains(&sym.as_str()) {
                    Ok(())
                } else {
                    Err(ValidationError::UnknownSymbol {
                        attribute,
                        symbol: sym.clone(),
                    })
                }
            }
            _ => Err(ValidationError::ValueKindMismatch {
                attribute,
                expected: self.to_string(),
                actual: value.type_name().to_string(),
            }),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Scalar { unit } => write!(f, "scalar({unit})"),
            Self::Enum(allowed) => write!(f, "enum[{}]", allowed.join("|")),
        }
    }
}

/// What an attribute describes. See the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeRole {
    /// Given when the entity is first referenced.
    Intrinsic,
    /// Claimed by beliefs.
    Dispositional,
    /// Observed by the sandbox.
    Outcome,
}

/// Every attribute the knowledge base can talk about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKey {
    /// What the entity is made of. One of [`MATERIALS`].
    Material,
    /// One of [`PHASES`].
    Phase,
    /// Mass in kilograms.
    MassKg,
    /// Whether the entity resists deformation.
    IsHard,
    /// Breaks under a sharp impact.
    IsBrittle,
    /// Springs back after an impact.
    IsElastic,
    /// Floats in water.
    IsBuoyant,
    /// Broke apart.
    Shatters,
    /// Rebounded.
    Bounces,
    /// Stayed at the surface.
    Floats,
}

impl AttributeKey {
    /// Every attribute, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::Material,
        Self::Phase,
        Self::MassKg,
        Self::IsHard,
        Self::IsBrittle,
        Self::IsElastic,
        Self::IsBuoyant,
        Self::Shatters,
        Self::Bounces,
        Self::Floats,
    ];

    /// The snake_case name used in text and serialized forms.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Material => "material",
            Self::Phase => "phase",
            Self::MassKg => "mass_kg",
            Self::IsHard => "is_hard",
            Self::IsBrittle => "is_brittle",
            Self::IsElastic => "is_elastic",
            Self::IsBuoyant => "is_buoyant",
            Self::Shatters => "shatters",
            Self::Bounces => "bounces",
            Self::Floats => "floats",
        }
    }

    /// Intrinsic, dispositional or outcome.
    #[must_use]
    pub const fn role(self) -> AttributeRole {
        match self {
            Self::Material | Self::Phase | Self::MassKg | Self::IsHard => AttributeRole::Intrinsic,
            Self::IsBrittle | Self::IsElastic | Self::IsBuoyant => AttributeRole::Dispositional,
            Self::Shatters | Self::Bounces | Self::Floats => AttributeRole::Outcome,
        }
    }

    /// The kind of value the attribute accepts.
    #[must_use]
    pub const fn value_kind(self) -> ValueKind {
        match self {
            Self::Material => ValueKind::Enum(MATERIALS),
            Self::Phase => ValueKind::Enum(PHASES),
            Self::MassKg => ValueKind::Scalar { unit: "kg" },
            _ => ValueKind::Bool,
        }
    }

    /// Validates a value for this attribute.
    pub fn check(self, value: &Value) -> Result<(), ValidationError> {
        self.value_kind().check(self, value)
    }

    /// The outcome attribute this attribute manifests as under `action`.
    ///
    /// Outcome attributes manifest as themselves when the action can observe
    /// them; intrinsic attributes never manifest.
    #[must_use]
    pub fn manifestation(self, action: Action) -> Option<Self> {
        match (self, action) {
            (Self::IsBrittle, Action::Drop | Action::Strike) => Some(Self::Shatters),
            (Self::IsElastic, Action::Drop) => Some(Self::Bounces),
            (Self::IsBuoyant, Action::Submerge) => Some(Self::Floats),
            (key, action) if key.role() == AttributeRole::Outcome => {
                action.observables().contains(&key).then_some(key)
            }
            _ => None,
        }
    }

    /// The cheapest action that makes this attribute observable.
    #[must_use]
    pub const fn probe_action(self) -> Option<Action> {
        match self {
            Self::IsBrittle | Self::IsElastic | Self::Shatters | Self::Bounces => Some(Action::Drop),
            Self::IsBuoyant | Self::Floats => Some(Action::Submerge),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeKey {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let key = normalize_symbol(raw);
        let found = match key.as_str() {
            "brittle" => Some(Self::IsBrittle),
            "elastic" | "bouncy" => Some(Self::IsElastic),
            "buoyant" => Some(Self::IsBuoyant),
            "hard" => Some(Self::IsHard),
            "mass" => Some(Self::MassKg),
            "state" => Some(Self::Phase),
            other => Self::ALL.into_iter().find(|k| k.as_str() == other),
        };
        found.ok_or(ValidationError::UnknownName {
            what: "attribute",
            raw: raw.to_string(),
        })
    }
}

/// Entity kinds, each with a closed attribute schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A movable object. Accepts every attribute.
    PhysicalObject,
    /// Something other things land on.
    Surface,
    /// A body of liquid.
    Liquid,
}

impl Default for EntityKind {
    fn default() -> Self {
        Self::PhysicalObject
    }
}

impl EntityKind {
    /// The attributes an entity of this kind may carry.
    #[must_use]
    pub const fn schema(self) -> &'static [AttributeKey] {
        match self {
            Self::PhysicalObject => &AttributeKey::ALL,
            Self::Surface => &[
                AttributeKey::Material,
                AttributeKey::Phase,
                AttributeKey::IsHard,
                AttributeKey::IsElastic,
            ],
            Self::Liquid => &[AttributeKey::Phase, AttributeKey::MassKg],
        }
    }

    /// Returns true if `attribute` is in the schema.
    #[must_use]
    pub fn allows(self, attribute: AttributeKey) -> bool {
        self.schema().contains(&attribute)
    }

    /// Validates an attribute/value pair for an entity of this kind.
    pub fn check(self, attribute: AttributeKey, value: &Value) -> Result<(), ValidationError> {
        if !self.allows(attribute) {
            return Err(ValidationError::AttributeNotInSchema {
                attribute,
                kind: self.to_string(),
            });
        }
        attribute.check(value)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PhysicalObject => write!(f, "physical_object"),
            Self::Surface => write!(f, "surface"),
            Self::Liquid => write!(f, "liquid"),
        }
    }
}

/// Actions a scenario can perform on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Let it fall onto a hard floor.
    Drop,
    /// Hit it.
    Strike,
    /// Put it in water.
    Submerge,
}

impl Action {
    /// Every action, in declaration order.
    pub const ALL: [Self; 3] = [Self::Drop, Self::Strike, Self::Submerge];

    /// The lowercase name used in text and serialized forms.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Drop => "drop",
            Self::Strike => "strike",
            Self::Submerge => "submerge",
        }
    }

    /// Outcome attributes the sandbox reports for this action.
    #[must_use]
    pub const fn observables(self) -> &'static [AttributeKey] {
        match self {
            Self::Drop => &[AttributeKey::Shatters, AttributeKey::Bounces],
            Self::Strike => &[AttributeKey::Shatters],
            Self::Submerge => &[AttributeKey::Floats],
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let key = normalize_symbol(raw);
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == key)
            .ok_or(ValidationError::UnknownName {
                what: "action",
                raw: raw.to_string(),
            })
    }
}
