//! Value types that attributes and effects can hold.
//!
//! The value space is deliberately small: booleans, scalars and enum
//! symbols. Each attribute declares which of these it accepts (see
//! [`crate::schema::ValueKind`]), which keeps contradiction checks decidable.

use serde::{Deserialize, Serialize};

/// Possible values of an attribute.
///
/// # Examples
///
/// ```
/// use groundwork::Value;
///
/// let brittle = Value::Bool(true);
/// let mass = Value::Scalar(0.7);
/// let material = Value::symbol("Glass");
///
/// assert!(brittle.is_bool());
/// assert_eq!(mass.as_scalar(), Some(0.7));
/// assert_eq!(material.as_symbol(), Some("glass"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// A truth value.
    Bool(bool),
    /// A number, e.g. a mass in kilograms.
    Scalar(f64),
    /// An enum symbol, e.g. a material.
    Symbol(String),
}

impl Value {
    /// Creates a normalized enum symbol (trimmed, lowercase, spaces as underscores).
    #[must_use]
    pub fn symbol(raw: impl AsRef<str>) -> Self {
        Self::Symbol(normalize_symbol(raw.as_ref()))
    }

    /// Returns true for booleans.
    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    /// Returns true for numbers.
    pub const fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }

    /// Returns true for symbols.
    pub const fn is_symbol(&self) -> bool {
        matches!(self, Self::Symbol(_))
    }

    /// The boolean, if this is one.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The number, if this is one.
    pub const fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    /// The symbol, if this is one.
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Self::Symbol(v) => Some(v),
            _ => None,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Scalar(_) => "scalar",
            Self::Symbol(_) => "symbol",
        }
    }

    /// Canonical text used for fingerprints and pair keys.
    ///
    /// Scalars use the shortest round-trip representation, so `0.70` and
    /// `0.7` produce the same text.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Self::Bool(v) => format!("b:{v}"),
            Self::Scalar(v) => format!("s:{v:?}"),
            Self::Symbol(v) => format!("e:{v}"),
        }
    }
}

pub(crate) fn normalize_symbol(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Scalar(v) => write!(f, "{v}"),
            Self::Symbol(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Scalar(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Scalar(f64::from(v))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Scalar(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::symbol(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::symbol(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_bool() {
        let val = Value::Bool(true);
        assert!(val.is_bool());
        assert_eq!(val.as_bool(), Some(true));
        assert_eq!(val.type_name(), "bool");
    }

    #[test]
    fn test_value_scalar() {
        let val = Value::from(3);
        assert!(val.is_scalar());
        assert_eq!(val.as_scalar(), Some(3.0));
        assert!(val.as_bool().is_none());
    }

    #[test]
    fn test_symbol_is_normalized() {
        let val = Value::from("  Porcelain  China ");
        assert_eq!(val.as_symbol(), Some("porcelain_china"));
        assert_eq!(val, Value::symbol("porcelain china"));
    }

    #[test]
    fn test_canonical_is_stable_for_equal_scalars() {
        assert_eq!(Value::Scalar(0.70).canonical(), Value::Scalar(0.7).canonical());
        assert_ne!(Value::Bool(true).canonical(), Value::symbol("true").canonical());
    }

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", Value::Bool(false)), "false");
        assert_eq!(format!("{}", Value::Scalar(0.5)), "0.5");
        assert_eq!(format!("{}", Value::symbol("glass")), "glass");
    }

    #[test]
    fn test_value_serialization() {
        let val = Value::symbol("rubber");
        let json = serde_json::to_string(&val).unwrap();
        assert!(json.contains("\"symbol\""));
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(val, back);
    }
}
