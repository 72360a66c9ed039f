//! Bounded confidence values.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A confidence in `[0.0, 1.0]`.
///
/// The bound is enforced on construction and on deserialization, so a
/// `Confidence` read back from a journal is as trustworthy as one built in
/// process.
///
/// # Examples
///
/// ```
/// use groundwork::Confidence;
///
/// let conf = Confidence::new(0.95).unwrap();
/// assert_eq!(conf.value(), 0.95);
/// assert!(Confidence::new(1.5).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct Confidence(f32);

impl Confidence {
    /// Minimum valid confidence value.
    pub const MIN_VALUE: f32 = 0.0;

    /// Maximum valid confidence value.
    pub const MAX_VALUE: f32 = 1.0;

    /// Full certainty.
    pub const CERTAIN: Self = Self(1.0);

    /// Creates a new confidence with validation.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ConfidenceOutOfRange` if the value is not in [0.0, 1.0].
    pub fn new(value: f32) -> Result<Self, ValidationError> {
        if !value.is_finite() || !(Self::MIN_VALUE..=Self::MAX_VALUE).contains(&value) {
            return Err(ValidationError::ConfidenceOutOfRange { value });
        }
        Ok(Self(value))
    }

    /// Creates a confidence, clamping out-of-range input into bounds.
    ///
    /// Non-finite input maps to zero.
    #[must_use]
    pub fn clamped(value: f32) -> Self {
        if value.is_finite() {
            Self(value.clamp(Self::MIN_VALUE, Self::MAX_VALUE))
        } else {
            Self(Self::MIN_VALUE)
        }
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn value(self) -> f32 {
        self.0
    }

    /// Returns the larger of two confidences.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        if other.0 > self.0 {
            other
        } else {
            self
        }
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self(0.5)
    }
}

impl TryFrom<f32> for Confidence {
    type Error = ValidationError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Confidence> for f32 {
    fn from(c: Confidence) -> Self {
        c.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}
