//! Comparing predicted and observed outcomes.

use crate::config::TolerancePolicy;
use crate::value::Value;

impl TolerancePolicy {
    /// Whether an observation agrees with a prediction.
    ///
    /// `declared` is the sandbox's own tolerance for the observation; it
    /// only widens the scalar bound when the policy honours it.
    #[must_use]
    pub fn matches(&self, predicted: &Value, observed: &Value, declared: f64) -> bool {
        match (predicted, observed) {
            (Value::Scalar(a), Value::Scalar(b)) => {
                if !a.is_finite() || !b.is_finite() {
                    return false;
                }
                let declared = if self.honor_observed_tolerance && declared.is_finite() {
                    declared.abs()
                } else {
                    0.0
                };
                let bound = self
                    .absolute_epsilon
                    .max(self.relative_epsilon * a.abs().max(b.abs()))
                    .max(declared);
                (a - b).abs() <= bound
            }
            (predicted, observed) => predicted == observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booleans_and_symbols_are_exact() {
        let policy = TolerancePolicy::default();
        assert!(policy.matches(&Value::Bool(true), &Value::Bool(true), 0.5));
        assert!(!policy.matches(&Value::Bool(true), &Value::Bool(false), 0.5));
        assert!(policy.matches(&Value::symbol("glass"), &Value::symbol("glass"), 0.0));
        assert!(!policy.matches(&Value::symbol("glass"), &Value::symbol("wood"), 1.0));
        assert!(!policy.matches(&Value::Bool(true), &Value::Scalar(1.0), 1.0));
    }

    #[test]
    fn test_scalar_bounds() {
        let policy = TolerancePolicy::default();
        assert!(policy.matches(&Value::Scalar(1.0), &Value::Scalar(1.000_000_5), 0.0));
        // relative: 0.1% of 1000
        assert!(policy.matches(&Value::Scalar(1000.0), &Value::Scalar(1000.9), 0.0));
        assert!(!policy.matches(&Value::Scalar(1000.0), &Value::Scalar(1002.0), 0.0));
        assert!(policy.matches(&Value::Scalar(1000.0), &Value::Scalar(1002.0), 5.0));
        assert!(!policy.matches(&Value::Scalar(f64::NAN), &Value::Scalar(f64::NAN), 1.0));
    }

    #[test]
    fn test_exact_policy_ignores_declared_tolerance() {
        let policy = TolerancePolicy::exact();
        assert!(policy.matches(&Value::Scalar(2.5), &Value::Scalar(2.5), 0.0));
        assert!(!policy.matches(&Value::Scalar(2.5), &Value::Scalar(2.6), 1.0));
    }
}
