//! Engine configuration.
//!
//! Every section has sane defaults, derives serde so a whole
//! [`EngineConfig`] can come from a JSON file, and validates itself before
//! anything is started.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GroundResult, ValidationError};

fn invalid(reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidConfig {
        reason: reason.into(),
    }
}

/// Local retry with capped exponential backoff.
///
/// Used for optimistic commit conflicts and busy leases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries (not counting the first attempt).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound for the doubled delay.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_delay_ms: 5,
            max_delay_ms: 200,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Checks that the initial delay does not exceed the cap.
    pub fn validate(self) -> GroundResult<Self> {
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(invalid("retry initial_delay_ms must not exceed max_delay_ms").into());
        }
        Ok(self)
    }
}

/// How observed outcomes are compared with predictions.
///
/// Booleans and symbols compare exactly. Two scalars match when
/// `|a - b| <= max(absolute_epsilon, relative_epsilon * max(|a|, |b|), observed)`,
/// where `observed` is the sandbox's declared tolerance if
/// `honor_observed_tolerance` is set and zero otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TolerancePolicy {
    /// Smallest difference always tolerated.
    pub absolute_epsilon: f64,
    /// Difference tolerated relative to the larger magnitude.
    pub relative_epsilon: f64,
    /// Widen the window to the tolerance the sandbox declares.
    pub honor_observed_tolerance: bool,
}

impl Default for TolerancePolicy {
    fn default() -> Self {
        Self {
            absolute_epsilon: 1e-6,
            relative_epsilon: 1e-3,
            honor_observed_tolerance: true,
        }
    }
}

impl TolerancePolicy {
    /// Bit-for-bit comparison, ignoring any declared tolerance.
    #[must_use]
    pub const fn exact() -> Self {
        Self {
            absolute_epsilon: 0.0,
            relative_epsilon: 0.0,
            honor_observed_tolerance: false,
        }
    }

    /// Checks that both epsilons are finite and non-negative.
    pub fn validate(self) -> GroundResult<Self> {
        let ok = |v: f64| v.is_finite() && v >= 0.0;
        if !ok(self.absolute_epsilon) || !ok(self.relative_epsilon) {
            return Err(invalid("tolerance epsilons must be finite and non-negative").into());
        }
        Ok(self)
    }
}

/// Reality filter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Validation worker threads.
    pub workers: usize,
    /// Maximum queued validation jobs.
    pub queue_capacity: usize,
    /// How long a worker waits for one sandbox call.
    pub sandbox_timeout_ms: u64,
    /// Inconclusive verdicts tolerated before an unverified belief is rejected.
    pub max_attempts: u32,
    /// Contradiction deferrals tolerated before a candidate is rejected.
    pub max_deferrals: u32,
    /// Backoff for stale commits and busy leases.
    pub commit_retry: RetryPolicy,
    /// How observations are compared with predictions.
    pub tolerance: TolerancePolicy,
    /// Lower bound applied to a belief's confidence when it is confirmed.
    pub verified_confidence_floor: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            sandbox_timeout_ms: 2000,
            max_attempts: 3,
            max_deferrals: 3,
            commit_retry: RetryPolicy::default(),
            tolerance: TolerancePolicy::default(),
            verified_confidence_floor: 0.9,
        }
    }
}

impl FilterConfig {
    /// `sandbox_timeout_ms` as a `Duration`.
    #[must_use]
    pub const fn sandbox_timeout(&self) -> Duration {
        Duration::from_millis(self.sandbox_timeout_ms)
    }

    /// Checks the bounds of every field, nested policies included.
    pub fn validate(self) -> GroundResult<Self> {
        if self.workers == 0 {
            return Err(invalid("filter.workers must be at least 1").into());
        }
        if self.queue_capacity == 0 {
            return Err(invalid("filter.queue_capacity must be at least 1").into());
        }
        if self.sandbox_timeout_ms == 0 {
            return Err(invalid("filter.sandbox_timeout_ms must be positive").into());
        }
        if self.max_attempts == 0 {
            return Err(invalid("filter.max_attempts must be at least 1").into());
        }
        if !(0.0..=1.0).contains(&self.verified_confidence_floor) {
            return Err(invalid("filter.verified_confidence_floor must be in [0, 1]").into());
        }
        Ok(Self {
            commit_retry: self.commit_retry.validate()?,
            tolerance: self.tolerance.validate()?,
            ..self
        })
    }
}

/// Knowledge store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Write-ahead journal location. `None` keeps the store in memory only.
    pub journal_path: Option<PathBuf>,
    /// Fsync the journal after every append.
    pub sync_on_write: bool,
    /// Journal size that triggers compaction on flush.
    pub max_journal_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            journal_path: None,
            sync_on_write: true,
            max_journal_bytes: 64 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// A journaled store at `path`.
    #[must_use]
    pub fn journaled(path: impl Into<PathBuf>) -> Self {
        Self {
            journal_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Checks the compaction threshold.
    pub fn validate(self) -> GroundResult<Self> {
        if self.max_journal_bytes < 1024 {
            return Err(invalid("store.max_journal_bytes must be at least 1 KiB").into());
        }
        Ok(self)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reality filter settings.
    pub filter: FilterConfig,
    /// Knowledge store settings.
    pub store: StoreConfig,
}

impl EngineConfig {
    /// Parses and validates a JSON configuration. Missing fields take defaults.
    pub fn from_json_str(text: &str) -> GroundResult<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| invalid(format!("malformed configuration: {e}")))?;
        config.validate()
    }

    /// Validates every section.
    pub fn validate(self) -> GroundResult<Self> {
        Ok(Self {
            filter: self.filter.validate()?,
            store: self.store.validate()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default().validate().unwrap();
        assert_eq!(config.filter.workers, 4);
        assert_eq!(config.filter.max_attempts, 3);
        assert_eq!(config.filter.sandbox_timeout(), Duration::from_secs(2));
        assert!(config.store.journal_path.is_none());
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json_str(
            r#"{"filter": {"workers": 2, "tolerance": {"relative_epsilon": 0.01}}}"#,
        )
        .unwrap();
        assert_eq!(config.filter.workers, 2);
        assert_eq!(config.filter.queue_capacity, 1024);
        assert!((config.filter.tolerance.relative_epsilon - 0.01).abs() < f64::EPSILON);
        assert!(config.filter.tolerance.honor_observed_tolerance);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = EngineConfig::from_json_str("{not json").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let zero_workers = FilterConfig {
            workers: 0,
            ..FilterConfig::default()
        };
        assert!(zero_workers.validate().is_err());

        let bad_floor = FilterConfig {
            verified_confidence_floor: 1.5,
            ..FilterConfig::default()
        };
        assert!(bad_floor.validate().is_err());

        let bad_retry = RetryPolicy {
            initial_delay_ms: 500,
            max_delay_ms: 10,
            ..RetryPolicy::default()
        };
        assert!(bad_retry.validate().is_err());

        let bad_tolerance = TolerancePolicy {
            absolute_epsilon: -1.0,
            ..TolerancePolicy::default()
        };
        assert!(bad_tolerance.validate().is_err());
    }
}
