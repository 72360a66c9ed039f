//! Local retry for optimistic-commit conflicts and busy leases.

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::config::RetryPolicy;
use crate::error::{ExecutionError, GroundError, GroundResult};

impl RetryPolicy {
    /// Delay before retry number `step + 1`.
    ///
    /// Exponential backoff: `initial_delay * 2^step`, capped at `max_delay`.
    #[must_use]
    pub fn delay(&self, step: u32) -> Duration {
        let base = self.initial_delay_ms.saturating_mul(1u64 << step.min(32));
        Duration::from_millis(base.min(self.max_delay_ms))
    }
}

/// Conflicts that resolve themselves once the competing writer is done.
fn is_transient_conflict(err: &GroundError) -> bool {
    matches!(
        err,
        GroundError::Execution(
            ExecutionError::StaleBelief { .. } | ExecutionError::ValidationInProgress { .. }
        )
    )
}

/// Runs `op` until it succeeds, fails with a non-conflict error, or the
/// policy runs out of retries. `op` receives the attempt number, starting
/// at zero.
pub(crate) fn retry<T>(
    policy: &RetryPolicy,
    context: &'static str,
    mut op: impl FnMut(u32) -> GroundResult<T>,
) -> GroundResult<T> {
    let mut attempt = 0;
    loop {
        match op(attempt) {
            Err(err) if attempt < policy.max_retries && is_transient_conflict(&err) => {
                let delay = policy.delay(attempt);
                debug!(
                    context,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after conflict"
                );
                thread::sleep(delay);
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belief::BeliefId;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(5));
        assert_eq!(policy.delay(1), Duration::from_millis(10));
        assert_eq!(policy.delay(3), Duration::from_millis(40));
        assert_eq!(policy.delay(10), Duration::from_millis(200));
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(200));
    }

    #[test]
    fn test_retries_stale_until_success() {
        let id = BeliefId::new();
        let result = retry(&fast(), "test", |attempt| {
            if attempt < 2 {
                Err(ExecutionError::StaleBelief {
                    id,
                    expected: 1,
                    actual: 2,
                }
                .into())
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let id = BeliefId::new();
        let mut calls = 0;
        let err = retry(&fast(), "test", |_| -> GroundResult<()> {
            calls += 1;
            Err(ExecutionError::ValidationInProgress { id }.into())
        })
        .unwrap_err();
        assert_eq!(calls, 4);
        assert!(matches!(
            err,
            GroundError::Execution(ExecutionError::ValidationInProgress { .. })
        ));
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let mut calls = 0;
        let err = retry(&fast(), "test", |_| -> GroundResult<()> {
            calls += 1;
            Err(ExecutionError::SimulationTimeout { duration_ms: 5 }.into())
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(err.is_retryable());
    }
}
