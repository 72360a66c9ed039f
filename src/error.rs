//! Error types for Groundwork.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! the exact condition. `NoApplicableBelief` in particular is an expected
//! "I don't know" answer, not a fault.

use thiserror::Error;

use crate::belief::BeliefId;
use crate::schema::{Action, AttributeKey};

/// Validation errors raised at a boundary before anything is stored.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// A confidence outside `[0.0, 1.0]` or not finite.
    #[error("Confidence value {value} is out of range [0.0, 1.0]")]
    ConfidenceOutOfRange {
        /// The rejected value.
        value: f32,
    },

    /// A name that is empty after canonicalization.
    #[error("Name cannot be empty")]
    EmptyName,

    /// A required field was not supplied.
    #[error("Required field '{field}' is missing")]
    MissingField {
        /// Name of the missing field.
        field: String,
    },

    /// A value of the wrong kind for its attribute.
    #[error("Attribute '{attribute}' expects a {expected} value, got {actual}")]
    ValueKindMismatch {
        /// The attribute being set.
        attribute: AttributeKey,
        /// The kind the attribute accepts.
        expected: String,
        /// The value that was offered.
        actual: String,
    },

    /// An enum symbol outside the attribute's allowed set.
    #[error("Symbol '{symbol}' is not allowed for attribute '{attribute}'")]
    UnknownSymbol {
        /// The attribute being set.
        attribute: AttributeKey,
        /// The offending symbol.
        symbol: String,
    },

    /// The attribute is not allowed for the entity kind.
    #[error("Attribute '{attribute}' is not part of the {kind} schema")]
    AttributeNotInSchema {
        /// The attribute being set.
        attribute: AttributeKey,
        /// The entity kind whose schema excludes it.
        kind: String,
    },

    /// A name that parses to no known attribute, action or kind.
    #[error("Unknown {what}: '{raw}'")]
    UnknownName {
        /// What was being parsed.
        what: &'static str,
        /// The unparsed input.
        raw: String,
    },

    /// A configuration value out of range.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with it.
        reason: String,
    },
}

/// Execution errors raised while operating on the knowledge base.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A proposal or seed repeats a live belief's rule.
    #[error("Rule already exists as belief {existing}")]
    DuplicateRule {
        /// The belief that already holds the rule.
        existing: BeliefId,
    },

    /// An optimistic commit lost a race.
    #[error("Belief {id} changed since it was read (expected version {expected}, found {actual})")]
    StaleBelief {
        /// The belief being committed.
        id: BeliefId,
        /// The version the caller read.
        expected: u64,
        /// The version found at commit time.
        actual: u64,
    },

    /// Nothing admissible is known. Callers render this as "unknown".
    #[error("No applicable belief for {action} on '{entity}'")]
    NoApplicableBelief {
        /// Canonical name of the queried entity.
        entity: String,
        /// The queried action.
        action: Action,
    },

    /// Another validation holds the belief's lease.
    #[error("Validation already in progress for belief {id}")]
    ValidationInProgress {
        /// The leased belief.
        id: BeliefId,
    },

    /// The sandbox did not answer in time.
    #[error("Simulation timed out after {duration_ms}ms")]
    SimulationTimeout {
        /// The timeout that expired.
        duration_ms: u64,
    },

    /// The sandbox reported no observation.
    #[error("Simulation failed: {reason}")]
    SimulationFailure {
        /// The sandbox's explanation.
        reason: String,
    },

    /// A verdict would contradict the active belief for the same pair.
    #[error("Belief {candidate} contradicts active belief {active} on {attribute}")]
    ContradictionDetected {
        /// The belief under validation.
        candidate: BeliefId,
        /// The belief currently active for the pair.
        active: BeliefId,
        /// The attribute they disagree on.
        attribute: AttributeKey,
    },

    /// Too many inconclusive verdicts in a row.
    #[error("Belief {id} stayed inconclusive after {attempts} attempts")]
    InconclusiveExhausted {
        /// The belief under validation.
        id: BeliefId,
        /// Attempts made.
        attempts: u32,
    },

    /// Cultural knowledge cannot be tested before genesis completes.
    #[error("Belief {id} is waiting for genesis to finish (filter is {phase})")]
    GenesisPending {
        /// The cultural belief.
        id: BeliefId,
        /// The filter phase at the time of the request.
        phase: String,
    },

    /// No belief with this id.
    #[error("Belief not found: {id}")]
    BeliefNotFound {
        /// The missing id.
        id: BeliefId,
    },

    /// The belief's status does not allow the requested change.
    #[error("Invalid transition for belief {id}: {reason}")]
    InvalidTransition {
        /// The belief being changed.
        id: BeliefId,
        /// Why the change is refused.
        reason: String,
    },

    /// The worker pool's queue has no room.
    #[error("Validation queue is full (capacity {capacity})")]
    QueueFull {
        /// The queue's capacity.
        capacity: usize,
    },

    /// The worker pool has shut down.
    #[error("Validation worker pool disconnected")]
    Disconnected,

    /// Lock poisoning, journal I/O or a corrupt snapshot.
    #[error("Storage error: {message}")]
    Storage {
        /// What failed.
        message: String,
    },
}

/// Top-level error type for Groundwork.
#[derive(Debug, Error)]
pub enum GroundError {
    /// Bad input.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A failed operation.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// A broken internal invariant.
    #[error("Internal error: {message}")]
    Internal {
        /// What went wrong.
        message: String,
    },
}

impl GroundError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::Storage {
            message: message.into(),
        })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true for the reasoning gap, which callers should render as "unknown".
    #[must_use]
    pub const fn is_no_applicable_belief(&self) -> bool {
        matches!(
            self,
            Self::Execution(ExecutionError::NoApplicableBelief { .. })
        )
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Internal { .. } => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::StaleBelief { .. }
                    | ExecutionError::ValidationInProgress { .. }
                    | ExecutionError::SimulationTimeout { .. }
                    | ExecutionError::SimulationFailure { .. }
                    | ExecutionError::QueueFull { .. }
            ),
        }
    }
}

/// Result type alias for Groundwork operations.
pub type GroundResult<T> = Result<T, GroundError>;
