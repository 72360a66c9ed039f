//! Contradictions between beliefs.
//!
//! Contradictions are explicit objects, not hidden errors. When a verdict
//! would activate a belief that disagrees with the active belief for the
//! same pair, a Conflict is recorded and the older belief goes back under
//! test. Nothing is overwritten.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::belief::BeliefId;
use crate::rule::PairKey;
use crate::value::Value;

/// Unique identifier for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(Uuid);

impl ConflictId {
    /// Creates a new random conflict ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a conflict still awaits resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    /// The active belief is queued for revalidation.
    #[default]
    Open,

    /// One side was superseded, corrected or rejected.
    Resolved,
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

/// How a contradiction ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Revalidation replaced the active belief.
    ActiveReplaced {
        /// The belief now active for the pair.
        by: BeliefId,
    },
    /// The candidate ran out of deferrals.
    CandidateRejected,
    /// The candidate was itself superseded before the contradiction settled.
    CandidateWithdrawn,
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActiveReplaced { by } => write!(f, "active_replaced({by})"),
            Self::CandidateRejected => write!(f, "candidate_rejected"),
            Self::CandidateWithdrawn => write!(f, "candidate_withdrawn"),
        }
    }
}

/// A contradiction between a candidate verdict and the active belief.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    /// Unique identifier.
    pub id: ConflictId,
    /// The pair both beliefs are about.
    pub pair: PairKey,

    /// The belief whose verdict was deferred.
    pub candidate: BeliefId,

    /// The belief that was active for the pair.
    pub active: BeliefId,

    /// Effect value the candidate would have activated.
    pub candidate_value: Value,
    /// Effect value of the active belief.
    pub active_value: Value,

    /// When the contradiction was detected.
    pub detected_at: DateTime<Utc>,
    /// Open or resolved.
    pub status: ConflictStatus,

    /// How it was resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,

    /// When it was resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Conflict {
    /// Records an open contradiction.
    #[must_use]
    pub fn new(
        pair: PairKey,
        candidate: BeliefId,
        candidate_value: Value,
        active: BeliefId,
        active_value: Value,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            pair,
            candidate,
            active,
            candidate_value,
            active_value,
            detected_at: Utc::now(),
            status: ConflictStatus::Open,
            resolution: None,
            resolved_at: None,
        }
    }

    /// Returns true until the conflict is resolved.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == ConflictStatus::Open
    }

    /// Returns true if `id` is one side of this conflict.
    #[must_use]
    pub fn involves(&self, id: BeliefId) -> bool {
        self.candidate == id || self.active == id
    }

    /// Closes the conflict.
    pub fn resolve(&mut self, resolution: ConflictResolution) {
        self.status = ConflictStatus::Resolved;
        self.resolution = Some(resolution);
        self.resolved_at = Some(Utc::now());
    }
}

impl PartialEq for Conflict {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Conflict {}

impl std::hash::Hash for Conflict {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} says {}, {} says {} [{}]",
            self.pair,
            self.candidate,
            self.candidate_value,
            self.active,
            self.active_value,
            self.status
        )
    }
}
