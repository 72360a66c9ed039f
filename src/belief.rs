//! Beliefs: causal rules with a verification status.
//!
//! A Belief is not just a rule; it is a claim about reality that carries
//! where it came from, how far it has been tested, and which earlier
//! belief it replaced.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::confidence::Confidence;
use crate::error::ValidationError;
use crate::record::RecordId;
use crate::rule::{CausalRule, PairKey, RuleFingerprint};

/// Unique identifier for a belief.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BeliefId(Uuid);

impl BeliefId {
    /// Creates a new random belief ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BeliefId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BeliefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Verification status of a belief.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeliefStatus {
    /// Not yet tested.
    #[default]
    Unverified,
    /// Confirmed by the sandbox.
    Verified,
    /// Learned from what the sandbox observed when it falsified another belief.
    Corrected,
    /// Removed from consideration. Terminal.
    Rejected,
}

impl BeliefStatus {
    /// Verified or corrected: backed by a sandbox verdict.
    #[must_use]
    pub const fn is_grounded(self) -> bool {
        matches!(self, Self::Verified | Self::Corrected)
    }
}

impl fmt::Display for BeliefStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unverified => write!(f, "unverified"),
            Self::Verified => write!(f, "verified"),
            Self::Corrected => write!(f, "corrected"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Where a belief stands, combining its status with its supersession links.
///
/// Status alone does not say whether a belief still counts: a falsified
/// candidate keeps `Unverified` and a falsified active belief keeps
/// `Verified`, both retained for audit behind the correction that replaced
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Unverified and waiting for a first verdict.
    Candidate,
    /// Verified or corrected and authoritative for its pair.
    Active,
    /// Replaced by a correction after the sandbox contradicted it.
    Falsified,
    /// Deactivated in favour of a newer grounded belief that agrees with it.
    Retired,
    /// Rejected without ever becoming active.
    Rejected,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Candidate => write!(f, "candidate"),
            Self::Active => write!(f, "active"),
            Self::Falsified => write!(f, "falsified"),
            Self::Retired => write!(f, "retired"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Where a belief came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum Provenance {
    /// Pre-seeded worldview loaded at startup.
    Genesis {
        /// Name of the worldview.
        source: String,
    },

    /// Proposed by the language interface from a document.
    CulturalLearning {
        /// Name of the document or interface.
        source: String,
        /// The text the proposal was read from.
        snippet: String,
    },

    /// Learned from a falsifying sandbox observation.
    Correction {
        /// The validation record holding the observation.
        record: RecordId,
        /// The belief the observation falsified.
        corrects: BeliefId,
    },
}

impl Provenance {
    /// A seed from the named worldview.
    #[must_use]
    pub fn genesis(source: impl Into<String>) -> Self {
        Self::Genesis {
            source: source.into(),
        }
    }

    /// A proposal read from a document.
    #[must_use]
    pub fn cultural(source: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self::CulturalLearning {
            source: source.into(),
            snippet: snippet.into(),
        }
    }

    /// Returns true for seeded beliefs.
    #[must_use]
    pub const fn is_genesis(&self) -> bool {
        matches!(self, Self::Genesis { .. })
    }

    /// Returns true for beliefs learned from text.
    #[must_use]
    pub const fn is_cultural(&self) -> bool {
        matches!(self, Self::CulturalLearning { .. })
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Genesis { source } => write!(f, "genesis({source})"),
            Self::CulturalLearning { source, .. } => write!(f, "cultural({source})"),
            Self::Correction { corrects, .. } => write!(f, "correction(of {corrects})"),
        }
    }
}

/// Why a belief ended up rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    /// The sandbox never gave a usable answer.
    InconclusiveExhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// No action makes the effect observable.
    Untestable,
    /// Deferred too often against an active belief that kept its ground.
    UnresolvedContradiction {
        /// The active belief it contradicted.
        active: BeliefId,
    },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InconclusiveExhausted { attempts } => {
                write!(f, "inconclusive after {attempts} attempts")
            }
            Self::Untestable => write!(f, "untestable"),
            Self::UnresolvedContradiction { active } => {
                write!(f, "unresolved contradiction with {active}")
            }
        }
    }
}

/// A causal rule plus verification status and provenance.
///
/// Beliefs are records in the store's arena. They never hold references
/// to each other, only ids: `corrects` names the falsified belief a
/// correction replaced, `supersedes` the prior active belief for the same
/// pair, and `superseded_by` the belief that took over from this one.
///
/// # Examples
///
/// ```
/// use groundwork::{
///     AttributeKey, Belief, BeliefStatus, CausalRule, Confidence, Effect, EntityPattern,
///     Provenance,
/// };
///
/// let rule = CausalRule::new(
///     EntityPattern::entity("rubber_ball"),
///     Default::default(),
///     Effect::new(AttributeKey::IsBrittle, true).unwrap(),
/// );
/// let belief = Belief::builder()
///     .rule(rule)
///     .confidence(Confidence::new(0.6).unwrap())
///     .provenance(Provenance::genesis("worldview"))
///     .build()
///     .unwrap();
///
/// assert_eq!(belief.status, BeliefStatus::Unverified);
/// assert!(belief.is_candidate());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Belief {
    /// Unique identifier.
    pub id: BeliefId,
    /// What the belief claims.
    pub rule: CausalRule,
    /// Fingerprint of `rule`, used to refuse duplicates.
    pub fingerprint: RuleFingerprint,
    /// Stored status. See [`Belief::lifecycle`] for the derived view.
    pub status: BeliefStatus,
    /// How much the belief is trusted.
    pub confidence: Confidence,
    /// Where the belief came from.
    pub provenance: Provenance,
    /// When the belief was created.
    pub created_at: DateTime<Utc>,

    /// When the sandbox last ran against this belief.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tested_at: Option<DateTime<Utc>>,

    /// When the belief last received a confirming or correcting verdict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,

    /// Bumped on every mutation; the basis of optimistic commits.
    pub version: u64,

    /// Consecutive inconclusive verdicts.
    #[serde(default)]
    pub attempts: u32,

    /// Verdicts held back because they contradicted the active belief.
    #[serde(default)]
    pub deferrals: u32,

    /// Set when a contradiction put this (active) belief back under test.
    #[serde(default)]
    pub needs_revalidation: bool,

    /// The falsified belief this correction replaced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrects: Option<BeliefId>,

    /// The belief this one deactivated for its pair.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<BeliefId>,

    /// The belief that replaced this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<BeliefId>,

    /// The validation record that falsified this belief.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub falsified_by: Option<RecordId>,

    /// Why the belief was rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<RejectionReason>,
}

impl Belief {
    /// Creates a new builder.
    pub fn builder() -> BeliefBuilder {
        BeliefBuilder::new()
    }

    /// The (pattern, attribute) pair this belief is about.
    #[must_use]
    pub fn pair(&self) -> PairKey {
        self.rule.pair()
    }

    /// Returns true if this belief is authoritative for its pair.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.is_grounded() && self.superseded_by.is_none()
    }

    /// Returns true if this belief is still waiting for its first verdict.
    #[must_use]
    pub fn is_candidate(&self) -> bool {
        self.status == BeliefStatus::Unverified && self.superseded_by.is_none()
    }

    /// Returns true if a newer belief replaced this one.
    #[must_use]
    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some()
    }

    /// Returns true if a correction replaced this belief.
    #[must_use]
    pub fn is_falsified(&self) -> bool {
        self.falsified_by.is_some()
    }

    /// Where this belief stands, derived from its status and supersession links.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        if self.status == BeliefStatus::Rejected {
            Lifecycle::Rejected
        } else if self.is_falsified() {
            Lifecycle::Falsified
        } else if self.is_superseded() {
            Lifecycle::Retired
        } else if self.status.is_grounded() {
            Lifecycle::Active
        } else {
            Lifecycle::Candidate
        }
    }

    /// Returns true if the belief can still be scheduled for a test.
    #[must_use]
    pub fn is_testable(&self) -> bool {
        self.is_candidate() || (self.is_active() && self.needs_revalidation)
    }

    fn touch(&mut self) {
        self.version += 1;
    }

    pub(crate) fn mark_tested(&mut self, at: DateTime<Utc>) {
        self.last_tested_at = Some(at);
        self.touch();
    }

    /// Confirmation. Repeating it with the same inputs leaves status and
    /// confidence unchanged.
    pub(crate) fn mark_confirmed(&mut self, confidence: Confidence, at: DateTime<Utc>) {
        self.status = BeliefStatus::Verified;
        self.confidence = self.confidence.max(confidence);
        self.attempts = 0;
        self.needs_revalidation = false;
        self.last_tested_at = Some(at);
        self.verified_at = Some(at);
        self.touch();
    }

    pub(crate) fn mark_inconclusive(&mut self, at: DateTime<Utc>) -> u32 {
        self.attempts += 1;
        self.last_tested_at = Some(at);
        self.touch();
        self.attempts
    }

    pub(crate) fn mark_deferred(&mut self, at: DateTime<Utc>) -> u32 {
        self.deferrals += 1;
        self.last_tested_at = Some(at);
        self.touch();
        self.deferrals
    }

    pub(crate) fn mark_rejected(&mut self, reason: RejectionReason) {
        self.status = BeliefStatus::Rejected;
        self.rejection = Some(reason);
        self.touch();
    }

    /// Falsified by `record` and replaced by the correction `by`.
    pub(crate) fn mark_falsified(&mut self, record: RecordId, by: BeliefId, at: DateTime<Utc>) {
        self.falsified_by = Some(record);
        self.superseded_by = Some(by);
        self.needs_revalidation = false;
        self.last_tested_at = Some(at);
        self.touch();
    }

    pub(crate) fn mark_superseded(&mut self, by: BeliefId) {
        self.superseded_by = Some(by);
        self.needs_revalidation = false;
        self.touch();
    }

    /// Puts an active belief back under test with a fresh attempt budget.
    pub(crate) fn mark_for_revalidation(&mut self) {
        self.needs_revalidation = true;
        self.attempts = 0;
        self.touch();
    }

    /// Stops revalidating without touching status; the belief stays active.
    pub(crate) fn abandon_revalidation(&mut self) {
        self.needs_revalidation = false;
    }
}

impl PartialEq for Belief {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Belief {}

impl std::hash::Hash for Belief {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Builder for creating Belief instances.
#[derive(Debug, Default)]
pub struct BeliefBuilder {
    id: Option<BeliefId>,
    rule: Option<CausalRule>,
    status: Option<BeliefStatus>,
    confidence: Option<Confidence>,
    provenance: Option<Provenance>,
    corrects: Option<BeliefId>,
    created_at: Option<DateTime<Utc>>,
}

impl BeliefBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the belief ID (optional, will be generated if not set).
    #[must_use]
    pub fn id(mut self, id: BeliefId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the rule (required).
    #[must_use]
    pub fn rule(mut self, rule: CausalRule) -> Self {
        self.rule = Some(rule);
        self
    }

    /// Sets the initial status. Defaults to unverified.
    #[must_use]
    pub fn status(mut self, status: BeliefStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the confidence (required).
    #[must_use]
    pub fn confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Sets the provenance (required).
    #[must_use]
    pub fn provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    /// Links a correction to the belief it replaces.
    #[must_use]
    pub fn corrects(mut self, corrects: BeliefId) -> Self {
        self.corrects = Some(corrects);
        self
    }

    /// Overrides the creation time.
    #[must_use]
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Builds the Belief.
    ///
    /// Returns `ValidationError` if the rule or provenance is missing, the
    /// rule does not fit the schema, or the initial status is `Rejected`.
    pub fn build(self) -> Result<Belief, ValidationError> {
        let rule = self.rule.ok_or(ValidationError::MissingField {
            field: "rule".to_string(),
        })?;
        rule.validate()?;

        let provenance = self.provenance.ok_or(ValidationError::MissingField {
            field: "provenance".to_string(),
        })?;

        let status = self.status.unwrap_or_default();
        if status == BeliefStatus::Rejected {
            return Err(ValidationError::InvalidConfig {
                reason: "a belief cannot be created rejected".to_string(),
            });
        }

        let created_at = self.created_at.unwrap_or_else(Utc::now);
        Ok(Belief {
            id: self.id.unwrap_or_else(BeliefId::new),
            fingerprint: rule.fingerprint(),
            rule,
            status,
            confidence: self.confidence.unwrap_or_default(),
            provenance,
            created_at,
            last_tested_at: None,
            verified_at: status.is_grounded().then_some(created_at),
            version: 1,
            attempts: 0,
            deferrals: 0,
            needs_revalidation: false,
            corrects: self.corrects,
            supersedes: None,
            superseded_by: None,
            falsified_by: None,
            rejection: None,
        })
    }
}
