//! Status transitions and how they are planned against the store.
//!
//! A transition is planned against a read of the current state and turned
//! into a [`ChangeSet`]. Planning fails with `StaleBelief` when the caller's
//! view is out of date: the belief's version moved, or a different belief
//! became active for its pair.

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::belief::{Belief, BeliefId, BeliefStatus, Provenance, RejectionReason};
use crate::confidence::Confidence;
use crate::conflict::{Conflict, ConflictId, ConflictResolution};
use crate::entity::{Entity, EntityId};
use crate::error::{ExecutionError, GroundResult};
use crate::record::ValidationRecord;
use crate::rule::{CausalRule, Effect};
use crate::schema::AttributeRole;

use super::state::{ChangeSet, StoreState};

/// What a verdict does to a belief.
#[derive(Debug, Clone)]
pub enum TransitionKind {
    /// Confirmed: the belief becomes (or stays) verified and active.
    Confirm {
        /// Confidence after the confirmation.
        confidence: Confidence,
    },

    /// Falsified: a corrected belief carrying the observed effect replaces it.
    Correct {
        /// The effect the sandbox observed.
        effect: Effect,
        /// Confidence of the correction.
        confidence: Confidence,
    },

    /// No usable observation. Unverified beliefs are rejected once
    /// `max_attempts` is reached; active ones simply stay active.
    Inconclusive {
        /// Attempts tolerated before an unverified belief is rejected.
        max_attempts: u32,
    },

    /// The verdict contradicts the active belief for the pair. The active
    /// belief goes back under test and this one waits.
    Defer {
        /// The contradiction to record.
        conflict: Conflict,
        /// Deferrals tolerated before the belief is rejected.
        max_deferrals: u32,
    },

    /// Rejection. Only reachable from unverified.
    Reject {
        /// Why.
        reason: RejectionReason,
    },
}

/// A status transition, normally backed by one validation record.
///
/// Confirmations, corrections and deferrals must carry the record of the
/// test that produced them. Rejections and inconclusive outcomes may come
/// without one (for instance when no scenario could be built at all).
#[derive(Debug, Clone)]
pub struct Transition {
    /// The belief to change.
    pub belief: BeliefId,
    /// Version of the belief the caller read.
    pub expected_version: u64,
    /// Active belief for the pair when the caller read it.
    pub expected_active: Option<BeliefId>,
    /// The validation record appended with the change.
    pub record: Option<ValidationRecord>,
    /// What the verdict does.
    pub kind: TransitionKind,
}

impl Transition {
    /// The status the belief is headed for.
    #[must_use]
    pub const fn target_status(&self) -> BeliefStatus {
        match self.kind {
            TransitionKind::Confirm { .. } => BeliefStatus::Verified,
            TransitionKind::Correct { .. } => BeliefStatus::Corrected,
            TransitionKind::Inconclusive { .. } | TransitionKind::Defer { .. } => {
                BeliefStatus::Unverified
            }
            TransitionKind::Reject { .. } => BeliefStatus::Rejected,
        }
    }
}

/// The result of a committed transition.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// The belief is verified and active for its pair.
    Verified {
        /// The tested belief.
        belief: BeliefId,
        /// The previously active belief it retired, if any.
        deactivated: Option<BeliefId>,
    },
    /// The belief was falsified and a correction took its place.
    Corrected {
        /// The tested belief, now superseded.
        falsified: BeliefId,
        /// The new corrected belief, active for the pair.
        correction: BeliefId,
        /// The previously active belief it retired, if any.
        deactivated: Option<BeliefId>,
    },
    /// No conclusion. The belief keeps its status.
    Inconclusive {
        /// The tested belief.
        belief: BeliefId,
        /// Consecutive inconclusive verdicts so far.
        attempts: u32,
        /// The belief is still eligible for another attempt.
        will_retry: bool,
    },
    /// The verdict waits on a contradiction with the active belief.
    Deferred {
        /// The tested belief, still unverified.
        belief: BeliefId,
        /// The recorded contradiction.
        conflict: ConflictId,
        /// Deferrals so far.
        deferrals: u32,
        /// The active belief put back under test.
        requeued: BeliefId,
    },
    /// The belief is rejected for good.
    Rejected {
        /// The tested belief.
        belief: BeliefId,
        /// Why.
        reason: RejectionReason,
    },
}

impl CommitOutcome {
    /// The belief that was tested.
    #[must_use]
    pub const fn belief(&self) -> BeliefId {
        match self {
            Self::Verified { belief, .. }
            | Self::Inconclusive { belief, .. }
            | Self::Deferred { belief, .. }
            | Self::Rejected { belief, .. } => *belief,
            Self::Corrected { falsified, .. } => *falsified,
        }
    }
}

fn stale(belief: &Belief, expected: u64) -> ExecutionError {
    ExecutionError::StaleBelief {
        id: belief.id,
        expected,
        actual: belief.version,
    }
}

fn invalid(id: BeliefId, reason: impl Into<String>) -> ExecutionError {
    ExecutionError::InvalidTransition {
        id,
        reason: reason.into(),
    }
}

/// Plans `transition` against `state`.
pub(crate) fn plan(
    state: &StoreState,
    transition: Transition,
) -> GroundResult<(ChangeSet, CommitOutcome)> {
    let Transition {
        belief: id,
        expected_version,
        expected_active,
        record,
        kind,
    } = transition;

    let current = state
        .belief(id)
        .ok_or(ExecutionError::BeliefNotFound { id })?;
    if current.version != expected_version {
        return Err(stale(current, expected_version).into());
    }
    if !current.is_testable() && !current.is_active() {
        return Err(invalid(
            id,
            format!("belief is {} and no longer testable", current.status),
        )
        .into());
    }

    let active_id = state.active_id(&current.pair());
    let needs_record = matches!(
        kind,
        TransitionKind::Confirm { .. } | TransitionKind::Correct { .. } | TransitionKind::Defer { .. }
    );
    if needs_record && record.is_none() {
        return Err(invalid(id, "verdict transitions require a validation record").into());
    }
    let at = record.as_ref().map_or_else(Utc::now, |r| r.recorded_at);
    let record_id = record.as_ref().map(|r| r.id).unwrap_or_default();
    let mut belief = current.clone();
    let mut changes = ChangeSet::default();

    let outcome = match kind {
        TransitionKind::Confirm { confidence } => {
            if active_id != expected_active {
                return Err(stale(current, expected_version).into());
            }
            let was_active = belief.is_active();
            belief.mark_confirmed(confidence, at);
            let mut deactivated = None;
            if !was_active {
                if let Some(prior) = active_id.and_then(|a| state.belief(a)) {
                    guard_same_effect(&belief, prior, &belief.rule.effect)?;
                    deactivated = Some(prior.id);
                    belief.supersedes = Some(prior.id);
                    retire(state, &mut changes, prior, id);
                }
                stage_inference(state, &belief.rule, &mut changes);
            }
            info!(
                belief = %id,
                status = %belief.status,
                confidence = %belief.confidence,
                "belief verified"
            );
            changes.put_belief(belief);
            CommitOutcome::Verified {
                belief: id,
                deactivated,
            }
        }

        TransitionKind::Correct { effect, confidence } => {
            if active_id != expected_active {
                return Err(stale(current, expected_version).into());
            }
            let was_active = belief.is_active();
            let mut correction = Belief::builder()
                .rule(belief.rule.with_effect(effect))
                .status(BeliefStatus::Corrected)
                .confidence(confidence)
                .provenance(Provenance::Correction {
                    record: record_id,
                    corrects: id,
                })
                .corrects(id)
                .created_at(at)
                .build()?;
            correction.last_tested_at = Some(at);

            belief.mark_falsified(record_id, correction.id, at);

            let mut deactivated = None;
            if was_active {
                correction.supersedes = Some(id);
                deactivated = Some(id);
                resolve_open(
                    state,
                    &mut changes,
                    |c| c.active == id,
                    &ConflictResolution::ActiveReplaced { by: correction.id },
                );
            } else {
                resolve_open(
                    state,
                    &mut changes,
                    |c| c.candidate == id,
                    &ConflictResolution::CandidateWithdrawn,
                );
                if let Some(prior) = active_id.and_then(|a| state.belief(a)) {
                    guard_same_effect(&belief, prior, &correction.rule.effect)?;
                    deactivated = Some(prior.id);
                    correction.supersedes = Some(prior.id);
                    retire(state, &mut changes, prior, correction.id);
                }
            }
            stage_inference(state, &correction.rule, &mut changes);

            info!(
                falsified = %id,
                correction = %correction.id,
                effect = %correction.rule.effect,
                "belief corrected"
            );
            let correction_id = correction.id;
            changes.put_belief(belief);
            changes.put_belief(correction);
            CommitOutcome::Corrected {
                falsified: id,
                correction: correction_id,
                deactivated,
            }
        }

        TransitionKind::Inconclusive { max_attempts } => {
            let attempts = belief.mark_inconclusive(at);
            let exhausted = attempts >= max_attempts;
            let outcome = if belief.is_candidate() && exhausted {
                let reason = RejectionReason::InconclusiveExhausted { attempts };
                warn!(belief = %id, attempts, "inconclusive attempts exhausted, rejecting");
                belief.mark_rejected(reason.clone());
                resolve_open(
                    state,
                    &mut changes,
                    |c| c.candidate == id,
                    &ConflictResolution::CandidateRejected,
                );
                CommitOutcome::Rejected { belief: id, reason }
            } else {
                if exhausted {
                    warn!(belief = %id, attempts, "revalidation inconclusive, keeping active belief");
                    belief.abandon_revalidation();
                } else {
                    debug!(belief = %id, attempts, "inconclusive verdict");
                }
                CommitOutcome::Inconclusive {
                    belief: id,
                    attempts,
                    will_retry: !exhausted,
                }
            };
            changes.put_belief(belief);
            outcome
        }

        TransitionKind::Defer {
            mut conflict,
            max_deferrals,
        } => {
            if !belief.is_candidate() {
                return Err(invalid(id, "only unverified beliefs can be deferred").into());
            }
            if active_id != expected_active {
                return Err(stale(current, expected_version).into());
            }
            let active = active_id
                .and_then(|a| state.belief(a))
                .ok_or_else(|| invalid(id, "no active belief to defer to"))?;

            let outcome = if belief.deferrals >= max_deferrals {
                let reason = RejectionReason::UnresolvedContradiction { active: active.id };
                warn!(belief = %id, active = %active.id, "contradiction unresolved, rejecting");
                belief.mark_tested(at);
                belief.mark_rejected(reason.clone());
                resolve_open(
                    state,
                    &mut changes,
                    |c| c.candidate == id,
                    &ConflictResolution::CandidateRejected,
                );
                conflict.resolve(ConflictResolution::CandidateRejected);
                changes.put_conflict(conflict);
                CommitOutcome::Rejected { belief: id, reason }
            } else {
                let deferrals = belief.mark_deferred(at);
                if !active.needs_revalidation {
                    let mut requeued = active.clone();
                    requeued.mark_for_revalidation();
                    changes.put_belief(requeued);
                }
                warn!(
                    candidate = %id,
                    active = %active.id,
                    pair = %conflict.pair,
                    deferrals,
                    "contradiction detected, revalidating active belief"
                );
                let conflict_id = conflict.id;
                changes.put_conflict(conflict);
                CommitOutcome::Deferred {
                    belief: id,
                    conflict: conflict_id,
                    deferrals,
                    requeued: active.id,
                }
            };
            changes.put_belief(belief);
            outcome
        }

        TransitionKind::Reject { reason } => {
            if !belief.is_candidate() {
                return Err(invalid(id, "only unverified beliefs can be rejected").into());
            }
            info!(belief = %id, %reason, "belief rejected");
            belief.mark_tested(at);
            belief.mark_rejected(reason.clone());
            resolve_open(
                state,
                &mut changes,
                |c| c.candidate == id,
                &ConflictResolution::CandidateRejected,
            );
            changes.put_belief(belief);
            CommitOutcome::Rejected { belief: id, reason }
        }
    };

    changes.records.extend(record);
    Ok((changes, outcome))
}

/// Refuses to let `candidate` silently overwrite a disagreeing active belief.
pub(crate) fn guard_same_effect(
    candidate: &Belief,
    active: &Belief,
    effect: &Effect,
) -> Result<(), ExecutionError> {
    if active.rule.effect.value == effect.value {
        Ok(())
    } else {
        Err(ExecutionError::ContradictionDetected {
            candidate: candidate.id,
            active: active.id,
            attribute: effect.attribute,
        })
    }
}

/// Deactivates `prior` in favour of `by` and closes its open conflicts.
pub(crate) fn retire(state: &StoreState, changes: &mut ChangeSet, prior: &Belief, by: BeliefId) {
    let prior_id = prior.id;
    let mut prior = changes.belief(prior_id).unwrap_or(prior).clone();
    prior.mark_superseded(by);
    changes.put_belief(prior);
    resolve_open(
        state,
        changes,
        |c| c.active == prior_id,
        &ConflictResolution::ActiveReplaced { by },
    );
}

fn resolve_open(
    state: &StoreState,
    changes: &mut ChangeSet,
    matches: impl Fn(&Conflict) -> bool,
    resolution: &ConflictResolution,
) {
    let open: Vec<Conflict> = state
        .conflicts()
        .iter()
        .filter(|c| c.is_open() && matches(c))
        .cloned()
        .collect();
    for mut conflict in open {
        conflict.resolve(resolution.clone());
        changes.put_conflict(conflict);
    }
}

/// Applies an activated rule's effect to every entity it matches.
///
/// Outcome attributes depend on the action performed and are never stored
/// on entities.
pub(crate) fn stage_inference(state: &StoreState, rule: &CausalRule, changes: &mut ChangeSet) {
    let effect = &rule.effect;
    if effect.attribute.role() == AttributeRole::Outcome {
        return;
    }
    let ids: BTreeSet<EntityId> = state
        .entities()
        .map(|e| e.id)
        .chain(changes.entities.iter().map(|e| e.id))
        .collect();
    for id in ids {
        let Some(entity) = changes.entity(id).or_else(|| state.entity(id)) else {
            continue;
        };
        let lineage = state.concept_lineage_with(&entity.concept, &changes.concepts);
        if !rule.precondition.pattern.matches(entity, &lineage)
            || outranked(state, changes, rule, entity, &lineage)
        {
            continue;
        }
        let mut entity = entity.clone();
        if entity.apply_inferred(effect.attribute, &effect.value) {
            debug!(entity = %entity.name, attribute = %effect.attribute, value = %effect.value, "attribute inferred");
            changes.put_entity(entity);
        }
    }
}

/// Whether a more specific active belief already speaks for this entity
/// and attribute.
fn outranked(
    state: &StoreState,
    changes: &ChangeSet,
    rule: &CausalRule,
    entity: &Entity,
    lineage: &[String],
) -> bool {
    let specificity = rule.precondition.pattern.specificity();
    let pair = rule.pair();
    state
        .beliefs()
        .iter()
        .map(|b| changes.belief(b.id).unwrap_or(b))
        .filter(|b| {
            b.is_active() && b.rule.effect.attribute == rule.effect.attribute && b.pair() != pair
        })
        .any(|b| {
            let pattern = &b.rule.precondition.pattern;
            pattern.specificity() > specificity && pattern.matches(entity, lineage)
        })
}
