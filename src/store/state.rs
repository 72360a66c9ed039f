//! In-memory state of the knowledge store.
//!
//! Beliefs live in an append-only arena (`Vec<Belief>`) addressed through
//! `slots`. All other structures are indexes over that arena and are
//! rebuilt from it on load; the active index in particular is never
//! persisted.

use std::collections::{HashMap, HashSet};
use std::sync::RwLockReadGuard;

use serde::{Deserialize, Serialize};

use crate::belief::{Belief, BeliefId, BeliefStatus};
use crate::conflict::{Conflict, ConflictId};
use crate::entity::{canonical_name, Concept, ConceptId, Entity, EntityId, ROOT_CONCEPT};
use crate::error::{GroundError, GroundResult};
use crate::record::ValidationRecord;
use crate::rule::{PairKey, RuleFingerprint};

/// Concept chains deeper than this are treated as cyclic.
const MAX_CONCEPT_DEPTH: usize = 64;

/// A batch of upserts produced by one store operation.
///
/// Change sets are computed against the current state, journaled, and then
/// applied. Applying one never fails.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Concepts to insert.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concepts: Vec<Concept>,
    /// Entities to insert or replace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<Entity>,
    /// Beliefs to insert or replace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub beliefs: Vec<Belief>,
    /// Validation records to append.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<ValidationRecord>,
    /// Conflicts to append.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Conflict>,
}

impl ChangeSet {
    /// Whether applying this change set would do nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
            && self.entities.is_empty()
            && self.beliefs.is_empty()
            && self.records.is_empty()
            && self.conflicts.is_empty()
    }

    pub(crate) fn put_belief(&mut self, belief: Belief) {
        match self.beliefs.iter_mut().find(|b| b.id == belief.id) {
            Some(slot) => *slot = belief,
            None => self.beliefs.push(belief),
        }
    }

    pub(crate) fn put_entity(&mut self, entity: Entity) {
        match self.entities.iter_mut().find(|e| e.id == entity.id) {
            Some(slot) => *slot = entity,
            None => self.entities.push(entity),
        }
    }

    pub(crate) fn put_conflict(&mut self, conflict: Conflict) {
        match self.conflicts.iter_mut().find(|c| c.id == conflict.id) {
            Some(slot) => *slot = conflict,
            None => self.conflicts.push(conflict),
        }
    }

    pub(crate) fn belief(&self, id: BeliefId) -> Option<&Belief> {
        self.beliefs.iter().find(|b| b.id == id)
    }

    pub(crate) fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }
}

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    concepts: HashMap<ConceptId, Concept>,
    entities: HashMap<EntityId, Entity>,
    beliefs: Vec<Belief>,
    slots: HashMap<BeliefId, usize>,
    fingerprints: HashMap<RuleFingerprint, Vec<BeliefId>>,
    pairs: HashMap<PairKey, Vec<usize>>,
    active: HashMap<PairKey, BeliefId>,
    records: Vec<ValidationRecord>,
    records_by_belief: HashMap<BeliefId, Vec<usize>>,
    conflicts: Vec<Conflict>,
    conflict_slots: HashMap<ConflictId, usize>,
}

impl StoreState {
    pub(crate) fn concept(&self, name: &str) -> Option<&Concept> {
        self.concepts.get(&ConceptId::for_name(name))
    }

    pub(crate) fn concepts(&self) -> impl Iterator<Item = &Concept> {
        self.concepts.values()
    }

    pub(crate) fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub(crate) fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub(crate) fn belief(&self, id: BeliefId) -> Option<&Belief> {
        self.slots.get(&id).map(|&slot| &self.beliefs[slot])
    }

    /// Beliefs in arena (insertion) order.
    pub(crate) fn beliefs(&self) -> &[Belief] {
        &self.beliefs
    }

    pub(crate) fn active_id(&self, pair: &PairKey) -> Option<BeliefId> {
        self.active.get(pair).copied()
    }

    pub(crate) fn active_belief(&self, pair: &PairKey) -> Option<&Belief> {
        self.active_id(pair).and_then(|id| self.belief(id))
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn beliefs_for_pair(&self, pair: &PairKey) -> impl Iterator<Item = &Belief> {
        self.pairs
            .get(pair)
            .into_iter()
            .flatten()
            .map(|&slot| &self.beliefs[slot])
    }

    /// A non-rejected belief with the same fingerprint, if any.
    pub(crate) fn live_duplicate(&self, fingerprint: &RuleFingerprint) -> Option<BeliefId> {
        self.fingerprints
            .get(fingerprint)
            .and_then(|ids| ids.first().copied())
    }

    pub(crate) fn records(&self) -> &[ValidationRecord] {
        &self.records
    }

    pub(crate) fn records_for(&self, id: BeliefId) -> impl Iterator<Item = &ValidationRecord> {
        self.records_by_belief
            .get(&id)
            .into_iter()
            .flatten()
            .map(|&slot| &self.records[slot])
    }

    pub(crate) fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    /// The concept followed by its ancestors, ending at the root.
    pub(crate) fn concept_lineage(&self, concept: &str) -> Vec<String> {
        self.concept_lineage_with(concept, &[])
    }

    /// Lineage that also sees concepts staged in a pending change set.
    pub(crate) fn concept_lineage_with(&self, concept: &str, staged: &[Concept]) -> Vec<String> {
        let lookup = |id: ConceptId| {
            staged
                .iter()
                .find(|c| c.id == id)
                .or_else(|| self.concepts.get(&id))
        };
        let mut lineage = Vec::new();
        let mut current = lookup(ConceptId::for_name(concept));
        if current.is_none() {
            lineage.push(canonical_name(concept));
        }
        while let Some(node) = current {
            if lineage.len() >= MAX_CONCEPT_DEPTH || lineage.contains(&node.name) {
                break;
            }
            lineage.push(node.name.clone());
            current = node.parent.and_then(lookup);
        }
        if lineage.last().map(String::as_str) != Some(ROOT_CONCEPT) {
            lineage.push(ROOT_CONCEPT.to_string());
        }
        lineage
    }

    /// Fails if applying `changes` would leave two active beliefs for a pair.
    pub(crate) fn check(&self, changes: &ChangeSet) -> GroundResult<()> {
        let touched: HashSet<PairKey> = changes.beliefs.iter().map(Belief::pair).collect();
        for pair in touched {
            let mut active: HashSet<BeliefId> = self
                .beliefs_for_pair(&pair)
                .map(|existing| changes.belief(existing.id).unwrap_or(existing))
                .filter(|b| b.is_active())
                .map(|b| b.id)
                .collect();
            active.extend(
                changes
                    .beliefs
                    .iter()
                    .filter(|b| b.is_active() && b.pair() == pair)
                    .map(|b| b.id),
            );
            if active.len() > 1 {
                return Err(GroundError::internal(format!(
                    "commit would leave {} active beliefs for {pair}",
                    active.len()
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn apply(&mut self, changes: ChangeSet) {
        for concept in changes.concepts {
            self.concepts.insert(concept.id, concept);
        }
        for entity in changes.entities {
            self.entities.insert(entity.id, entity);
        }
        let mut touched = HashSet::new();
        for belief in changes.beliefs {
            touched.insert(belief.pair());
            self.upsert_belief(belief);
        }
        for pair in touched {
            self.refresh_active(&pair);
        }
        for record in changes.records {
            self.push_record(record);
        }
        for conflict in changes.conflicts {
            self.upsert_conflict(conflict);
        }
    }

    fn upsert_belief(&mut self, belief: Belief) {
        let id = belief.id;
        let fingerprint = belief.fingerprint;
        let rejected = belief.status == BeliefStatus::Rejected;
        match self.slots.get(&id) {
            Some(&slot) => self.beliefs[slot] = belief,
            None => {
                let slot = self.beliefs.len();
                self.pairs.entry(belief.pair()).or_default().push(slot);
                self.slots.insert(id, slot);
                self.beliefs.push(belief);
                if !rejected {
                    self.fingerprints.entry(fingerprint).or_default().push(id);
                }
            }
        }
        if rejected {
            if let Some(ids) = self.fingerprints.get_mut(&fingerprint) {
                ids.retain(|other| *other != id);
                if ids.is_empty() {
                    self.fingerprints.remove(&fingerprint);
                }
            }
        }
    }

    fn refresh_active(&mut self, pair: &PairKey) {
        let found = self.beliefs_for_pair(pair).find(|b| b.is_active()).map(|b| b.id);
        match found {
            Some(id) => {
                self.active.insert(pair.clone(), id);
            }
            None => {
                self.active.remove(pair);
            }
        }
    }

    fn push_record(&mut self, record: ValidationRecord) {
        let slot = self.records.len();
        self.records_by_belief.entry(record.belief).or_default().push(slot);
        self.records.push(record);
    }

    fn upsert_conflict(&mut self, conflict: Conflict) {
        match self.conflict_slots.get(&conflict.id) {
            Some(&slot) => self.conflicts[slot] = conflict,
            None => {
                self.conflict_slots.insert(conflict.id, self.conflicts.len());
                self.conflicts.push(conflict);
            }
        }
    }

    /// Rebuilds every index from raw parts.
    ///
    /// The active index is derived from status and supersession fields only.
    pub(crate) fn rebuild(
        concepts: Vec<Concept>,
        entities: Vec<Entity>,
        beliefs: Vec<Belief>,
        records: Vec<ValidationRecord>,
        conflicts: Vec<Conflict>,
    ) -> GroundResult<Self> {
        let mut state = Self::default();
        for concept in concepts {
            state.concepts.insert(concept.id, concept);
        }
        for entity in entities {
            state.entities.insert(entity.id, entity);
        }
        for belief in beliefs {
            if state.slots.contains_key(&belief.id) {
                return Err(GroundError::storage(format!(
                    "duplicate belief {} in snapshot",
                    belief.id
                )));
            }
            state.upsert_belief(belief);
        }
        for belief in &state.beliefs {
            for link in [belief.corrects, belief.supersedes, belief.superseded_by]
                .into_iter()
                .flatten()
            {
                if !state.slots.contains_key(&link) {
                    return Err(GroundError::storage(format!(
                        "belief {} links to unknown belief {link}",
                        belief.id
                    )));
                }
            }
        }
        let pairs: Vec<PairKey> = state.pairs.keys().cloned().collect();
        for pair in pairs {
            let active = state.beliefs_for_pair(&pair).filter(|b| b.is_active()).count();
            if active > 1 {
                return Err(GroundError::storage(format!(
                    "{active} beliefs are active for {pair}"
                )));
            }
            state.refresh_active(&pair);
        }
        for record in records {
            state.push_record(record);
        }
        for conflict in conflicts {
            state.upsert_conflict(conflict);
        }
        Ok(state)
    }
}

/// A consistent read-only view of the store.
///
/// Holding a view blocks writers, so keep it short-lived.
pub struct StoreView<'a> {
    pub(crate) guard: RwLockReadGuard<'a, StoreState>,
}

impl StoreView<'_> {
    /// Looks up an entity by name, canonicalizing it first.
    #[must_use]
    pub fn entity_named(&self, name: &str) -> Option<&Entity> {
        self.guard.entity(EntityId::for_name(name))
    }

    /// Returns `concept` followed by its ancestors up to the root.
    #[must_use]
    pub fn concept_lineage(&self, concept: &str) -> Vec<String> {
        self.guard.concept_lineage(concept)
    }

    /// Looks up a belief by id.
    #[must_use]
    pub fn belief(&self, id: BeliefId) -> Option<&Belief> {
        self.guard.belief(id)
    }

    /// Iterates every belief in insertion order.
    pub fn beliefs(&self) -> impl Iterator<Item = &Belief> {
        self.guard.beliefs().iter()
    }

    /// The active belief for `pair`, if any.
    #[must_use]
    pub fn active_belief(&self, pair: &PairKey) -> Option<&Belief> {
        self.guard.active_belief(pair)
    }
}
