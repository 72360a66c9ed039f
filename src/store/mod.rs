//! The knowledge store: entities, concepts, beliefs and the audit trail.
//!
//! The store owns every belief and entity. Reads go through an `RwLock`;
//! every mutation is planned against the current state as a [`ChangeSet`],
//! checked, journaled (when a journal is configured) and only then applied,
//! all under the write lock. That single commit path is what keeps "at most
//! one active belief per pair" true at every observation point.

mod commit;
mod snapshot;
mod state;

#[cfg(feature = "persistent")]
mod codec;
#[cfg(feature = "persistent")]
mod journal;

use std::collections::{HashSet, VecDeque};
use std::sync::RwLock;
#[cfg(feature = "persistent")]
use std::sync::Mutex;

use tracing::{debug, info};
#[cfg(feature = "persistent")]
use tracing::warn;

use crate::belief::{Belief, BeliefId, BeliefStatus, Lifecycle, Provenance};
use crate::confidence::Confidence;
use crate::conflict::Conflict;
use crate::config::StoreConfig;
use crate::entity::{canonical_name, Concept, Entity, EntityId, ROOT_CONCEPT};
use crate::error::{ExecutionError, GroundError, GroundResult, ValidationError};
use crate::pattern::EntityPattern;
use crate::record::ValidationRecord;
use crate::rule::{CausalRule, PairKey};
use crate::schema::{AttributeKey, AttributeRole, EntityKind};

pub use commit::{CommitOutcome, Transition, TransitionKind};
pub use snapshot::KnowledgeSnapshot;
pub use state::{ChangeSet, StoreView};

use commit::{guard_same_effect, retire, stage_inference};
#[cfg(feature = "persistent")]
use journal::{Journal, StoreEvent};
use state::StoreState;

fn lock_err(context: &'static str) -> GroundError {
    GroundError::storage(format!("poisoned lock: {context}"))
}

/// Counts over the store's contents.
///
/// Belief counts follow [`Belief::lifecycle`], so every belief lands in
/// exactly one of `unverified`, `verified`, `corrected`, `falsified`,
/// `retired` and `rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    /// Concepts in the taxonomy, the root included.
    pub concepts: usize,
    /// Entities ever referenced.
    pub entities: usize,
    /// Beliefs ever recorded, in any state.
    pub beliefs: usize,
    /// Beliefs authoritative for their pair: `verified + corrected`.
    pub active: usize,
    /// Candidates still waiting for a first verdict.
    pub unverified: usize,
    /// Active beliefs the sandbox confirmed.
    pub verified: usize,
    /// Active beliefs carrying an observed correction.
    pub corrected: usize,
    /// Beliefs the sandbox contradicted, kept behind their correction.
    pub falsified: usize,
    /// Grounded beliefs deactivated by a newer belief that agrees with them.
    pub retired: usize,
    /// Beliefs rejected without becoming active.
    pub rejected: usize,
    /// Entries in the audit trail.
    pub records: usize,
    /// Contradictions still waiting for revalidation.
    pub open_conflicts: usize,
}

/// The versioned belief graph and its audit trail.
///
/// Readers share an `RwLock`; every mutation goes through one commit path
/// that plans, checks, journals and applies under the write lock.
///
/// ```
/// use groundwork::{
///     ActionPattern, AttributeKey, BeliefStatus, CausalRule, Confidence, Effect, EntityPattern,
///     KnowledgeStore, Lifecycle, Provenance,
/// };
///
/// let store = KnowledgeStore::in_memory();
/// let id = store.add_belief(
///     CausalRule::new(
///         EntityPattern::entity("cork"),
///         ActionPattern::Any,
///         Effect::new(AttributeKey::IsBuoyant, true)?,
///     ),
///     Provenance::cultural("notes", "cork floats"),
///     BeliefStatus::Unverified,
///     Confidence::new(0.5)?,
/// )?;
///
/// let belief = store.get_belief(id)?.unwrap();
/// assert_eq!(belief.lifecycle(), Lifecycle::Candidate);
/// assert!(store.find_entity("cork")?.is_some());
/// assert_eq!(store.stats()?.unverified, 1);
/// # Ok::<(), groundwork::GroundError>(())
/// ```
pub struct KnowledgeStore {
    state: RwLock<StoreState>,
    #[cfg(feature = "persistent")]
    journal: Option<Mutex<Journal>>,
    config: StoreConfig,
}

impl KnowledgeStore {
    /// An empty store with no journal.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_state(StoreState::default(), StoreConfig::default())
    }

    fn with_state(state: StoreState, config: StoreConfig) -> Self {
        Self {
            state: RwLock::new(state),
            #[cfg(feature = "persistent")]
            journal: None,
            config,
        }
    }

    /// Opens a store, replaying its journal if one is configured.
    ///
    /// A torn or corrupt journal tail is truncated and the intact prefix is
    /// kept.
    pub fn open(config: StoreConfig) -> GroundResult<Self> {
        let config = config.validate()?;
        let Some(path) = config.journal_path.clone() else {
            return Ok(Self::with_state(StoreState::default(), config));
        };

        #[cfg(feature = "persistent")]
        {
            let (journal, replay) = Journal::open(&path, config.sync_on_write).map_err(|e| {
                GroundError::storage(format!("cannot open journal {}: {e}", path.display()))
            })?;
            if let Some(error) = &replay.tail_error {
                warn!(
                    path = %path.display(),
                    discarded_bytes = replay.discarded_bytes,
                    %error,
                    "journal tail truncated"
                );
            }

            let entries = replay.entries.len();
            let mut state = StoreState::default();
            for entry in replay.entries {
                match entry.event {
                    StoreEvent::Changes(changes) => state.apply(changes),
                    StoreEvent::Snapshot(snapshot) => state = StoreState::from_snapshot(snapshot)?,
                }
            }
            // Re-derive every index from the replayed records.
            let state = StoreState::from_snapshot(state.to_snapshot())?;
            info!(
                path = %path.display(),
                entries,
                beliefs = state.beliefs().len(),
                active = state.active_count(),
                records = state.records().len(),
                "journal replayed"
            );

            Ok(Self {
                state: RwLock::new(state),
                journal: Some(Mutex::new(journal)),
                config,
            })
        }

        #[cfg(not(feature = "persistent"))]
        {
            Err(GroundError::storage(format!(
                "journal {} requires the `persistent` feature",
                path.display()
            )))
        }
    }

    /// Rebuilds an in-memory store from a snapshot.
    pub fn from_snapshot(snapshot: KnowledgeSnapshot) -> GroundResult<Self> {
        let state = StoreState::from_snapshot(snapshot)?;
        info!(
            beliefs = state.beliefs().len(),
            active = state.active_count(),
            "store restored from snapshot"
        );
        Ok(Self::with_state(state, StoreConfig::default()))
    }

    /// A copy of every record, suitable for [`KnowledgeStore::from_snapshot`].
    pub fn snapshot(&self) -> GroundResult<KnowledgeSnapshot> {
        let state = self.state.read().map_err(|_| lock_err("snapshot"))?;
        Ok(state.to_snapshot())
    }

    /// A consistent read view. Writers wait while it is held.
    pub fn read(&self) -> GroundResult<StoreView<'_>> {
        let guard = self.state.read().map_err(|_| lock_err("read"))?;
        Ok(StoreView { guard })
    }

    /// Syncs the journal, compacting it first once it outgrows its limit.
    pub fn flush(&self) -> GroundResult<()> {
        self.sync_journal(false).map(|_| ())
    }

    /// Rewrites the journal as a single snapshot entry.
    ///
    /// Returns false when the store has no journal.
    pub fn compact(&self) -> GroundResult<bool> {
        self.sync_journal(true)
    }

    #[cfg(feature = "persistent")]
    fn sync_journal(&self, force: bool) -> GroundResult<bool> {
        let Some(journal) = &self.journal else {
            return Ok(false);
        };
        let state = self.state.read().map_err(|_| lock_err("flush"))?;
        let mut journal = journal.lock().map_err(|_| lock_err("journal"))?;
        let io = |e: std::io::Error| GroundError::storage(format!("journal flush failed: {e}"));

        let size = journal.size_bytes().map_err(io)?;
        if force || size > self.config.max_journal_bytes {
            journal.compact(&state.to_snapshot()).map_err(io)?;
            info!(
                path = %journal.path().display(),
                before_bytes = size,
                after_bytes = journal.size_bytes().map_err(io)?,
                "journal compacted"
            );
        } else {
            journal.sync().map_err(io)?;
            debug!(sequence = journal.sequence(), bytes = size, "journal synced");
        }
        Ok(true)
    }

    #[cfg(not(feature = "persistent"))]
    fn sync_journal(&self, _force: bool) -> GroundResult<bool> {
        Ok(false)
    }

    /// The single mutation path: plan, check, journal, apply.
    fn write<R>(
        &self,
        context: &'static str,
        plan: impl FnOnce(&StoreState) -> GroundResult<(ChangeSet, R)>,
    ) -> GroundResult<R> {
        let mut state = self.state.write().map_err(|_| lock_err(context))?;
        let (changes, result) = plan(&state)?;
        if changes.is_empty() {
            return Ok(result);
        }
        state.check(&changes)?;
        self.persist(&changes)?;
        state.apply(changes);
        Ok(result)
    }

    #[cfg(feature = "persistent")]
    fn persist(&self, changes: &ChangeSet) -> GroundResult<()> {
        if let Some(journal) = &self.journal {
            let mut journal = journal.lock().map_err(|_| lock_err("journal"))?;
            journal
                .append(changes)
                .map_err(|e| GroundError::storage(format!("journal append failed: {e}")))?;
        }
        Ok(())
    }

    #[cfg(not(feature = "persistent"))]
    fn persist(&self, _changes: &ChangeSet) -> GroundResult<()> {
        Ok(())
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Returns the stored entity with the prototype's name, creating it from
    /// the prototype on first reference.
    ///
    /// A new entity immediately receives the effects of every active belief
    /// that matches it.
    pub fn ensure_entity(&self, prototype: Entity) -> GroundResult<Entity> {
        self.write("ensure_entity", |state| {
            if let Some(existing) = state.entity(prototype.id) {
                return Ok((ChangeSet::default(), existing.clone()));
            }
            let mut changes = ChangeSet::default();
            let entity = stage_entity(state, &mut changes, prototype);
            Ok((changes, entity))
        })
    }

    /// Returns a concept, creating it (and its parent chain) on first reference.
    pub fn ensure_concept(&self, name: &str, parent: Option<&str>) -> GroundResult<Concept> {
        let name = canonical_name(name);
        if name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        self.write("ensure_concept", |state| {
            let mut changes = ChangeSet::default();
            stage_concept(state, &mut changes, &name, parent);
            let concept = state
                .concept(&name)
                .or_else(|| changes.concepts.iter().find(|c| c.name == name))
                .cloned()
                .ok_or_else(|| GroundError::internal(format!("concept {name} was not staged")))?;
            Ok((changes, concept))
        })
    }

    /// The entity with this id, if it was ever referenced.
    pub fn entity(&self, id: EntityId) -> GroundResult<Option<Entity>> {
        let state = self.state.read().map_err(|_| lock_err("entity"))?;
        Ok(state.entity(id).cloned())
    }

    /// Looks an entity up by name. The name is canonicalized first.
    pub fn find_entity(&self, name: &str) -> GroundResult<Option<Entity>> {
        self.entity(EntityId::for_name(name))
    }

    // ------------------------------------------------------------------
    // Beliefs
    // ------------------------------------------------------------------

    /// Adds a new belief and returns its id.
    ///
    /// Fails with `DuplicateRule` if an identical rule exists in any
    /// non-rejected status. A belief added as verified or corrected becomes
    /// active; it may only replace an active belief that agrees with it.
    pub fn add_belief(
        &self,
        rule: CausalRule,
        provenance: Provenance,
        status: BeliefStatus,
        confidence: Confidence,
    ) -> GroundResult<BeliefId> {
        let belief = Belief::builder()
            .rule(rule)
            .provenance(provenance)
            .status(status)
            .confidence(confidence)
            .build()?;
        self.insert_belief(belief)
    }

    /// Inserts a fully built belief.
    pub fn insert_belief(&self, belief: Belief) -> GroundResult<BeliefId> {
        if belief.status == BeliefStatus::Rejected {
            return Err(ValidationError::InvalidConfig {
                reason: "a belief cannot be inserted rejected".to_string(),
            }
            .into());
        }
        belief.rule.validate()?;

        self.write("insert_belief", |state| {
            if state.belief(belief.id).is_some() {
                return Err(ExecutionError::DuplicateRule {
                    existing: belief.id,
                }
                .into());
            }
            if let Some(existing) = state.live_duplicate(&belief.fingerprint) {
                debug!(%existing, rule = %belief.rule, "duplicate rule refused");
                return Err(ExecutionError::DuplicateRule { existing }.into());
            }

            let mut belief = belief;
            let mut changes = ChangeSet::default();
            stage_pattern_nodes(state, &mut changes, &belief.rule.precondition.pattern)?;

            if belief.status.is_grounded() {
                if let Some(prior) = state.active_belief(&belief.pair()) {
                    guard_same_effect(&belief, prior, &belief.rule.effect)?;
                    belief.supersedes = Some(prior.id);
                    retire(state, &mut changes, prior, belief.id);
                }
                stage_inference(state, &belief.rule, &mut changes);
            }

            info!(
                belief = %belief.id,
                rule = %belief.rule,
                status = %belief.status,
                provenance = %belief.provenance,
                "belief added"
            );
            let id = belief.id;
            changes.put_belief(belief);
            Ok((changes, id))
        })
    }

    /// The belief with this id, in whatever state it is in.
    pub fn get_belief(&self, id: BeliefId) -> GroundResult<Option<Belief>> {
        let state = self.state.read().map_err(|_| lock_err("get_belief"))?;
        Ok(state.belief(id).cloned())
    }

    /// The belief currently authoritative for `(pattern, attribute)`.
    pub fn get_active_belief(
        &self,
        pattern: &EntityPattern,
        attribute: AttributeKey,
    ) -> GroundResult<Option<Belief>> {
        let state = self.state.read().map_err(|_| lock_err("get_active_belief"))?;
        Ok(state.active_belief(&PairKey::new(pattern, attribute)).cloned())
    }

    /// Beliefs in `status`, oldest first.
    ///
    /// Superseded records are skipped except for `Rejected`, which is
    /// terminal anyway. The sequence is copied under one read lock and is a
    /// snapshot of that moment: the lock is released before this returns,
    /// and later commits are not reflected. Callers re-read a belief before
    /// acting on it.
    pub fn list_candidates(
        &self,
        status: BeliefStatus,
    ) -> GroundResult<impl Iterator<Item = Belief>> {
        let state = self.state.read().map_err(|_| lock_err("list_candidates"))?;
        let beliefs: Vec<Belief> = state
            .beliefs()
            .iter()
            .filter(|b| {
                b.status == status && (status == BeliefStatus::Rejected || !b.is_superseded())
            })
            .cloned()
            .collect();
        Ok(beliefs.into_iter())
    }

    /// Commits one status transition atomically.
    ///
    /// Fails with `StaleBelief` if the belief changed, or the active belief
    /// for its pair changed, since the caller read them.
    pub fn commit_transition(&self, transition: Transition) -> GroundResult<CommitOutcome> {
        self.write("commit_transition", |state| commit::plan(state, transition))
    }

    /// Puts an active belief back under test.
    ///
    /// Returns false if it was already queued.
    pub fn requeue_for_revalidation(&self, id: BeliefId) -> GroundResult<bool> {
        self.write("requeue_for_revalidation", |state| {
            let belief = state
                .belief(id)
                .ok_or(ExecutionError::BeliefNotFound { id })?;
            if !belief.is_active() {
                return Err(ExecutionError::InvalidTransition {
                    id,
                    reason: format!("only active beliefs can be revalidated, belief is {}", belief.status),
                }
                .into());
            }
            let mut changes = ChangeSet::default();
            if belief.needs_revalidation {
                return Ok((changes, false));
            }
            let mut belief = belief.clone();
            belief.mark_for_revalidation();
            info!(belief = %id, "belief queued for revalidation");
            changes.put_belief(belief);
            Ok((changes, true))
        })
    }

    /// Active beliefs waiting to be retested, oldest first.
    pub fn revalidation_queue(&self) -> GroundResult<Vec<Belief>> {
        let state = self.state.read().map_err(|_| lock_err("revalidation_queue"))?;
        Ok(state
            .beliefs()
            .iter()
            .filter(|b| b.is_active() && b.needs_revalidation)
            .cloned()
            .collect())
    }

    /// Every belief currently authoritative for its pair.
    pub fn active_beliefs(&self) -> GroundResult<Vec<Belief>> {
        let state = self.state.read().map_err(|_| lock_err("active_beliefs"))?;
        Ok(state.beliefs().iter().filter(|b| b.is_active()).cloned().collect())
    }

    /// Every belief ever recorded for a pair, oldest first.
    pub fn beliefs_for_pair(&self, pair: &PairKey) -> GroundResult<Vec<Belief>> {
        let state = self.state.read().map_err(|_| lock_err("beliefs_for_pair"))?;
        Ok(state.beliefs_for_pair(pair).cloned().collect())
    }

    /// The belief followed by every predecessor reachable through its
    /// `corrects` and `supersedes` links, nearest first.
    pub fn lineage(&self, id: BeliefId) -> GroundResult<Vec<Belief>> {
        let state = self.state.read().map_err(|_| lock_err("lineage"))?;
        if state.belief(id).is_none() {
            return Err(ExecutionError::BeliefNotFound { id }.into());
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id]);
        let mut chain = Vec::new();
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            let Some(belief) = state.belief(next) else {
                continue;
            };
            queue.extend(belief.corrects);
            queue.extend(belief.supersedes);
            chain.push(belief.clone());
        }
        Ok(chain)
    }

    // ------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------

    /// The validation records for one belief, in commit order.
    pub fn records_for_belief(&self, id: BeliefId) -> GroundResult<Vec<ValidationRecord>> {
        let state = self.state.read().map_err(|_| lock_err("records_for_belief"))?;
        Ok(state.records_for(id).cloned().collect())
    }

    /// The complete validation log in commit order.
    pub fn audit_trail(&self) -> GroundResult<Vec<ValidationRecord>> {
        let state = self.state.read().map_err(|_| lock_err("audit_trail"))?;
        Ok(state.records().to_vec())
    }

    /// Every contradiction ever recorded, open or resolved.
    pub fn conflicts(&self) -> GroundResult<Vec<Conflict>> {
        let state = self.state.read().map_err(|_| lock_err("conflicts"))?;
        Ok(state.conflicts().to_vec())
    }

    /// Counts taken under one read lock.
    pub fn stats(&self) -> GroundResult<StoreStats> {
        let state = self.state.read().map_err(|_| lock_err("stats"))?;
        let mut stats = StoreStats {
            concepts: state.concepts().count(),
            entities: state.entities().count(),
            beliefs: state.beliefs().len(),
            active: state.active_count(),
            records: state.records().len(),
            open_conflicts: state.conflicts().iter().filter(|c| c.is_open()).count(),
            ..StoreStats::default()
        };
        for belief in state.beliefs() {
            match (belief.lifecycle(), belief.status) {
                (Lifecycle::Candidate, _) => stats.unverified += 1,
                (Lifecycle::Active, BeliefStatus::Corrected) => stats.corrected += 1,
                (Lifecycle::Active, _) => stats.verified += 1,
                (Lifecycle::Falsified, _) => stats.falsified += 1,
                (Lifecycle::Retired, _) => stats.retired += 1,
                (Lifecycle::Rejected, _) => stats.rejected += 1,
            }
        }
        Ok(stats)
    }

    /// The validated configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

impl Default for KnowledgeStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Stages `name` and its missing ancestors.
fn stage_concept(state: &StoreState, changes: &mut ChangeSet, name: &str, parent: Option<&str>) {
    let name = canonical_name(name);
    if name.is_empty()
        || state.concept(&name).is_some()
        || changes.concepts.iter().any(|c| c.name == name)
    {
        return;
    }
    if name == ROOT_CONCEPT {
        changes.concepts.push(Concept::new(ROOT_CONCEPT, None));
        return;
    }
    let parent = parent
        .map(canonical_name)
        .filter(|p| !p.is_empty() && *p != name)
        .unwrap_or_else(|| ROOT_CONCEPT.to_string());
    stage_concept(state, changes, &parent, None);
    debug!(concept = %name, %parent, "concept created");
    changes.concepts.push(Concept::new(&name, Some(&parent)));
}

/// Stages a new entity plus its concept chain and applies matching active
/// beliefs, least specific first so the most specific one wins.
fn stage_entity(state: &StoreState, changes: &mut ChangeSet, mut entity: Entity) -> Entity {
    stage_concept(state, changes, &entity.concept.clone(), None);
    let lineage = state.concept_lineage_with(&entity.concept, &changes.concepts);

    let mut matching: Vec<&Belief> = state
        .beliefs()
        .iter()
        .filter(|b| b.is_active() && b.rule.effect.attribute.role() != AttributeRole::Outcome)
        .filter(|b| b.rule.precondition.pattern.matches(&entity, &lineage))
        .collect();
    matching.sort_by_key(|b| b.rule.precondition.pattern.specificity());
    for belief in matching {
        let effect = &belief.rule.effect;
        entity.apply_inferred(effect.attribute, &effect.value);
    }

    debug!(entity = %entity.name, kind = %entity.kind, concept = %entity.concept, "entity created");
    changes.put_entity(entity.clone());
    entity
}

/// Creates the nodes a belief's pattern refers to.
///
/// A named entity seen for the first time gets the pattern's intrinsic
/// constraints as its attributes.
fn stage_pattern_nodes(
    state: &StoreState,
    changes: &mut ChangeSet,
    pattern: &EntityPattern,
) -> GroundResult<()> {
    if let Some(concept) = &pattern.concept {
        stage_concept(state, changes, concept, None);
    }
    let Some(name) = &pattern.entity else {
        return Ok(());
    };
    let id = EntityId::for_name(name);
    if state.entity(id).is_some() || changes.entity(id).is_some() {
        return Ok(());
    }
    let kind = EntityKind::default();
    let mut entity = Entity::new(name, kind)?;
    if let Some(concept) = &pattern.concept {
        entity = entity.with_concept(concept);
    }
    for (key, value) in &pattern.attributes {
        if key.role() == AttributeRole::Intrinsic && kind.allows(*key) {
            entity = entity.with_attribute(*key, value.clone())?;
        }
    }
    stage_entity(state, changes, entity);
    Ok(())
}
