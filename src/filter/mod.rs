//! The reality filter: tests beliefs against the sandbox and commits
//! what the sandbox says.
//!
//! The filter is the only component that issues status transitions. Each
//! validation runs under a per-belief lease, builds a hypothesis through
//! the [`LogicEngine`], asks the [`Sandbox`] with a timeout, compares the
//! observation with the prediction and commits the matching
//! [`Transition`]. Scheduling rounds fan validations out to a bounded
//! worker pool; genesis is a barrier in front of cultural intake.

mod genesis;
mod lease;
mod pool;
mod retry;
mod tolerance;

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::thread;

use crossbeam_channel::{bounded, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::belief::{Belief, BeliefId, BeliefStatus, Provenance, RejectionReason};
use crate::confidence::Confidence;
use crate::config::FilterConfig;
use crate::conflict::Conflict;
use crate::error::{ExecutionError, GroundError, GroundResult, ValidationError};
use crate::language::{LanguageInterface, Proposal};
use crate::logic::LogicEngine;
use crate::record::{Hypothesis, Scenario, SimulationOutcome, ValidationRecord, Verdict};
use crate::rule::Effect;
use crate::sandbox::{CancellationToken, Sandbox};
use crate::store::{CommitOutcome, KnowledgeStore, Transition, TransitionKind};

pub use genesis::Worldview;

use lease::LeaseTable;
use pool::WorkerPool;
use retry::retry;

/// Upper bound on scheduling rounds while genesis settles.
const GENESIS_ROUND_LIMIT: usize = 256;

fn lock_err(context: &'static str) -> GroundError {
    GroundError::storage(format!("poisoned lock: {context}"))
}

/// Where the filter is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPhase {
    /// Started, but no seeds have been handed over yet.
    AwaitingGenesis,
    /// Seeds are being validated; cultural candidates wait.
    Genesis,
    /// Genesis finished; cultural candidates are scheduled too.
    Open,
}

impl fmt::Display for FilterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingGenesis => write!(f, "awaiting_genesis"),
            Self::Genesis => write!(f, "genesis"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// What one validation did.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    /// The belief that was validated.
    pub belief: BeliefId,
    /// `None` when no hypothesis could be built for the belief.
    pub hypothesis: Option<Hypothesis>,
    /// What the sandbox observed, if anything.
    pub observed: Option<Effect>,
    /// How the observation compared with the prediction.
    pub verdict: Option<Verdict>,
    /// What the commit changed.
    pub outcome: CommitOutcome,
    /// Commit attempts that lost an optimistic race before this one won.
    pub retries: u32,
}

/// Tally of one or more scheduling rounds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Rounds run.
    pub rounds: usize,
    /// Validations dispatched.
    pub scheduled: usize,
    /// Beliefs confirmed.
    pub verified: usize,
    /// Beliefs falsified and replaced by a correction.
    pub corrected: usize,
    /// Beliefs rejected.
    pub rejected: usize,
    /// Validations without a usable observation.
    pub inconclusive: usize,
    /// Verdicts held back by a contradiction.
    pub deferred: usize,
    /// Scheduled beliefs that had already settled when a worker reached them.
    pub skipped: usize,
    /// Validations that failed with an error, with its message.
    pub failures: Vec<(BeliefId, String)>,
}

impl CycleReport {
    fn tally(&mut self, outcome: &CommitOutcome) {
        match outcome {
            CommitOutcome::Verified { .. } => self.verified += 1,
            CommitOutcome::Corrected { .. } => self.corrected += 1,
            CommitOutcome::Inconclusive { .. } => self.inconclusive += 1,
            CommitOutcome::Deferred { .. } => self.deferred += 1,
            CommitOutcome::Rejected { .. } => self.rejected += 1,
        }
    }

    fn merge(&mut self, other: Self) {
        self.rounds += other.rounds;
        self.scheduled += other.scheduled;
        self.verified += other.verified;
        self.corrected += other.corrected;
        self.rejected += other.rejected;
        self.inconclusive += other.inconclusive;
        self.deferred += other.deferred;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }

    /// Returns true if nothing was scheduled.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.scheduled == 0
    }
}

/// Result of a cultural-learning intake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntakeReport {
    /// Ids of the stored beliefs, in proposal order.
    pub accepted: Vec<BeliefId>,
    /// Proposals that repeat a live belief.
    pub duplicates: usize,
    /// Proposals refused at the boundary (missing pattern or effect, bad values).
    pub rejected: usize,
}

/// State shared between the filter handle and its workers.
pub(crate) struct FilterCore {
    store: Arc<KnowledgeStore>,
    logic: LogicEngine,
    sandbox: Arc<dyn Sandbox>,
    config: FilterConfig,
    leases: LeaseTable,
    phase: RwLock<FilterPhase>,
}

impl FilterCore {
    /// Validation requested for a specific belief: busy leases fail fast.
    fn validate(&self, id: BeliefId) -> GroundResult<ValidationReport> {
        let lease = self.leases.acquire(id)?;
        retry(&self.config.commit_retry, "commit_transition", |attempt| {
            self.attempt(lease.id(), attempt)
        })
    }

    /// Validation picked up by a worker: a busy lease is waited out with
    /// backoff, and a belief that settled meanwhile is skipped.
    pub(crate) fn validate_scheduled(&self, id: BeliefId) -> GroundResult<Option<ValidationReport>> {
        let lease = retry(&self.config.commit_retry, "lease", |_| self.leases.acquire(id))?;
        let testable = self
            .store
            .get_belief(lease.id())?
            .is_some_and(|belief| belief.is_testable());
        if !testable {
            debug!(belief = %id, "belief settled before validation, skipping");
            return Ok(None);
        }
        retry(&self.config.commit_retry, "commit_transition", |attempt| {
            self.attempt(lease.id(), attempt)
        })
        .map(Some)
    }

    /// One read-test-commit pass. Fails with `StaleBelief` when the belief
    /// or its pair moved between the read and the commit.
    fn attempt(&self, id: BeliefId, retries: u32) -> GroundResult<ValidationReport> {
        let (belief, active) = {
            let view = self.store.read()?;
            let belief = view
                .belief(id)
                .cloned()
                .ok_or(ExecutionError::BeliefNotFound { id })?;
            let active = view.active_belief(&belief.pair()).cloned();
            (belief, active)
        };
        if !belief.is_testable() {
            return Err(ExecutionError::InvalidTransition {
                id,
                reason: format!("belief is {} and not queued for revalidation", belief.status),
            }
            .into());
        }
        let phase = self.phase()?;
        if awaits_genesis(&belief, phase) {
            return Err(ExecutionError::GenesisPending {
                id,
                phase: phase.to_string(),
            }
            .into());
        }
        let expected_active = active.as_ref().map(|a| a.id);

        let Some(hypothesis) = self.logic.hypothesize(&belief)? else {
            return self.settle_untestable(&belief, expected_active, retries);
        };

        let (verdict, observed, confidence) = match self.simulate(&hypothesis.scenario) {
            Ok(outcome) => self.judge(&hypothesis, &outcome),
            Err(err) => {
                warn!(belief = %id, scenario = %hypothesis.scenario, error = %err, "simulation unavailable");
                (Verdict::inconclusive(err.to_string()), None, None)
            }
        };
        log_verdict(&hypothesis, observed.as_ref(), &verdict);
        let record = ValidationRecord::new(&hypothesis, observed.clone(), verdict.clone());

        let kind = match (&verdict, &observed, confidence) {
            (Verdict::Confirmed, _, Some(confidence)) => {
                match contradiction(&belief, active.as_ref(), &belief.rule.effect) {
                    Some(conflict) => self.defer(conflict),
                    None => {
                        let floor = Confidence::clamped(self.config.verified_confidence_floor);
                        TransitionKind::Confirm {
                            confidence: confidence.max(floor),
                        }
                    }
                }
            }
            (Verdict::Falsified, Some(observed), Some(confidence)) => {
                let action = hypothesis.scenario.action;
                let effect = belief
                    .rule
                    .effect
                    .from_observation(action, &observed.value)
                    .ok_or_else(|| {
                        GroundError::internal(format!(
                            "{} has no manifestation under {action}",
                            belief.rule.effect.attribute
                        ))
                    })?;
                let effect = Effect::new(effect.attribute, effect.value)?;
                match contradiction(&belief, active.as_ref(), &effect) {
                    Some(conflict) => self.defer(conflict),
                    None => TransitionKind::Correct { effect, confidence },
                }
            }
            _ => TransitionKind::Inconclusive {
                max_attempts: self.config.max_attempts,
            },
        };

        let outcome = self.store.commit_transition(Transition {
            belief: id,
            expected_version: belief.version,
            expected_active,
            record: Some(record),
            kind,
        })?;

        Ok(ValidationReport {
            belief: id,
            observed,
            verdict: Some(verdict),
            hypothesis: Some(hypothesis),
            outcome,
            retries,
        })
    }

    /// No action can observe the belief's effect. A candidate is rejected
    /// outright; an active belief keeps its status and leaves the queue.
    fn settle_untestable(
        &self,
        belief: &Belief,
        expected_active: Option<BeliefId>,
        retries: u32,
    ) -> GroundResult<ValidationReport> {
        let kind = if belief.is_candidate() {
            TransitionKind::Reject {
                reason: RejectionReason::Untestable,
            }
        } else {
            TransitionKind::Inconclusive { max_attempts: 1 }
        };
        warn!(belief = %belief.id, rule = %belief.rule, "no scenario can observe this belief");
        let outcome = self.store.commit_transition(Transition {
            belief: belief.id,
            expected_version: belief.version,
            expected_active,
            record: None,
            kind,
        })?;
        Ok(ValidationReport {
            belief: belief.id,
            hypothesis: None,
            observed: None,
            verdict: None,
            outcome,
            retries,
        })
    }

    fn defer(&self, conflict: Conflict) -> TransitionKind {
        let detected = ExecutionError::ContradictionDetected {
            candidate: conflict.candidate,
            active: conflict.active,
            attribute: conflict.pair.attribute,
        };
        warn!(conflict = %conflict.id, error = %detected, "verdict deferred, active belief goes back under test");
        TransitionKind::Defer {
            conflict,
            max_deferrals: self.config.max_deferrals,
        }
    }

    /// Compares the observation with the prediction.
    fn judge(
        &self,
        hypothesis: &Hypothesis,
        outcome: &SimulationOutcome,
    ) -> (Verdict, Option<Effect>, Option<Confidence>) {
        let attribute = hypothesis.predicted.attribute;
        let Some(value) = outcome.get(attribute) else {
            return (
                Verdict::inconclusive(format!("sandbox did not report {attribute}")),
                None,
                None,
            );
        };
        let observed = match Effect::new(attribute, value.clone()) {
            Ok(observed) => observed,
            Err(err) => {
                return (
                    Verdict::inconclusive(format!("unusable observation: {err}")),
                    None,
                    None,
                )
            }
        };
        let verdict = if self.config.tolerance.matches(
            &hypothesis.predicted.value,
            &observed.value,
            outcome.tolerance,
        ) {
            Verdict::Confirmed
        } else {
            Verdict::Falsified
        };
        (verdict, Some(observed), Some(outcome.confidence))
    }

    /// Runs the sandbox on its own thread and waits at most the configured
    /// timeout. On expiry the call is cancelled and abandoned.
    fn simulate(&self, scenario: &Scenario) -> Result<SimulationOutcome, ExecutionError> {
        let timeout = self.config.sandbox_timeout();
        let token = CancellationToken::new();
        let (tx, rx) = bounded(1);

        let sandbox = Arc::clone(&self.sandbox);
        let call_token = token.clone();
        let call_scenario = scenario.clone();
        thread::Builder::new()
            .name("groundwork-sandbox".to_string())
            .spawn(move || {
                let _ = tx.send(sandbox.simulate(&call_scenario, &call_token));
            })
            .map_err(|e| ExecutionError::SimulationFailure {
                reason: format!("could not start simulation: {e}"),
            })?;

        match rx.recv_timeout(timeout) {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(failure)) => Err(ExecutionError::SimulationFailure {
                reason: failure.to_string(),
            }),
            Err(RecvTimeoutError::Timeout) => {
                token.cancel();
                Err(ExecutionError::SimulationTimeout {
                    duration_ms: self.config.sandbox_timeout_ms,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(ExecutionError::SimulationFailure {
                reason: "sandbox exited without a result".to_string(),
            }),
        }
    }

    fn phase(&self) -> GroundResult<FilterPhase> {
        self.phase.read().map(|p| *p).map_err(|_| lock_err("phase"))
    }

    fn set_phase(&self, phase: FilterPhase) -> GroundResult<()> {
        let mut current = self.phase.write().map_err(|_| lock_err("phase"))?;
        info!(from = %*current, to = %phase, "filter phase changed");
        *current = phase;
        Ok(())
    }
}

/// Cultural knowledge is not tested until the genesis baseline exists.
fn awaits_genesis(belief: &Belief, phase: FilterPhase) -> bool {
    phase != FilterPhase::Open && belief.provenance.is_cultural()
}

/// The conflict a verdict would cause: only a candidate whose effect
/// disagrees with the pair's active belief.
fn contradiction(belief: &Belief, active: Option<&Belief>, effect: &Effect) -> Option<Conflict> {
    let active = active?;
    if !belief.is_candidate() || active.id == belief.id || active.rule.effect.value == effect.value {
        return None;
    }
    Some(Conflict::new(
        belief.pair(),
        belief.id,
        effect.value.clone(),
        active.id,
        active.rule.effect.value.clone(),
    ))
}

fn log_verdict(hypothesis: &Hypothesis, observed: Option<&Effect>, verdict: &Verdict) {
    let observed = observed.map(ToString::to_string);
    info!(
        belief = %hypothesis.belief,
        scenario = %hypothesis.scenario,
        predicted = %hypothesis.predicted,
        observed = observed.as_deref().unwrap_or("-"),
        %verdict,
        "hypothesis tested"
    );
}

/// Owns the validation lifecycle of every belief in a store.
///
/// ```
/// use std::sync::Arc;
/// use groundwork::{
///     BeliefStatus, FilterConfig, KnowledgeStore, MaterialSandbox, RealityFilter, Worldview,
/// };
///
/// let store = Arc::new(KnowledgeStore::in_memory());
/// let filter = RealityFilter::start(
///     Arc::clone(&store),
///     Arc::new(MaterialSandbox::new()),
///     FilterConfig::default(),
/// )
/// .unwrap();
///
/// let report = filter.run_genesis(&Worldview::classic().unwrap()).unwrap();
/// assert_eq!(report.corrected, 1);
/// assert_eq!(store.list_candidates(BeliefStatus::Unverified).unwrap().count(), 0);
/// ```
pub struct RealityFilter {
    core: Arc<FilterCore>,
    pool: Option<WorkerPool>,
}

impl RealityFilter {
    /// Starts the worker pool. The filter begins in `AwaitingGenesis`.
    pub fn start(
        store: Arc<KnowledgeStore>,
        sandbox: Arc<dyn Sandbox>,
        config: FilterConfig,
    ) -> GroundResult<Self> {
        let config = config.validate()?;
        let core = Arc::new(FilterCore {
            logic: LogicEngine::new(Arc::clone(&store)),
            store,
            sandbox,
            leases: LeaseTable::default(),
            phase: RwLock::new(FilterPhase::AwaitingGenesis),
            config,
        });
        let pool = WorkerPool::start(
            core.config.workers,
            core.config.queue_capacity,
            Arc::clone(&core),
        )?;
        Ok(Self {
            core,
            pool: Some(pool),
        })
    }

    /// The knowledge store the filter commits to.
    #[must_use]
    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.core.store
    }

    /// The logic engine used to build hypotheses.
    #[must_use]
    pub fn logic(&self) -> &LogicEngine {
        &self.core.logic
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &FilterConfig {
        &self.core.config
    }

    /// The current lifecycle phase.
    pub fn phase(&self) -> GroundResult<FilterPhase> {
        self.core.phase()
    }

    /// Number of validations currently holding a lease.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.core.leases.len()
    }

    /// Runs one scenario through the sandbox under the configured timeout.
    ///
    /// Nothing is recorded or committed.
    ///
    /// # Errors
    ///
    /// `SimulationTimeout` or `SimulationFailure` when the sandbox gives no
    /// observation.
    pub fn observe(&self, scenario: &Scenario) -> GroundResult<SimulationOutcome> {
        Ok(self.core.simulate(scenario)?)
    }

    /// Validates one belief on the calling thread.
    ///
    /// # Errors
    ///
    /// `ValidationInProgress` if the belief is already being validated,
    /// `InvalidTransition` if it is neither unverified nor queued for
    /// revalidation, `GenesisPending` for cultural knowledge before genesis
    /// has finished, and `StaleBelief` if it kept changing underneath the
    /// commit after every retry.
    pub fn validate(&self, id: BeliefId) -> GroundResult<ValidationReport> {
        self.core.validate(id)
    }

    /// Runs one scheduling round and waits for its results.
    ///
    /// Active beliefs queued for revalidation go first, then unverified
    /// candidates oldest-first. Cultural candidates are only eligible once
    /// the filter is open. Each pair is scheduled at most once per round.
    pub fn run_cycle(&self) -> GroundResult<CycleReport> {
        let pool = self.pool.as_ref().ok_or(ExecutionError::Disconnected)?;
        let phase = self.core.phase()?;

        let mut candidates: Vec<Belief> = self
            .core
            .store
            .list_candidates(BeliefStatus::Unverified)?
            .filter(|b| !awaits_genesis(b, phase))
            .collect();
        // stable: genesis first, oldest first within each group
        candidates.sort_by_key(|b| !b.provenance.is_genesis());
        let queue = self
            .core
            .store
            .revalidation_queue()?
            .into_iter()
            .filter(|b| !awaits_genesis(b, phase))
            .chain(candidates);

        let mut claimed = HashSet::new();
        let mut pending = Vec::new();
        for belief in queue {
            if self.core.leases.is_held(belief.id) || !claimed.insert(belief.pair()) {
                continue;
            }
            match pool.submit_validation(belief.id) {
                Ok(rx) => pending.push((belief.id, rx)),
                Err(GroundError::Execution(ExecutionError::QueueFull { capacity })) => {
                    debug!(capacity, "validation queue full, deferring rest of round");
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        let mut report = CycleReport {
            rounds: 1,
            scheduled: pending.len(),
            ..CycleReport::default()
        };
        for (id, rx) in pending {
            match rx.recv() {
                Ok(Ok(Some(validation))) => report.tally(&validation.outcome),
                Ok(Ok(None)) => report.skipped += 1,
                Ok(Err(err)) => {
                    warn!(belief = %id, error = %err, "validation failed");
                    report.failures.push((id, err.to_string()));
                }
                Err(_) => report.failures.push((id, ExecutionError::Disconnected.to_string())),
            }
        }
        debug!(
            scheduled = report.scheduled,
            verified = report.verified,
            corrected = report.corrected,
            rejected = report.rejected,
            inconclusive = report.inconclusive,
            deferred = report.deferred,
            "validation round finished"
        );
        Ok(report)
    }

    /// Repeats rounds until one schedules nothing, or `max_rounds` is hit.
    pub fn run_until_settled(&self, max_rounds: usize) -> GroundResult<CycleReport> {
        let mut total = CycleReport::default();
        for _ in 0..max_rounds {
            let round = self.run_cycle()?;
            let idle = round.is_idle();
            total.merge(round);
            if idle {
                break;
            }
        }
        Ok(total)
    }

    /// Loads the seeds and validates them before anything else is scheduled.
    ///
    /// Returns once every seed has a terminal verdict; the filter is then
    /// open for cultural intake.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if genesis already ran. An internal error if the
    /// seeds are still unsettled after the round limit, in which case the
    /// filter stays closed to cultural candidates.
    pub fn run_genesis(&self, worldview: &Worldview) -> GroundResult<CycleReport> {
        {
            let mut phase = self.core.phase.write().map_err(|_| lock_err("phase"))?;
            if *phase != FilterPhase::AwaitingGenesis {
                return Err(ValidationError::InvalidConfig {
                    reason: format!("genesis cannot run in phase {phase}"),
                }
                .into());
            }
            *phase = FilterPhase::Genesis;
        }
        info!(
            source = %worldview.source,
            concepts = worldview.concepts.len(),
            entities = worldview.entities.len(),
            beliefs = worldview.beliefs.len(),
            "genesis started"
        );

        let store = &self.core.store;
        for (name, parent) in &worldview.concepts {
            store.ensure_concept(name, parent.as_deref())?;
        }
        for entity in &worldview.entities {
            store.ensure_entity(entity.clone())?;
        }
        let mut seeded = 0;
        for (rule, confidence) in &worldview.beliefs {
            let provenance = Provenance::genesis(worldview.source.clone());
            match store.add_belief(rule.clone(), provenance, BeliefStatus::Unverified, *confidence) {
                Ok(_) => seeded += 1,
                Err(GroundError::Execution(ExecutionError::DuplicateRule { existing })) => {
                    debug!(%existing, %rule, "genesis belief already known");
                }
                Err(err) => return Err(err),
            }
        }

        let report = self.run_until_settled(GENESIS_ROUND_LIMIT)?;
        let unsettled = store
            .list_candidates(BeliefStatus::Unverified)?
            .filter(|b| b.provenance.is_genesis())
            .count();
        if unsettled > 0 {
            return Err(GroundError::internal(format!(
                "genesis left {unsettled} beliefs unsettled after {} rounds",
                report.rounds
            )));
        }

        self.core.set_phase(FilterPhase::Open)?;
        info!(
            seeded,
            verified = report.verified,
            corrected = report.corrected,
            rejected = report.rejected,
            rounds = report.rounds,
            "genesis complete"
        );
        Ok(report)
    }

    /// Stores proposals as unverified cultural-learning beliefs.
    ///
    /// Malformed proposals are counted and dropped, never stored.
    pub fn intake(&self, proposals: Vec<Proposal>) -> GroundResult<IntakeReport> {
        let mut report = IntakeReport::default();
        for proposal in proposals {
            let checked = proposal
                .to_rule()
                .and_then(|rule| Ok((rule, proposal.confidence()?)));
            let (rule, confidence) = match checked {
                Ok(checked) => checked,
                Err(err) => {
                    debug!(snippet = %proposal.snippet, error = %err, "proposal refused");
                    report.rejected += 1;
                    continue;
                }
            };
            let source = if proposal.source.is_empty() {
                "cultural".to_string()
            } else {
                proposal.source
            };
            let provenance = Provenance::cultural(source, proposal.snippet);
            match self
                .core
                .store
                .add_belief(rule, provenance, BeliefStatus::Unverified, confidence)
            {
                Ok(id) => report.accepted.push(id),
                Err(GroundError::Execution(ExecutionError::DuplicateRule { existing })) => {
                    debug!(%existing, "proposal duplicates a known belief");
                    report.duplicates += 1;
                }
                Err(err) => return Err(err),
            }
        }
        info!(
            accepted = report.accepted.len(),
            duplicates = report.duplicates,
            rejected = report.rejected,
            "cultural intake"
        );
        Ok(report)
    }

    /// Runs a document through a language interface and takes in what it proposes.
    pub fn ingest_document(
        &self,
        interface: &dyn LanguageInterface,
        document: &str,
    ) -> GroundResult<IntakeReport> {
        let proposals = interface.propose_beliefs(document)?;
        self.intake(proposals)
    }

    /// Stops the worker pool after queued validations drain.
    pub fn shutdown(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}

impl Drop for RealityFilter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::pattern::{ActionPattern, EntityPattern};
    use crate::rule::CausalRule;
    use crate::sandbox::{MaterialSandbox, SandboxFailure};
    use crate::schema::{Action, AttributeKey};
    use crate::value::Value;

    /// Answers every drop with a fixed `shatters` value.
    struct Scripted {
        shatters: Mutex<Option<bool>>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(shatters: Option<bool>) -> Self {
            Self {
                shatters: Mutex::new(shatters),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn slow(shatters: bool, delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new(Some(shatters))
            }
        }

        fn set(&self, shatters: Option<bool>) {
            *self.shatters.lock().unwrap() = shatters;
        }
    }

    impl Sandbox for Scripted {
        fn simulate(
            &self,
            _scenario: &Scenario,
            cancel: &CancellationToken,
        ) -> Result<SimulationOutcome, SandboxFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if cancel.is_cancelled() {
                return Err(SandboxFailure::Cancelled);
            }
            match *self.shatters.lock().unwrap() {
                Some(shatters) => Ok(SimulationOutcome::new(Confidence::clamped(0.95))
                    .observe(AttributeKey::Shatters, shatters)),
                None => Err(SandboxFailure::Simulator {
                    reason: "scripted failure".to_string(),
                }),
            }
        }
    }

    fn config() -> FilterConfig {
        FilterConfig {
            workers: 2,
            sandbox_timeout_ms: 500,
            commit_retry: crate::config::RetryPolicy {
                max_retries: 4,
                initial_delay_ms: 1,
                max_delay_ms: 5,
            },
            ..FilterConfig::default()
        }
    }

    fn filter_with(sandbox: Arc<dyn Sandbox>, config: FilterConfig) -> RealityFilter {
        RealityFilter::start(Arc::new(KnowledgeStore::in_memory()), sandbox, config).unwrap()
    }

    fn brittle(entity: &str, value: bool) -> CausalRule {
        CausalRule::new(
            EntityPattern::entity(entity),
            ActionPattern::Any,
            Effect::new(AttributeKey::IsBrittle, value).unwrap(),
        )
    }

    fn add(filter: &RealityFilter, rule: CausalRule, status: BeliefStatus) -> BeliefId {
        filter
            .store()
            .add_belief(rule, Provenance::genesis("test"), status, Confidence::clamped(0.6))
            .unwrap()
    }

    #[test]
    fn test_confirmation_verifies_with_floor() {
        let filter = filter_with(Arc::new(Scripted::new(Some(true))), config());
        let id = add(&filter, brittle("vase", true), BeliefStatus::Unverified);

        let report = filter.validate(id).unwrap();
        assert_eq!(report.verdict, Some(Verdict::Confirmed));
        assert!(matches!(report.outcome, CommitOutcome::Verified { .. }));

        let belief = filter.store().get_belief(id).unwrap().unwrap();
        assert_eq!(belief.status, BeliefStatus::Verified);
        assert!((belief.confidence.value() - 0.95).abs() < f32::EPSILON);
        assert_eq!(filter.store().records_for_belief(id).unwrap().len(), 1);
    }

    #[test]
    fn test_falsification_learns_observed_effect() {
        let filter = filter_with(Arc::new(Scripted::new(Some(false))), config());
        let id = add(&filter, brittle("ball", true), BeliefStatus::Unverified);

        let report = filter.validate(id).unwrap();
        let CommitOutcome::Corrected { correction, .. } = report.outcome else {
            panic!("expected correction, got {:?}", report.outcome);
        };
        let corrected = filter.store().get_belief(correction).unwrap().unwrap();
        assert_eq!(corrected.status, BeliefStatus::Corrected);
        assert_eq!(corrected.rule.effect.value, Value::Bool(false));
        assert_eq!(corrected.corrects, Some(id));
        assert!(corrected.is_active());
    }

    #[test]
    fn test_failure_is_inconclusive_then_rejected() {
        let filter = filter_with(Arc::new(Scripted::new(None)), config());
        let id = add(&filter, brittle("cup", true), BeliefStatus::Unverified);

        for attempt in 1..=2 {
            let report = filter.validate(id).unwrap();
            assert!(matches!(report.verdict, Some(Verdict::Inconclusive { .. })));
            assert_eq!(
                report.outcome,
                CommitOutcome::Inconclusive {
                    belief: id,
                    attempts: attempt,
                    will_retry: true
                }
            );
        }
        let report = filter.validate(id).unwrap();
        assert_eq!(
            report.outcome,
            CommitOutcome::Rejected {
                belief: id,
                reason: RejectionReason::InconclusiveExhausted { attempts: 3 }
            }
        );
        assert!(matches!(
            filter.validate(id),
            Err(GroundError::Execution(ExecutionError::InvalidTransition { .. }))
        ));
    }

    #[test]
    fn test_timeout_is_inconclusive_and_cancels() {
        let sandbox = Arc::new(Scripted::slow(true, Duration::from_millis(200)));
        let filter = filter_with(
            sandbox,
            FilterConfig {
                sandbox_timeout_ms: 20,
                ..config()
            },
        );
        let id = add(&filter, brittle("plate", true), BeliefStatus::Unverified);

        let report = filter.validate(id).unwrap();
        let Some(Verdict::Inconclusive { reason }) = report.verdict else {
            panic!("expected inconclusive verdict");
        };
        assert!(reason.contains("timed out"));
        assert_eq!(
            filter.store().get_belief(id).unwrap().unwrap().status,
            BeliefStatus::Unverified
        );
    }

    #[test]
    fn test_untestable_candidate_rejected() {
        let filter = filter_with(Arc::new(MaterialSandbox::new()), config());
        let rule = CausalRule::new(
            EntityPattern::entity("anvil"),
            ActionPattern::Exactly(Action::Submerge),
            Effect::new(AttributeKey::IsBrittle, true).unwrap(),
        );
        let id = add(&filter, rule, BeliefStatus::Unverified);

        let report = filter.validate(id).unwrap();
        assert!(report.hypothesis.is_none());
        assert_eq!(
            report.outcome,
            CommitOutcome::Rejected {
                belief: id,
                reason: RejectionReason::Untestable
            }
        );
        assert!(filter.store().records_for_belief(id).unwrap().is_empty());
    }

    #[test]
    fn test_contradicting_candidate_is_deferred() {
        let sandbox = Arc::new(Scripted::new(Some(true)));
        let filter = filter_with(Arc::clone(&sandbox) as Arc<dyn Sandbox>, config());
        let active = add(&filter, brittle("jar", false), BeliefStatus::Verified);
        let candidate = add(&filter, brittle("jar", true), BeliefStatus::Unverified);

        let report = filter.validate(candidate).unwrap();
        assert!(matches!(
            report.outcome,
            CommitOutcome::Deferred { requeued, deferrals: 1, .. } if requeued == active
        ));
        assert_eq!(filter.store().revalidation_queue().unwrap().len(), 1);

        // The active belief is retested and falls; the candidate then wins.
        let revalidated = filter.validate(active).unwrap();
        assert!(matches!(revalidated.outcome, CommitOutcome::Corrected { .. }));
        let settled = filter.validate(candidate).unwrap();
        assert!(matches!(settled.outcome, CommitOutcome::Verified { .. }));

        let pair = brittle("jar", true).pair();
        let actives: Vec<_> = filter
            .store()
            .beliefs_for_pair(&pair)
            .unwrap()
            .into_iter()
            .filter(Belief::is_active)
            .collect();
        assert_eq!(actives.len(), 1);
        assert!(actives[0].id == candidate);
    }

    #[test]
    fn test_concurrent_validate_same_id() {
        let sandbox = Arc::new(Scripted::slow(true, Duration::from_millis(100)));
        let filter = Arc::new(filter_with(sandbox, config()));
        let id = add(&filter, brittle("mug", true), BeliefStatus::Unverified);

        let first = {
            let filter = Arc::clone(&filter);
            std::thread::spawn(move || filter.validate(id))
        };
        std::thread::sleep(Duration::from_millis(20));
        let second = filter.validate(id);
        assert!(matches!(
            second,
            Err(GroundError::Execution(ExecutionError::ValidationInProgress { .. }))
        ));
        assert!(first.join().unwrap().is_ok());
        assert_eq!(filter.in_flight(), 0);
    }

    #[test]
    fn test_cultural_waits_for_genesis() {
        let filter = filter_with(Arc::new(MaterialSandbox::new()), config());
        let proposal = Proposal::new(
            EntityPattern::entity("porcelain_doll")
                .with_attribute(AttributeKey::Material, "porcelain")
                .unwrap(),
            AttributeKey::IsBrittle,
            true,
            0.6,
            "porcelain dolls are brittle",
        );
        let intake = filter.intake(vec![proposal]).unwrap();
        assert_eq!(intake.accepted.len(), 1);

        let idle = filter.run_cycle().unwrap();
        assert!(idle.is_idle());

        filter.run_genesis(&Worldview::new("empty")).unwrap();
        assert_eq!(filter.phase().unwrap(), FilterPhase::Open);
        let report = filter.run_until_settled(4).unwrap();
        assert_eq!(report.verified, 1);
        assert!(matches!(
            filter.run_genesis(&Worldview::new("again")),
            Err(GroundError::Validation(ValidationError::InvalidConfig { .. }))
        ));
    }

    #[test]
    fn test_direct_validate_respects_genesis_barrier() {
        let filter = filter_with(Arc::new(MaterialSandbox::new()), config());
        let proposal = Proposal::new(
            EntityPattern::entity("porcelain_doll")
                .with_attribute(AttributeKey::Material, "porcelain")
                .unwrap(),
            AttributeKey::IsBrittle,
            true,
            0.6,
            "porcelain dolls are brittle",
        );
        let id = filter.intake(vec![proposal]).unwrap().accepted[0];
        assert_eq!(filter.phase().unwrap(), FilterPhase::AwaitingGenesis);

        assert!(matches!(
            filter.validate(id),
            Err(GroundError::Execution(ExecutionError::GenesisPending { id: pending, .. })) if pending == id
        ));
        let belief = filter.store().get_belief(id).unwrap().unwrap();
        assert_eq!(belief.status, BeliefStatus::Unverified);
        assert!(filter.store().records_for_belief(id).unwrap().is_empty());
        assert_eq!(filter.in_flight(), 0);

        // A seed is still testable before the filter opens.
        let vase = CausalRule::new(
            EntityPattern::entity("vase")
                .with_attribute(AttributeKey::Material, "glass")
                .unwrap(),
            ActionPattern::Any,
            Effect::new(AttributeKey::IsBrittle, true).unwrap(),
        );
        let seed = add(&filter, vase, BeliefStatus::Unverified);
        assert!(matches!(
            filter.validate(seed).unwrap().outcome,
            CommitOutcome::Verified { .. }
        ));

        filter.run_genesis(&Worldview::new("empty")).unwrap();
        let report = filter.validate(id).unwrap();
        assert_eq!(report.verdict, Some(Verdict::Confirmed));
    }

    #[test]
    fn test_intake_counts_duplicates_and_malformed() {
        let filter = filter_with(Arc::new(MaterialSandbox::new()), config());
        let good = Proposal::new(EntityPattern::entity("bowl"), AttributeKey::IsBrittle, true, 0.5, "a");
        let mut missing = good.clone();
        missing.pattern = None;
        let mut overconfident = good.clone();
        overconfident.confidence_hint = 2.0;

        let report = filter
            .intake(vec![good.clone(), good, missing, overconfident])
            .unwrap();
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.rejected, 2);

        let belief = filter.store().get_belief(report.accepted[0]).unwrap().unwrap();
        assert!(belief.provenance.is_cultural());
    }

    #[test]
    fn test_pool_queue_full() {
        let filter = filter_with(
            Arc::new(MaterialSandbox::new()),
            FilterConfig {
                workers: 1,
                queue_capacity: 1,
                ..config()
            },
        );
        let pool = filter.pool.as_ref().unwrap();
        let busy = pool.submit_sleep(Duration::from_millis(200)).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        let queued = pool.submit_sleep(Duration::from_millis(1)).unwrap();
        assert!(matches!(
            pool.submit_sleep(Duration::from_millis(1)),
            Err(GroundError::Execution(ExecutionError::QueueFull { capacity: 1 }))
        ));
        busy.recv_timeout(Duration::from_secs(1)).unwrap();
        queued.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_scripted_sandbox_can_change_its_mind() {
        let sandbox = Arc::new(Scripted::new(Some(true)));
        let filter = filter_with(Arc::clone(&sandbox) as Arc<dyn Sandbox>, config());
        let id = add(&filter, brittle("bulb", true), BeliefStatus::Unverified);
        filter.validate(id).unwrap();

        sandbox.set(Some(false));
        assert!(filter.store().requeue_for_revalidation(id).unwrap());
        let report = filter.validate(id).unwrap();
        let CommitOutcome::Corrected { correction, deactivated, .. } = report.outcome else {
            panic!("expected correction");
        };
        assert_eq!(deactivated, Some(id));
        let lineage: Vec<BeliefId> = filter
            .store()
            .lineage(correction)
            .unwrap()
            .iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(lineage, vec![correction, id]);
        assert_eq!(sandbox.calls.load(Ordering::SeqCst), 2);
    }
}
