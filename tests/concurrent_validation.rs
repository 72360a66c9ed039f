//! Concurrency tests for the reality filter.
//!
//! Sandbox calls are the slow step, so independent beliefs must be tested
//! in parallel while a single belief is only ever tested once at a time.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use groundwork::{
    ActionPattern, AttributeKey, BeliefId, BeliefStatus, CancellationToken, CausalRule,
    Confidence, Effect, EntityPattern, ExecutionError, FilterConfig, GroundError, KnowledgeStore,
    MaterialSandbox, Provenance, RealityFilter, RetryPolicy, Sandbox, SandboxFailure, Scenario,
    SimulationOutcome, Worldview,
};

/// Wraps the material sandbox with a fixed latency and tracks how many
/// calls overlap.
struct SlowSandbox {
    inner: MaterialSandbox,
    latency: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowSandbox {
    fn new(latency: Duration) -> Self {
        Self {
            inner: MaterialSandbox::new(),
            latency,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

impl Sandbox for SlowSandbox {
    fn simulate(
        &self,
        scenario: &Scenario,
        cancel: &CancellationToken,
    ) -> Result<SimulationOutcome, SandboxFailure> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(self.latency);
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.inner.simulate(scenario, cancel)
    }
}

fn config(workers: usize) -> FilterConfig {
    FilterConfig {
        workers,
        sandbox_timeout_ms: 5_000,
        commit_retry: RetryPolicy {
            max_retries: 8,
            initial_delay_ms: 1,
            max_delay_ms: 20,
        },
        ..FilterConfig::default()
    }
}

fn glass_object(name: &str) -> CausalRule {
    CausalRule::new(
        EntityPattern::entity(name)
            .with_attribute(AttributeKey::Material, "glass")
            .unwrap(),
        ActionPattern::Any,
        Effect::new(AttributeKey::IsBrittle, true).unwrap(),
    )
}

fn add_candidate(store: &KnowledgeStore, rule: CausalRule) -> BeliefId {
    store
        .add_belief(
            rule,
            Provenance::cultural("test", "fixture"),
            BeliefStatus::Unverified,
            Confidence::new(0.5).unwrap(),
        )
        .unwrap()
}

fn open_filter(sandbox: Arc<dyn Sandbox>, workers: usize) -> RealityFilter {
    let store = Arc::new(KnowledgeStore::in_memory());
    let filter = RealityFilter::start(store, sandbox, config(workers)).unwrap();
    filter.run_genesis(&Worldview::new("empty")).unwrap();
    filter
}

#[test]
fn test_independent_beliefs_validate_in_parallel() {
    let sandbox = Arc::new(SlowSandbox::new(Duration::from_millis(150)));
    let filter = Arc::new(open_filter(Arc::clone(&sandbox) as Arc<dyn Sandbox>, 4));
    let a = add_candidate(filter.store(), glass_object("vase"));
    let b = add_candidate(filter.store(), glass_object("window"));

    let barrier = Arc::new(Barrier::new(2));
    let started = Instant::now();
    let handles: Vec<_> = [a, b]
        .into_iter()
        .map(|id| {
            let filter = Arc::clone(&filter);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                filter.validate(id)
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }

    assert!(started.elapsed() < Duration::from_millis(290));
    assert_eq!(sandbox.peak.load(Ordering::SeqCst), 2);
    assert_eq!(filter.store().stats().unwrap().verified, 2);
}

#[test]
fn test_same_belief_twice_yields_one_in_progress_error() {
    let sandbox = Arc::new(SlowSandbox::new(Duration::from_millis(150)));
    let filter = Arc::new(open_filter(sandbox, 2));
    let id = add_candidate(filter.store(), glass_object("goblet"));

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let filter = Arc::clone(&filter);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                filter.validate(id)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let in_progress = results
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(GroundError::Execution(ExecutionError::ValidationInProgress { .. }))
            )
        })
        .count();
    assert_eq!(successes, 1);
    assert_eq!(in_progress, 1);
    assert_eq!(filter.store().records_for_belief(id).unwrap().len(), 1);
    assert_eq!(filter.in_flight(), 0);
}

#[test]
fn test_run_cycle_fans_out_and_settles() {
    let sandbox = Arc::new(SlowSandbox::new(Duration::from_millis(30)));
    let filter = open_filter(Arc::clone(&sandbox) as Arc<dyn Sandbox>, 4);
    let names = ["cup", "plate", "lamp", "jar", "bowl", "mirror", "bead", "lens"];
    for name in names {
        add_candidate(filter.store(), glass_object(name));
    }

    let report = filter.run_until_settled(8).unwrap();
    assert_eq!(report.verified, names.len());
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert!(sandbox.peak.load(Ordering::SeqCst) > 1);
    assert!(sandbox.peak.load(Ordering::SeqCst) <= 4);
    assert_eq!(
        filter
            .store()
            .list_candidates(BeliefStatus::Unverified)
            .unwrap()
            .count(),
        0
    );
}

#[test]
fn test_one_belief_per_pair_per_round() {
    let sandbox = Arc::new(SlowSandbox::new(Duration::from_millis(5)));
    let filter = open_filter(sandbox, 4);
    let pattern = EntityPattern::entity("marble")
        .with_attribute(AttributeKey::Material, "glass")
        .unwrap();
    let yes = CausalRule::new(
        pattern.clone(),
        ActionPattern::Any,
        Effect::new(AttributeKey::IsBrittle, true).unwrap(),
    );
    let no = yes.with_effect(Effect::new(AttributeKey::IsBrittle, false).unwrap());
    add_candidate(filter.store(), yes);
    add_candidate(filter.store(), no);

    let first = filter.run_cycle().unwrap();
    assert_eq!(first.scheduled, 1);
    let settled = filter.run_until_settled(8).unwrap();
    assert!(settled.failures.is_empty());

    let active: HashSet<BeliefId> = filter
        .store()
        .active_beliefs()
        .unwrap()
        .into_iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(active.len(), 1);
}

#[test]
fn test_concurrent_readers_see_consistent_state() {
    let sandbox = Arc::new(SlowSandbox::new(Duration::from_millis(10)));
    let filter = Arc::new(open_filter(sandbox, 4));
    for idx in 0..6 {
        add_candidate(filter.store(), glass_object(&format!("shard_{idx}")));
    }

    let reader = {
        let store = Arc::clone(filter.store());
        thread::spawn(move || {
            for _ in 0..50 {
                let stats = store.stats().unwrap();
                assert!(stats.active <= 6);
                assert_eq!(stats.verified + stats.unverified, 6);
                thread::sleep(Duration::from_millis(2));
            }
        })
    };
    let report = filter.run_until_settled(8).unwrap();
    reader.join().unwrap();
    assert_eq!(report.verified, 6);
}
