//! Journal replay tests for the knowledge store.
//!
//! These verify that the store:
//! - Rebuilds beliefs, the active index and the audit trail from its journal
//! - Survives a torn final write by dropping only the torn change
//! - Keeps its contents across compaction

#![cfg(feature = "persistent")]

use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;

use groundwork::{
    Action, ActionPattern, AttributeKey, BeliefId, BeliefStatus, CausalRule, Confidence, Effect,
    EngineConfig, EntityPattern, GroundedEngine, KnowledgeStore, LogicEngine, MaterialSandbox,
    PhrasebookInterface, Provenance, ReasoningMode, StoreConfig, Value, Worldview,
};
use tempfile::tempdir;

fn active_ids(store: &KnowledgeStore) -> BTreeSet<String> {
    store
        .active_beliefs()
        .unwrap()
        .iter()
        .map(|b| b.id.to_string())
        .collect()
}

fn candidate(name: &str) -> CausalRule {
    CausalRule::new(
        EntityPattern::entity(name),
        ActionPattern::Any,
        Effect::new(AttributeKey::IsBuoyant, true).unwrap(),
    )
}

fn add(store: &KnowledgeStore, name: &str) -> BeliefId {
    store
        .add_belief(
            candidate(name),
            Provenance::cultural("notes", name),
            BeliefStatus::Unverified,
            Confidence::new(0.4).unwrap(),
        )
        .unwrap()
}

#[test]
fn test_engine_state_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("groundwork.journal");

    let mut config = EngineConfig::default();
    config.store = StoreConfig::journaled(&path);
    let engine = GroundedEngine::start(
        config,
        Arc::new(MaterialSandbox::new()),
        &Worldview::classic().unwrap(),
    )
    .unwrap();
    let phrasebook = PhrasebookInterface::new("catalogue").unwrap();
    engine
        .ingest_document(&phrasebook, "Porcelain dolls are brittle. Stone floats.")
        .unwrap();
    engine.run_until_settled(8).unwrap();

    let stats = engine.store().stats().unwrap();
    let active = active_ids(engine.store());
    let trail = engine.store().audit_trail().unwrap();
    let conflicts = engine.store().conflicts().unwrap().len();
    engine.shutdown().unwrap();

    let reopened = Arc::new(KnowledgeStore::open(StoreConfig::journaled(&path)).unwrap());
    assert_eq!(reopened.stats().unwrap(), stats);
    assert_eq!(active_ids(&reopened), active);
    assert_eq!(reopened.audit_trail().unwrap(), trail);
    assert_eq!(reopened.conflicts().unwrap().len(), conflicts);

    // Correction chains come back intact.
    let ball = reopened
        .get_active_belief(&EntityPattern::entity("rubber_ball"), AttributeKey::IsBrittle)
        .unwrap()
        .unwrap();
    assert_eq!(ball.status, BeliefStatus::Corrected);
    assert_eq!(reopened.lineage(ball.id).unwrap().len(), 2);

    let logic = LogicEngine::new(Arc::clone(&reopened));
    let stone = logic
        .predict("stone", Action::Submerge, ReasoningMode::VerifiedOnly)
        .unwrap();
    assert_eq!(
        stone.effect(AttributeKey::Floats).unwrap().value,
        Value::Bool(false)
    );
}

#[test]
fn test_torn_tail_drops_only_last_change() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("torn.journal");

    let ids: Vec<BeliefId> = {
        let store = KnowledgeStore::open(StoreConfig::journaled(&path)).unwrap();
        ["log", "cork", "raft"]
            .iter()
            .map(|name| add(&store, name))
            .collect()
    };

    // Simulate a crash mid-append.
    let size = fs::metadata(&path).unwrap().len();
    let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(size - 5).unwrap();
    drop(file);

    let store = KnowledgeStore::open(StoreConfig::journaled(&path)).unwrap();
    assert!(store.get_belief(ids[0]).unwrap().is_some());
    assert!(store.get_belief(ids[1]).unwrap().is_some());
    assert!(store.get_belief(ids[2]).unwrap().is_none());

    // The journal keeps working after recovery.
    let again = add(&store, "raft");
    drop(store);
    let store = KnowledgeStore::open(StoreConfig::journaled(&path)).unwrap();
    assert!(store.get_belief(again).unwrap().is_some());
    assert_eq!(store.stats().unwrap().unverified, 3);
}

#[test]
fn test_compaction_preserves_contents() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("compact.journal");
    let config = StoreConfig {
        max_journal_bytes: 1024,
        ..StoreConfig::journaled(&path)
    };

    let store = KnowledgeStore::open(config.clone()).unwrap();
    for idx in 0..12 {
        add(&store, &format!("plank_{idx}"));
    }
    assert!(fs::metadata(&path).unwrap().len() > 1024);
    // Over the limit, so this flush compacts.
    store.flush().unwrap();
    let compacted = KnowledgeStore::open(config.clone()).unwrap();
    assert_eq!(compacted.stats().unwrap(), store.stats().unwrap());
    drop(compacted);

    add(&store, "plank_12");
    assert!(store.compact().unwrap());
    let stats = store.stats().unwrap();
    drop(store);

    let reopened = KnowledgeStore::open(config).unwrap();
    assert_eq!(reopened.stats().unwrap(), stats);
    assert_eq!(reopened.stats().unwrap().unverified, 13);
}

#[test]
fn test_in_memory_store_has_nothing_to_flush() {
    let store = KnowledgeStore::open(StoreConfig::default()).unwrap();
    add(&store, "buoy");
    store.flush().unwrap();
    assert!(!store.compact().unwrap());
}
