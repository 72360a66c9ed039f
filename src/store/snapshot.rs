//! Serialized form of the knowledge store.

use serde::{Deserialize, Serialize};

use crate::belief::Belief;
use crate::conflict::Conflict;
use crate::entity::{Concept, Entity};
use crate::error::{GroundError, GroundResult};
use crate::record::ValidationRecord;

use super::state::StoreState;

/// Everything needed to reconstruct a store.
///
/// Contains the node set, every belief (inactive and superseded ones
/// included, with their links) and the full validation log. There is no
/// active-belief index: it is recomputed from belief status on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeSnapshot {
    /// Concept taxonomy nodes.
    pub concepts: Vec<Concept>,
    /// Every known entity.
    pub entities: Vec<Entity>,
    /// Every belief, whatever its status.
    pub beliefs: Vec<Belief>,
    /// The full validation log, oldest first.
    pub records: Vec<ValidationRecord>,
    /// Contradiction deferrals.
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
}

impl KnowledgeSnapshot {
    /// Serializes the snapshot as JSON.
    pub fn to_json(&self) -> GroundResult<String> {
        serde_json::to_string(self)
            .map_err(|e| GroundError::storage(format!("snapshot serialization failed: {e}")))
    }

    /// Parses a snapshot written by [`KnowledgeSnapshot::to_json`].
    pub fn from_json(text: &str) -> GroundResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| GroundError::storage(format!("snapshot deserialization failed: {e}")))
    }
}

impl StoreState {
    pub(crate) fn to_snapshot(&self) -> KnowledgeSnapshot {
        let mut concepts: Vec<Concept> = self.concepts().cloned().collect();
        concepts.sort_by(|a, b| a.name.cmp(&b.name));
        let mut entities: Vec<Entity> = self.entities().cloned().collect();
        entities.sort_by(|a, b| a.name.cmp(&b.name));
        KnowledgeSnapshot {
            concepts,
            entities,
            beliefs: self.beliefs().to_vec(),
            records: self.records().to_vec(),
            conflicts: self.conflicts().to_vec(),
        }
    }

    pub(crate) fn from_snapshot(snapshot: KnowledgeSnapshot) -> GroundResult<Self> {
        Self::rebuild(
            snapshot.concepts,
            snapshot.entities,
            snapshot.beliefs,
            snapshot.records,
            snapshot.conflicts,
        )
    }
}
