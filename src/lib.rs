//! # Groundwork - belief revision against a ground-truth oracle
//!
//! Groundwork keeps a causal knowledge base in which every entry carries
//! an explicit verification status. Beliefs are proposed (seeded at
//! genesis or learned from text), tested against a sandbox, and either
//! verified or permanently corrected to what the sandbox observed.
//!
//! ## Core Concepts
//!
//! - **Belief**: a causal rule plus status, confidence and provenance
//! - **KnowledgeStore**: the versioned belief graph and its audit trail
//! - **LogicEngine**: predictions derived from the beliefs, verified-only by default
//! - **RealityFilter**: the state machine that tests, verifies and corrects beliefs
//! - **Sandbox**: the ground-truth oracle every verdict comes from
//!
//! ## Usage
//!
//! ```rust
//! use groundwork::{
//!     Action, ActionPattern, AttributeKey, BeliefStatus, CausalRule, Confidence, Effect,
//!     EntityPattern, KnowledgeStore, LogicEngine, Provenance, ReasoningMode,
//! };
//! use std::sync::Arc;
//!
//! let store = Arc::new(KnowledgeStore::in_memory());
//! let rule = CausalRule::new(
//!     EntityPattern::entity("porcelain_doll"),
//!     ActionPattern::Any,
//!     Effect::new(AttributeKey::IsBrittle, true)?,
//! );
//! store.add_belief(
//!     rule,
//!     Provenance::cultural("toy-catalogue", "porcelain dolls are brittle"),
//!     BeliefStatus::Unverified,
//!     Confidence::new(0.6)?,
//! )?;
//!
//! let logic = LogicEngine::new(store);
//! // Unverified knowledge is invisible unless the caller opts in.
//! assert!(logic
//!     .predict("porcelain_doll", Action::Drop, ReasoningMode::VerifiedOnly)
//!     .unwrap_err()
//!     .is_no_applicable_belief());
//! let guess = logic.predict("porcelain_doll", Action::Drop, ReasoningMode::AllowUnverified)?;
//! assert!(guess.uses_unverified());
//! # Ok::<(), groundwork::GroundError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod belief;
pub mod confidence;
pub mod conflict;
pub mod entity;
pub mod error;
pub mod pattern;
pub mod record;
pub mod rule;
pub mod schema;
pub mod value;

// Components
pub mod config;
pub mod engine;
pub mod filter;
pub mod language;
pub mod logic;
pub mod sandbox;
pub mod store;

pub use belief::{
    Belief, BeliefBuilder, BeliefId, BeliefStatus, Lifecycle, Provenance, RejectionReason,
};
pub use confidence::Confidence;
pub use conflict::{Conflict, ConflictId, ConflictResolution, ConflictStatus};
pub use entity::{canonical_name, Concept, ConceptId, Entity, EntityId, ROOT_CONCEPT};
pub use error::{ExecutionError, GroundError, GroundResult, ValidationError};
pub use pattern::{ActionPattern, EntityPattern, Specificity};
pub use record::{
    Hypothesis, HypothesisId, Instrument, RecordId, Scenario, SimulationOutcome, ValidationRecord,
    Verdict,
};
pub use rule::{CausalRule, Effect, PairKey, Precondition, RuleFingerprint};
pub use schema::{Action, AttributeKey, AttributeRole, EntityKind, ValueKind};
pub use value::Value;

pub use config::{EngineConfig, FilterConfig, RetryPolicy, StoreConfig, TolerancePolicy};
pub use engine::{GroundedEngine, ToolUseReport};
pub use filter::{
    CycleReport, FilterPhase, IntakeReport, RealityFilter, ValidationReport, Worldview,
};
pub use language::{LanguageInterface, PhrasebookInterface, Proposal};
pub use logic::{LogicEngine, PredictedEffect, Prediction, ReasoningMode, ToolUsePrediction};
pub use sandbox::{CancellationToken, MaterialSandbox, Sandbox, SandboxFailure};
pub use store::{
    ChangeSet, CommitOutcome, KnowledgeSnapshot, KnowledgeStore, StoreStats, StoreView,
    Transition, TransitionKind,
};
