//! The assembled system: store, logic engine and reality filter.
//!
//! [`GroundedEngine::start`] is the documented initialization path (open
//! the store, run genesis) and [`GroundedEngine::shutdown`] the matching
//! shutdown (drain validations, flush the journal). Everything in between
//! goes through the handle; there is no ambient global state.

use std::sync::Arc;

use tracing::info;

use crate::belief::BeliefId;
use crate::config::EngineConfig;
use crate::error::GroundResult;
use crate::filter::{CycleReport, IntakeReport, RealityFilter, ValidationReport, Worldview};
use crate::language::{LanguageInterface, Proposal};
use crate::logic::{LogicEngine, Prediction, ReasoningMode, ToolUsePrediction};
use crate::sandbox::Sandbox;
use crate::schema::{Action, AttributeKey};
use crate::store::KnowledgeStore;
use crate::value::Value;

/// A tool-use prediction next to what the sandbox observed.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUseReport {
    /// What the knowledge base expected.
    pub prediction: ToolUsePrediction,
    /// Observed `shatters`, if the sandbox reported it.
    pub observed: Option<bool>,
}

impl ToolUseReport {
    /// Prediction and observation agree. A missing side never agrees.
    #[must_use]
    pub fn consistent(&self) -> bool {
        match (self.prediction.shatters(), self.observed) {
            (Some(predicted), Some(observed)) => predicted == observed,
            _ => false,
        }
    }
}

/// A running knowledge base that only trusts what its sandbox confirms.
///
/// ```
/// use std::sync::Arc;
/// use groundwork::{Action, AttributeKey, EngineConfig, GroundedEngine, MaterialSandbox, Value, Worldview};
///
/// let engine = GroundedEngine::start(
///     EngineConfig::default(),
///     Arc::new(MaterialSandbox::new()),
///     &Worldview::classic().unwrap(),
/// )
/// .unwrap();
///
/// // Genesis corrected the flawed seed: the ball does not shatter.
/// let prediction = engine.reason("rubber_ball", Action::Drop, false).unwrap();
/// let shatters = prediction.effect(AttributeKey::Shatters).unwrap();
/// assert_eq!(shatters.value, Value::Bool(false));
///
/// engine.shutdown().unwrap();
/// ```
pub struct GroundedEngine {
    store: Arc<KnowledgeStore>,
    logic: LogicEngine,
    filter: RealityFilter,
    genesis: CycleReport,
}

impl GroundedEngine {
    /// Opens the store, starts the validation pool and runs genesis.
    ///
    /// The engine is returned open for cultural intake.
    pub fn start(
        config: EngineConfig,
        sandbox: Arc<dyn Sandbox>,
        worldview: &Worldview,
    ) -> GroundResult<Self> {
        let config = config.validate()?;
        let store = Arc::new(KnowledgeStore::open(config.store)?);
        let filter = RealityFilter::start(Arc::clone(&store), sandbox, config.filter)?;
        let genesis = filter.run_genesis(worldview)?;
        info!(stats = ?store.stats()?, "engine started");
        Ok(Self {
            logic: LogicEngine::new(Arc::clone(&store)),
            store,
            filter,
            genesis,
        })
    }

    /// Downstream query surface.
    ///
    /// # Errors
    ///
    /// `NoApplicableBelief` when nothing admissible is known; callers
    /// should present that as "unknown".
    pub fn reason(
        &self,
        entity: &str,
        action: Action,
        allow_unverified: bool,
    ) -> GroundResult<Prediction> {
        self.logic.reason(entity, action, allow_unverified)
    }

    /// Predicts what striking `target` with `tool` does, then asks the
    /// sandbox.
    ///
    /// The comparison is reported, not learned from: no belief changes.
    pub fn reason_about_tool_use(
        &self,
        tool: &str,
        target: &str,
        allow_unverified: bool,
    ) -> GroundResult<ToolUseReport> {
        let mode = ReasoningMode::from_allow_unverified(allow_unverified);
        let prediction = self.logic.predict_tool_use(tool, target, mode)?;
        let outcome = self.filter.observe(&prediction.scenario)?;
        let observed = outcome.get(AttributeKey::Shatters).and_then(Value::as_bool);
        let report = ToolUseReport {
            prediction,
            observed,
        };
        info!(
            scenario = %report.prediction.scenario,
            predicted = ?report.prediction.shatters(),
            ?observed,
            consistent = report.consistent(),
            "tool use checked"
        );
        Ok(report)
    }

    /// Stores proposals as unverified cultural beliefs.
    pub fn intake(&self, proposals: Vec<Proposal>) -> GroundResult<IntakeReport> {
        self.filter.intake(proposals)
    }

    /// Reads proposals from `document` and stores them.
    pub fn ingest_document(
        &self,
        interface: &dyn LanguageInterface,
        document: &str,
    ) -> GroundResult<IntakeReport> {
        self.filter.ingest_document(interface, document)
    }

    /// Validates one belief now. See [`RealityFilter::validate`].
    pub fn validate(&self, id: BeliefId) -> GroundResult<ValidationReport> {
        self.filter.validate(id)
    }

    /// Runs validation rounds until nothing schedulable remains.
    pub fn run_until_settled(&self, max_rounds: usize) -> GroundResult<CycleReport> {
        self.filter.run_until_settled(max_rounds)
    }

    /// The knowledge store.
    #[must_use]
    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    /// The read-only reasoning surface.
    #[must_use]
    pub fn logic(&self) -> &LogicEngine {
        &self.logic
    }

    /// The reality filter.
    #[must_use]
    pub fn filter(&self) -> &RealityFilter {
        &self.filter
    }

    /// What genesis validation did.
    #[must_use]
    pub fn genesis_report(&self) -> &CycleReport {
        &self.genesis
    }

    /// Stops the validation pool once queued work drains, then flushes the
    /// journal.
    pub fn shutdown(mut self) -> GroundResult<()> {
        self.filter.shutdown();
        self.store.flush()?;
        info!(stats = ?self.store.stats()?, "engine shut down");
        Ok(())
    }
}
