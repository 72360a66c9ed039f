//! The ground-truth oracle.
//!
//! A [`Sandbox`] runs a scenario and reports what it observed. The core
//! never trusts a belief over the sandbox: a verdict is only as good as
//! the observation behind it. Calls may be slow, so each one receives a
//! [`CancellationToken`] that the caller trips when it stops waiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

use crate::confidence::Confidence;
use crate::record::{Instrument, Scenario, SimulationOutcome};
use crate::schema::{Action, AttributeKey};

/// Cooperative cancellation flag shared between caller and sandbox.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A token that has not been tripped.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the sandbox to stop. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once `cancel` was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Why a simulation produced no observation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SandboxFailure {
    /// The caller stopped waiting.
    #[error("simulation cancelled")]
    Cancelled,

    /// The scenario lacks an attribute the simulation needs.
    #[error("scenario is missing intrinsic attribute '{attribute}'")]
    Underspecified {
        /// The missing attribute.
        attribute: AttributeKey,
    },

    /// The simulator itself failed.
    #[error("simulator error: {reason}")]
    Simulator {
        /// What went wrong.
        reason: String,
    },
}

/// A ground-truth oracle.
///
/// Must be safe to call repeatedly with the same scenario; results need to
/// be repeatable within the declared tolerance, not bit-exact.
pub trait Sandbox: Send + Sync {
    /// Runs `scenario`. Implementations should poll `cancel` during long work.
    fn simulate(
        &self,
        scenario: &Scenario,
        cancel: &CancellationToken,
    ) -> Result<SimulationOutcome, SandboxFailure>;
}

impl<S: Sandbox + ?Sized> Sandbox for Arc<S> {
    fn simulate(
        &self,
        scenario: &Scenario,
        cancel: &CancellationToken,
    ) -> Result<SimulationOutcome, SandboxFailure> {
        (**self).simulate(scenario, cancel)
    }
}

const BRITTLE_MATERIALS: &[&str] = &["glass", "porcelain", "ceramic"];
const BUOYANT_MATERIALS: &[&str] = &["wood", "rubber", "plastic"];
const HARD_MATERIALS: &[&str] = &[
    "glass", "porcelain", "ceramic", "wood", "plastic", "metal", "stone",
];

const GRAVITY: f64 = 9.8;
const DROP_HEIGHT_M: f64 = 2.0;
const SHATTER_IMPACT: f64 = 5.0;
const DEFAULT_MASS_KG: f64 = 1.0;
/// A tool at or below this mass does not deliver a breaking blow.
pub const MIN_STRIKING_MASS_KG: f64 = 0.2;

/// Reference oracle driven by material properties.
///
/// Brittle materials shatter on a drop once the impact proxy
/// `mass * g * height` exceeds the shatter threshold. A bare strike always
/// shatters them. A strike with an instrument only does when the tool is
/// hard and heavier than [`MIN_STRIKING_MASS_KG`]. Anything that does not
/// shatter bounces unless it is brittle. Wood, rubber and plastic float.
#[derive(Debug, Clone)]
pub struct MaterialSandbox {
    confidence: Confidence,
}

impl Default for MaterialSandbox {
    fn default() -> Self {
        Self {
            confidence: Confidence::clamped(0.99),
        }
    }
}

impl MaterialSandbox {
    /// The oracle with confidence 0.99.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the confidence attached to every observation.
    #[must_use]
    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    fn impact(scenario: &Scenario) -> f64 {
        let mass = scenario
            .attribute(AttributeKey::MassKg)
            .and_then(|v| v.as_scalar())
            .unwrap_or(DEFAULT_MASS_KG);
        mass * GRAVITY * DROP_HEIGHT_M
    }

    /// Whether a blow with `tool` can break something brittle.
    ///
    /// An explicit `is_hard` wins over the tool's material.
    fn breaking_blow(tool: &Instrument) -> Result<bool, SandboxFailure> {
        let hard = match tool.attribute(AttributeKey::IsHard).and_then(|v| v.as_bool()) {
            Some(hard) => hard,
            None => {
                let material = tool.material().ok_or(SandboxFailure::Underspecified {
                    attribute: AttributeKey::IsHard,
                })?;
                HARD_MATERIALS.contains(&material)
            }
        };
        let mass = tool
            .attribute(AttributeKey::MassKg)
            .and_then(|v| v.as_scalar())
            .unwrap_or(DEFAULT_MASS_KG);
        Ok(hard && mass > MIN_STRIKING_MASS_KG)
    }
}

impl Sandbox for MaterialSandbox {
    fn simulate(
        &self,
        scenario: &Scenario,
        cancel: &CancellationToken,
    ) -> Result<SimulationOutcome, SandboxFailure> {
        if cancel.is_cancelled() {
            return Err(SandboxFailure::Cancelled);
        }
        let material = scenario.material().ok_or(SandboxFailure::Underspecified {
            attribute: AttributeKey::Material,
        })?;
        let brittle = BRITTLE_MATERIALS.contains(&material);
        let outcome = SimulationOutcome::new(self.confidence);

        let outcome = match scenario.action {
            Action::Drop => {
                let impact = Self::impact(scenario);
                let shatters = brittle && impact > SHATTER_IMPACT;
                trace!(%scenario, impact, shatters, "drop simulated");
                outcome
                    .observe(AttributeKey::Shatters, shatters)
                    .observe(AttributeKey::Bounces, !shatters && !brittle)
            }
            Action::Strike => {
                let shatters = match &scenario.instrument {
                    Some(tool) => brittle && Self::breaking_blow(tool)?,
                    None => brittle,
                };
                trace!(%scenario, shatters, "strike simulated");
                outcome.observe(AttributeKey::Shatters, shatters)
            }
            Action::Submerge => {
                outcome.observe(AttributeKey::Floats, BUOYANT_MATERIALS.contains(&material))
            }
        };
        Ok(outcome)
    }
}
