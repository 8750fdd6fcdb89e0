//! Typed errors for commissioning phase execution.
//!
//! A concrete phase's `execute_step`/`finalize_phase` return `PhaseError`
//! for anything that goes wrong below the step-result level. The engine
//! treats every `PhaseError` from a step as retryable, folding it into the
//! bounded-retry path with the error text as the message; the variants exist
//! so callers and logs can still tell a flaky control point from a hard bug.

use thiserror::Error;

/// Errors a concrete phase may raise during step execution or finalization.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Control point access failed: {0}")]
    ControlPoint(String),

    #[error("Step {step} timed out after {seconds}s")]
    StepTimeout { step: String, seconds: f64 },

    #[error("Cavity {cavity} in unexpected state: {details}")]
    UnexpectedState { cavity: String, details: String },

    #[error("Missing context parameter: {0}")]
    MissingParameter(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
