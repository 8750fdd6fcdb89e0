//! The step driver: walks a phase's declared steps applying the uniform
//! retry/abort/skip policy and appending the checkpoint trail.

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::engine::context::PhaseContext;
use crate::engine::step::{PhaseResult, PhaseStepResult};
use crate::errors::PhaseError;
use crate::model::{CommissioningPhase, PhaseCheckpoint, PhaseStatus};

/// Maximum attempts per step before a `Retry` outcome becomes a hard failure.
pub const MAX_RETRIES_PER_STEP: u32 = 3;

const ABORT_NOTES: &str = "Phase aborted by user request";
const ABORT_ERROR: &str = "User requested abort";

/// Contract a concrete commissioning phase implements.
///
/// The engine holds only this interface: a phase says *what* its steps do,
/// the runner decides how failures, retries, and aborts are handled.
/// `execute_step` and `finalize_phase` may return `Err`; the runner folds a
/// step error into the bounded-retry path with the error text as message.
pub trait PhaseExecutor {
    /// The phase this executor implements. Constant per implementation.
    fn phase_type(&self) -> CommissioningPhase;

    /// Check whether the phase can run. Pure check, assumed idempotent;
    /// returns `(is_valid, message)`.
    fn validate_prerequisites(&mut self, context: &PhaseContext) -> (bool, String);

    /// Ordered step names. Fixed for the implementation; an empty list is a
    /// phase with only a finalize action.
    fn phase_steps(&self) -> Vec<String>;

    /// Perform one step.
    fn execute_step(
        &mut self,
        context: &mut PhaseContext,
        step_name: &str,
    ) -> Result<PhaseStepResult, PhaseError>;

    /// Called once after every step succeeded or was skipped. Persists
    /// phase-specific results onto the record.
    fn finalize_phase(&mut self, context: &mut PhaseContext) -> Result<(), PhaseError>;

    /// Human-readable phase name, e.g. `"Cold Landing"`.
    fn phase_name(&self) -> String {
        self.phase_type().display_name()
    }
}

/// Drives one phase run against a mutably borrowed context.
pub struct PhaseRunner<'a> {
    context: &'a mut PhaseContext,
}

impl<'a> PhaseRunner<'a> {
    pub fn new(context: &'a mut PhaseContext) -> Self {
        Self { context }
    }

    /// Execute the complete phase. Returns `true` only when every step
    /// succeeded or was skipped and `finalize_phase` returned `Ok`.
    ///
    /// Every terminal path leaves exactly one checkpoint describing why
    /// execution stopped, except a finalize failure, where the missing
    /// `phase_complete` checkpoint is the signal.
    pub fn run(&mut self, phase: &mut dyn PhaseExecutor) -> bool {
        let phase_type = phase.phase_type();
        let phase_name = phase.phase_name();

        if self.context.is_abort_requested() {
            warn!(phase = phase_type.as_str(), "abort requested before phase start");
            self.set_status(phase_type, PhaseStatus::Failed);
            self.append_checkpoint(
                phase_type,
                "phase_start",
                false,
                ABORT_NOTES,
                None,
                Some(ABORT_ERROR.to_string()),
            );
            return false;
        }

        let (is_valid, message) = phase.validate_prerequisites(self.context);
        if !is_valid {
            warn!(
                phase = phase_type.as_str(),
                reason = message.as_str(),
                "prerequisites not met"
            );
            self.set_status(phase_type, PhaseStatus::Failed);
            self.append_checkpoint(
                phase_type,
                "prerequisite_check",
                false,
                &format!("Prerequisites not met: {}", message),
                None,
                None,
            );
            return false;
        }

        self.mark_phase_started(phase_type, &phase_name);

        for step_name in phase.phase_steps() {
            // Abort is observed only at step boundaries, never mid-step.
            if self.context.is_abort_requested() {
                warn!(
                    phase = phase_type.as_str(),
                    step = step_name.as_str(),
                    "phase aborted at step boundary"
                );
                self.set_status(phase_type, PhaseStatus::Failed);
                self.append_checkpoint(
                    phase_type,
                    &step_name,
                    false,
                    ABORT_NOTES,
                    None,
                    Some(ABORT_ERROR.to_string()),
                );
                return false;
            }

            if !self.execute_step_with_retry(phase, &step_name) {
                return false;
            }
        }

        if let Err(err) = phase.finalize_phase(self.context) {
            warn!(
                phase = phase_type.as_str(),
                error = %err,
                "finalize_phase failed"
            );
            self.set_status(phase_type, PhaseStatus::Failed);
            return false;
        }

        self.mark_phase_completed(phase_type, &phase_name);
        true
    }

    fn execute_step_with_retry(
        &mut self,
        phase: &mut dyn PhaseExecutor,
        step_name: &str,
    ) -> bool {
        let phase_type = phase.phase_type();

        for attempt in 1..=MAX_RETRIES_PER_STEP {
            debug!(
                phase = phase_type.as_str(),
                step = step_name,
                attempt,
                "executing step"
            );

            let step_result = match phase.execute_step(self.context, step_name) {
                Ok(result) => result,
                // A step error is the Rust rendition of "may raise": fold it
                // into the retry path with the error text as the message.
                Err(err) => PhaseStepResult::retry(&err.to_string()),
            };
            let message = step_result.message.clone();
            let data = step_result.data.clone();

            match step_result.result {
                PhaseResult::Success => {
                    self.append_checkpoint(phase_type, step_name, true, &message, data, None);
                    return true;
                }
                PhaseResult::Skip => {
                    self.append_checkpoint(
                        phase_type,
                        step_name,
                        true,
                        &format!("Skipped: {}", message),
                        data,
                        None,
                    );
                    return true;
                }
                PhaseResult::Failed => {
                    // Terminal by design: the step author decided this is
                    // not worth retrying.
                    self.set_status(phase_type, PhaseStatus::Failed);
                    self.append_checkpoint(
                        phase_type,
                        step_name,
                        false,
                        &format!("Failed: {}", message),
                        data,
                        Some(message),
                    );
                    return false;
                }
                PhaseResult::Retry => {
                    if attempt < MAX_RETRIES_PER_STEP {
                        debug!(
                            phase = phase_type.as_str(),
                            step = step_name,
                            attempt,
                            delay_seconds = step_result.retry_delay_seconds,
                            "step requested retry"
                        );
                        self.append_checkpoint(
                            phase_type,
                            step_name,
                            false,
                            &format!(
                                "Retry {}/{}: {}",
                                attempt, MAX_RETRIES_PER_STEP, message
                            ),
                            data,
                            Some(message),
                        );
                    } else {
                        self.set_status(phase_type, PhaseStatus::Failed);
                        self.append_checkpoint(
                            phase_type,
                            step_name,
                            false,
                            &format!(
                                "Failed after {} retries: {}",
                                MAX_RETRIES_PER_STEP, message
                            ),
                            data,
                            Some(message),
                        );
                        return false;
                    }
                }
            }
        }

        false
    }

    fn mark_phase_started(&mut self, phase_type: CommissioningPhase, phase_name: &str) {
        info!(phase = phase_type.as_str(), "phase started");
        self.set_status(phase_type, PhaseStatus::InProgress);
        self.context.record.current_phase = phase_type;
        self.append_checkpoint(
            phase_type,
            "phase_start",
            true,
            &format!("Started {}", phase_name),
            None,
            None,
        );
    }

    fn mark_phase_completed(&mut self, phase_type: CommissioningPhase, phase_name: &str) {
        info!(phase = phase_type.as_str(), "phase completed");
        self.set_status(phase_type, PhaseStatus::Complete);
        self.append_checkpoint(
            phase_type,
            "phase_complete",
            true,
            &format!("Completed {}", phase_name),
            None,
            None,
        );
    }

    fn set_status(&mut self, phase_type: CommissioningPhase, status: PhaseStatus) {
        self.context.record.phase_status.insert(phase_type, status);
    }

    fn append_checkpoint(
        &mut self,
        phase_type: CommissioningPhase,
        step_name: &str,
        success: bool,
        notes: &str,
        measurements: Option<Map<String, Value>>,
        error_message: Option<String>,
    ) {
        self.context.record.phase_history.push(PhaseCheckpoint {
            phase: phase_type,
            timestamp: Utc::now(),
            operator: self.context.operator.clone(),
            step_name: step_name.to_string(),
            success,
            measurements: measurements.unwrap_or_default(),
            notes: notes.to_string(),
            error_message,
        });
    }
}
