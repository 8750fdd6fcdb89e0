//! Per-step outcome types returned by concrete phases.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default advisory delay before the next retry attempt, in seconds.
pub const DEFAULT_RETRY_DELAY_SECONDS: f64 = 5.0;

/// Outcome of executing one phase step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseResult {
    /// Step finished; advance to the next one.
    Success,
    /// Step failed for a reason not worth retrying; the phase fails now.
    Failed,
    /// Transient failure; the engine retries up to its per-step bound.
    Retry,
    /// Preconditions made the step unnecessary; counts as satisfied.
    Skip,
}

/// Value produced by executing one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseStepResult {
    pub result: PhaseResult,
    /// Human-readable description, used verbatim in checkpoint notes.
    pub message: String,
    /// Measurements or diagnostics attached to the checkpoint.
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    /// Advisory delay before the next retry attempt. The engine records it
    /// but never sleeps; a caller may honor it with a blocking wait.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: f64,
}

fn default_retry_delay() -> f64 {
    DEFAULT_RETRY_DELAY_SECONDS
}

impl PhaseStepResult {
    pub fn new(result: PhaseResult, message: &str) -> Self {
        Self {
            result,
            message: message.to_string(),
            data: None,
            retry_delay_seconds: DEFAULT_RETRY_DELAY_SECONDS,
        }
    }

    pub fn success(message: &str) -> Self {
        Self::new(PhaseResult::Success, message)
    }

    pub fn failed(message: &str) -> Self {
        Self::new(PhaseResult::Failed, message)
    }

    pub fn retry(message: &str) -> Self {
        Self::new(PhaseResult::Retry, message)
    }

    pub fn skip(message: &str) -> Self {
        Self::new(PhaseResult::Skip, message)
    }

    /// Attach measurement data to be copied into the checkpoint.
    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_retry_delay(mut self, seconds: f64) -> Self {
        self.retry_delay_seconds = seconds;
        self
    }
}
