//! Execution context shared with a phase for the duration of one run.

use std::collections::HashMap;

use serde_json::Value;

use crate::model::CommissioningRecord;

/// Everything a phase run needs beyond its own state.
///
/// Owns the record being mutated, identifies the operator for checkpoint
/// attribution, and carries the cooperative abort flag. One context owns one
/// record for the duration of a run; there is no concurrent writer.
#[derive(Debug)]
pub struct PhaseContext {
    pub record: CommissioningRecord,
    /// Operator name attributed to every checkpoint.
    pub operator: String,
    /// When set, a concrete phase should skip real hardware actions.
    /// The engine itself never branches on it.
    pub dry_run: bool,
    /// Free-form phase-specific inputs, e.g. which cavity is under test.
    pub parameters: HashMap<String, Value>,
    abort_requested: bool,
}

impl PhaseContext {
    pub fn new(record: CommissioningRecord, operator: &str) -> Self {
        Self {
            record,
            operator: operator.to_string(),
            dry_run: false,
            parameters: HashMap::new(),
            abort_requested: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_parameter(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    /// Request graceful abort of the current phase. Level-triggered: once
    /// set it stays set for the lifetime of the context.
    pub fn request_abort(&mut self) {
        self.abort_requested = true;
    }

    pub fn is_abort_requested(&self) -> bool {
        self.abort_requested
    }

    /// Consume the context, handing the record back to the caller.
    pub fn into_record(self) -> CommissioningRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let ctx = PhaseContext::new(CommissioningRecord::new("L1B_CM02_CAV3", "02"), "jdoe");
        assert_eq!(ctx.operator, "jdoe");
        assert!(!ctx.dry_run);
        assert!(ctx.parameters.is_empty());
        assert!(!ctx.is_abort_requested());
    }

    #[test]
    fn test_abort_latches() {
        let mut ctx = PhaseContext::new(CommissioningRecord::new("L1B_CM02_CAV3", "02"), "jdoe");
        assert!(!ctx.is_abort_requested());
        ctx.request_abort();
        assert!(ctx.is_abort_requested());
        // Requesting again keeps it set.
        ctx.request_abort();
        assert!(ctx.is_abort_requested());
    }

    #[test]
    fn test_builders() {
        let ctx = PhaseContext::new(CommissioningRecord::new("L1B_CM02_CAV3", "02"), "jdoe")
            .with_dry_run(true)
            .with_parameter("cavity", json!("L1B_CM02_CAV3"));

        assert!(ctx.dry_run);
        assert_eq!(ctx.parameters["cavity"], json!("L1B_CM02_CAV3"));
    }

    #[test]
    fn test_into_record_returns_owned_record() {
        let ctx = PhaseContext::new(CommissioningRecord::new("L1B_CM02_CAV3", "02"), "jdoe");
        let record = ctx.into_record();
        assert_eq!(record.cavity_name, "L1B_CM02_CAV3");
    }
}
