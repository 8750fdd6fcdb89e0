//! Data model for cavity commissioning records.
//!
//! This module provides:
//! - `CommissioningPhase` and `PhaseStatus` enums
//! - `PhaseCheckpoint`, one immutable audit-trail entry
//! - `CommissioningRecord`, the root aggregate tracking one cavity's
//!   commissioning attempt across phase runs

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named phases of the commissioning workflow, in display order.
///
/// The engine never auto-advances between phases; ordering matters only
/// for display and reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommissioningPhase {
    PreChecks,
    PiezoPreRf,
    ColdLanding,
    SsaCal,
    CoarseTune,
    Characterization,
    LowPowerRf,
    FineTune,
    HighPowerRamp,
    Operational,
    Complete,
}

impl CommissioningPhase {
    pub const ALL: [CommissioningPhase; 11] = [
        Self::PreChecks,
        Self::PiezoPreRf,
        Self::ColdLanding,
        Self::SsaCal,
        Self::CoarseTune,
        Self::Characterization,
        Self::LowPowerRf,
        Self::FineTune,
        Self::HighPowerRamp,
        Self::Operational,
        Self::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreChecks => "pre_checks",
            Self::PiezoPreRf => "piezo_pre_rf",
            Self::ColdLanding => "cold_landing",
            Self::SsaCal => "ssa_cal",
            Self::CoarseTune => "coarse_tune",
            Self::Characterization => "characterization",
            Self::LowPowerRf => "low_power_rf",
            Self::FineTune => "fine_tune",
            Self::HighPowerRamp => "high_power_ramp",
            Self::Operational => "operational",
            Self::Complete => "complete",
        }
    }

    /// Human-readable name: `cold_landing` becomes `"Cold Landing"`.
    pub fn display_name(&self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl FromStr for CommissioningPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pre_checks" => Ok(Self::PreChecks),
            "piezo_pre_rf" => Ok(Self::PiezoPreRf),
            "cold_landing" => Ok(Self::ColdLanding),
            "ssa_cal" => Ok(Self::SsaCal),
            "coarse_tune" => Ok(Self::CoarseTune),
            "characterization" => Ok(Self::Characterization),
            "low_power_rf" => Ok(Self::LowPowerRf),
            "fine_tune" => Ok(Self::FineTune),
            "high_power_ramp" => Ok(Self::HighPowerRamp),
            "operational" => Ok(Self::Operational),
            "complete" => Ok(Self::Complete),
            _ => Err(format!("Invalid commissioning phase: {}", s)),
        }
    }
}

/// Status of a single commissioning phase within a record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    NotStarted,
    InProgress,
    Complete,
    Failed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for PhaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid phase status: {}", s)),
        }
    }
}

/// One immutable entry in a phase's audit trail.
///
/// `step_name` is either a declared step name or one of the sentinels
/// `prerequisite_check`, `phase_start`, `phase_complete`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseCheckpoint {
    pub phase: CommissioningPhase,
    pub timestamp: DateTime<Utc>,
    pub operator: String,
    pub step_name: String,
    pub success: bool,
    #[serde(default)]
    pub measurements: Map<String, Value>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Root aggregate tracking one cavity's commissioning attempt.
///
/// The execution engine mutates this in place; persistence is the caller's
/// job via [`CommissioningDatabase`](crate::database::CommissioningDatabase).
/// `phase_history` is append-only: checkpoints are never edited or removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommissioningRecord {
    pub cavity_name: String,
    pub cryomodule: String,
    pub start_time: DateTime<Utc>,
    pub current_phase: CommissioningPhase,
    /// Free-form lifecycle tag, e.g. `"in_progress"` or `"complete"`.
    /// Set by callers; the engine never touches it.
    pub overall_status: String,
    pub phase_status: BTreeMap<CommissioningPhase, PhaseStatus>,
    pub phase_history: Vec<PhaseCheckpoint>,
    /// Phase-specific result payloads, one opaque blob per phase. Each
    /// concrete phase owns the shape of its own entry.
    #[serde(default)]
    pub phase_results: BTreeMap<CommissioningPhase, Value>,
}

impl CommissioningRecord {
    /// Create a fresh record for one cavity, every phase `NotStarted`.
    pub fn new(cavity_name: &str, cryomodule: &str) -> Self {
        let phase_status = CommissioningPhase::ALL
            .iter()
            .map(|phase| (*phase, PhaseStatus::NotStarted))
            .collect();

        Self {
            cavity_name: cavity_name.to_string(),
            cryomodule: cryomodule.to_string(),
            start_time: Utc::now(),
            current_phase: CommissioningPhase::PreChecks,
            overall_status: "in_progress".to_string(),
            phase_status,
            phase_history: Vec::new(),
            phase_results: BTreeMap::new(),
        }
    }

    /// Status of one phase. Falls back to `NotStarted` for maps loaded from
    /// older databases that predate a phase variant.
    pub fn status_of(&self, phase: CommissioningPhase) -> PhaseStatus {
        self.phase_status
            .get(&phase)
            .copied()
            .unwrap_or(PhaseStatus::NotStarted)
    }

    /// Attach (or replace) the result payload a phase produced.
    pub fn set_phase_result(&mut self, phase: CommissioningPhase, result: Value) {
        self.phase_results.insert(phase, result);
    }

    pub fn phase_result(&self, phase: CommissioningPhase) -> Option<&Value> {
        self.phase_results.get(&phase)
    }

    /// JSON-serializable representation of the full record.
    ///
    /// Phase result payloads are flattened to top-level keys
    /// (`"piezo_pre_rf": {...}`) to keep the external shape stable for
    /// downstream display and reporting.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("cavity_name".into(), Value::String(self.cavity_name.clone()));
        obj.insert("cryomodule".into(), Value::String(self.cryomodule.clone()));
        obj.insert(
            "start_time".into(),
            Value::String(self.start_time.to_rfc3339()),
        );
        obj.insert(
            "current_phase".into(),
            Value::String(self.current_phase.as_str().to_string()),
        );
        obj.insert(
            "overall_status".into(),
            Value::String(self.overall_status.clone()),
        );

        let status: Map<String, Value> = self
            .phase_status
            .iter()
            .map(|(phase, status)| {
                (
                    phase.as_str().to_string(),
                    Value::String(status.as_str().to_string()),
                )
            })
            .collect();
        obj.insert("phase_status".into(), Value::Object(status));

        let history: Vec<Value> = self
            .phase_history
            .iter()
            .map(|checkpoint| serde_json::to_value(checkpoint).unwrap_or(Value::Null))
            .collect();
        obj.insert("phase_history".into(), Value::Array(history));

        for (phase, result) in &self.phase_results {
            obj.insert(phase.as_str().to_string(), result.clone());
        }

        Value::Object(obj)
    }
}
