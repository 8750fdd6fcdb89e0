//! Phase execution engine and durable record store for SRF cavity
//! commissioning.
//!
//! A commissioning procedure is a sequence of named phases (cold landing,
//! piezo pre-RF checkout, ...), each broken into ordered steps that can fail
//! transiently, be skipped, or be aborted by the operator. This crate
//! provides the generic machinery:
//! - [`engine`] — the step driver with uniform retry/abort/skip policy
//! - [`model`] — the record and checkpoint audit-trail data model
//! - [`database`] — SQLite persistence that survives process restarts
//!
//! Concrete phases live with the hardware code: they implement
//! [`PhaseExecutor`] and are handed to a [`PhaseRunner`]. An external
//! orchestrator decides which phase runs next and persists the record
//! before and after each run.

pub mod database;
pub mod engine;
pub mod errors;
pub mod model;

pub use database::{CommissioningDatabase, DatabaseStats};
pub use engine::{
    MAX_RETRIES_PER_STEP, PhaseContext, PhaseExecutor, PhaseResult, PhaseRunner, PhaseStepResult,
};
pub use errors::PhaseError;
pub use model::{CommissioningPhase, CommissioningRecord, PhaseCheckpoint, PhaseStatus};
