//! Generic phase execution engine.
//!
//! `PhaseRunner` drives any `PhaseExecutor` implementation through its
//! declared steps, applying a uniform retry/abort/skip policy and building
//! the checkpoint trail in the commissioning record. Concrete phases only
//! say *what* each step does, never *how* failures are handled.

pub mod context;
pub mod runner;
pub mod step;

pub use context::PhaseContext;
pub use runner::{MAX_RETRIES_PER_STEP, PhaseExecutor, PhaseRunner};
pub use step::{PhaseResult, PhaseStepResult};
