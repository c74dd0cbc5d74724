//! Staged virtual-user load engine.
//!
//! A [`Runner`] runs a [`Scenario`] once: setup, a load phase where the
//! [`RampScheduler`] keeps the VU count on the stage profile, periodic and
//! final threshold evaluation, then teardown. The result is a [`RunSummary`].

pub mod context;
pub mod error;
pub mod executor;
pub mod monitor;
pub mod orchestrator;
pub mod runner;
pub mod scenario;
pub mod scheduler;
pub mod summary;

pub use context::{CheckResult, CheckSet, IterationContext};
pub use error::{EngineError, EngineResult};
pub use executor::{Executor, IterationOutcome, IterationReport, ITERATION_COMPLETED_CHECK};
pub use monitor::ThresholdMonitor;
pub use orchestrator::{run_setup, run_teardown, SetupOutcome};
pub use runner::Runner;
pub use scenario::{Scenario, SetupContext, SetupData};
pub use scheduler::{RampScheduler, SchedulerReport, VirtualUser};
pub use summary::{
    check_summaries, step_summaries, AbortReason, CheckSummary, ReportFormat, RunStatus, RunSummary, StepSummary,
};

// Scenario authors implement the hooks with these
pub use async_trait::async_trait;
pub use stampede_core;
