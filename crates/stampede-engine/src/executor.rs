//! Runs one scenario iteration and accounts for it

use crate::context::{CheckResult, IterationContext};
use crate::scenario::Scenario;
use futures::FutureExt;
use stampede_core::{metrics, names, MetricCollector, MetricSample};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Name of the failed check recorded when an iteration faults.
pub const ITERATION_COMPLETED_CHECK: &str = "iteration completed";

/// How an iteration ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// Body ran to completion (its checks may still have failed)
    Completed,

    /// Body skipped because the setup payload is empty
    Skipped,

    /// Body returned an error or panicked
    Faulted(String),

    /// Body exceeded the iteration timeout
    TimedOut,
}

impl IterationOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Faulted(_) => "faulted",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Result of one executed or skipped iteration.
#[derive(Debug, Clone)]
pub struct IterationReport {
    pub vu_id: u32,
    pub iteration: u64,
    pub checks: Vec<CheckResult>,
    pub outcome: IterationOutcome,
    pub duration: Duration,
}

/// Executes iterations of one scenario.
pub struct Executor<S: Scenario> {
    scenario: Arc<S>,
    collector: Arc<MetricCollector>,
    iteration_timeout: Option<Duration>,
}

impl<S: Scenario> Executor<S> {
    pub fn new(scenario: Arc<S>, collector: Arc<MetricCollector>) -> Self {
        Self {
            scenario,
            collector,
            iteration_timeout: None,
        }
    }

    pub fn with_iteration_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.iteration_timeout = timeout;
        self
    }

    pub fn scenario(&self) -> &Arc<S> {
        &self.scenario
    }

    pub fn collector(&self) -> &Arc<MetricCollector> {
        &self.collector
    }

    /// Run one iteration. Errors and panics inside the body never escape:
    /// they become a failed `iteration completed` check.
    pub async fn execute(&self, ctx: &mut IterationContext<S::Setup>) -> IterationReport {
        let started = Instant::now();
        let scenario_name = self.scenario.name().to_string();

        let setup_empty = match ctx.setup() {
            None => true,
            Some(setup) => self.scenario.is_setup_empty(setup),
        };

        let outcome = if setup_empty && self.scenario.skip_when_setup_empty() {
            IterationOutcome::Skipped
        } else {
            let body = AssertUnwindSafe(self.scenario.iteration(ctx)).catch_unwind();
            let result = match self.iteration_timeout {
                Some(limit) => tokio::time::timeout(limit, body).await.ok(),
                None => Some(body.await),
            };
            match result {
                None => IterationOutcome::TimedOut,
                Some(Ok(Ok(()))) => IterationOutcome::Completed,
                Some(Ok(Err(err))) => IterationOutcome::Faulted(format!("{:#}", err)),
                Some(Err(panic)) => IterationOutcome::Faulted(panic_message(panic)),
            }
        };

        let duration = started.elapsed();

        match &outcome {
            IterationOutcome::Faulted(reason) => {
                debug!(vu_id = ctx.vu_id(), iteration = ctx.iteration(), %reason, "Iteration faulted");
                ctx.record_fault_check(ITERATION_COMPLETED_CHECK);
            }
            IterationOutcome::TimedOut => {
                debug!(vu_id = ctx.vu_id(), iteration = ctx.iteration(), "Iteration timed out");
                ctx.record_fault_check(ITERATION_COMPLETED_CHECK);
            }
            IterationOutcome::Completed | IterationOutcome::Skipped => {}
        }

        let tags = ctx.tags().clone();
        self.collector
            .record(MetricSample::counter(names::ITERATIONS, 1.0).with_tags(&tags));
        if outcome != IterationOutcome::Skipped {
            let millis = duration.as_secs_f64() * 1000.0;
            self.collector
                .record(MetricSample::trend(names::ITERATION_DURATION, millis).with_tags(&tags));
            metrics::ITERATION_DURATION
                .with_label_values(&[&scenario_name])
                .observe(duration.as_secs_f64());
        }
        metrics::ITERATIONS
            .with_label_values(&[&scenario_name, outcome.label()])
            .inc();

        IterationReport {
            vu_id: ctx.vu_id(),
            iteration: ctx.iteration(),
            checks: ctx.take_checks(),
            outcome,
            duration,
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}
