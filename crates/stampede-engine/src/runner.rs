//! Runs a scenario end to end: setup, load, threshold checks, teardown

use crate::error::EngineResult;
use crate::executor::Executor;
use crate::monitor::ThresholdMonitor;
use crate::orchestrator::{run_setup, run_teardown};
use crate::scenario::{Scenario, SetupContext};
use crate::scheduler::RampScheduler;
use crate::summary::{check_summaries, step_summaries, AbortReason, RunStatus, RunSummary};
use chrono::Utc;
use stampede_core::{
    names, MetricCollector, MetricSample, RunConfig, SnapshotReport, StageProfile, ThresholdEvaluator,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Orchestrates one load run of a scenario.
pub struct Runner<S: Scenario> {
    scenario: Arc<S>,
    profile: StageProfile,
    evaluator: Arc<ThresholdEvaluator>,
    collector: Arc<MetricCollector>,
    cancel: CancellationToken,
    setup_timeout: Duration,
    teardown_timeout: Duration,
    iteration_timeout: Option<Duration>,
    threshold_interval: Duration,
    max_vus: u32,
    tick: Option<Duration>,
}

impl<S: Scenario> Runner<S> {
    /// Validate `config` and prepare a run. Stages and thresholds must already
    /// include any scenario defaults.
    pub fn new(scenario: S, config: &RunConfig) -> EngineResult<Self> {
        config.validate()?;
        let profile = config.profile()?;
        let evaluator = ThresholdEvaluator::new(config.threshold_specs()?);

        Ok(Self {
            scenario: Arc::new(scenario),
            profile,
            evaluator: Arc::new(evaluator),
            collector: Arc::new(MetricCollector::new()),
            cancel: CancellationToken::new(),
            setup_timeout: config.setup_timeout,
            teardown_timeout: config.teardown_timeout,
            iteration_timeout: config.iteration_timeout,
            threshold_interval: config.threshold_interval,
            max_vus: config.max_vus,
            tick: None,
        })
    }

    /// Token that stops the run gracefully when cancelled (e.g. on Ctrl-C).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Live collector, for progress displays.
    pub fn collector(&self) -> Arc<MetricCollector> {
        Arc::clone(&self.collector)
    }

    pub fn profile(&self) -> &StageProfile {
        &self.profile
    }

    /// Override the scheduler tick.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = Some(tick);
        self
    }

    pub async fn run(self) -> EngineResult<RunSummary> {
        let started_at = Utc::now();
        let started = Instant::now();
        let scenario_name = self.scenario.name().to_string();
        let mut warnings = Vec::new();

        info!(
            scenario = %scenario_name,
            profile = %self.profile.description(),
            duration = ?self.profile.total_duration(),
            thresholds = self.evaluator.specs().len(),
            "Starting run"
        );

        let setup_ctx = SetupContext::new(&scenario_name, Arc::clone(&self.collector), self.cancel.clone());
        let setup = run_setup(&*self.scenario, &setup_ctx, self.setup_timeout).await;

        let planned_peak = self.profile.peak_target();
        if planned_peak > self.max_vus {
            warnings.push(format!(
                "profile peak of {} VUs exceeds max_vus {}; concurrency capped",
                planned_peak, self.max_vus
            ));
        }
        self.collector.record(MetricSample::gauge(
            names::VUS_MAX,
            f64::from(planned_peak.min(self.max_vus)),
        ));

        // Child token: stopping the monitor must not cancel the run
        let monitor_stop = self.cancel.child_token();
        let monitor = (!self.evaluator.is_empty()).then(|| {
            tokio::spawn(
                ThresholdMonitor::new(
                    Arc::clone(&self.evaluator),
                    Arc::clone(&self.collector),
                    self.threshold_interval,
                    self.cancel.clone(),
                    monitor_stop.clone(),
                )
                .run(),
            )
        });

        let executor = Arc::new(
            Executor::new(Arc::clone(&self.scenario), Arc::clone(&self.collector))
                .with_iteration_timeout(self.iteration_timeout),
        );
        let mut scheduler = RampScheduler::new(
            self.profile.clone(),
            executor,
            setup.data.clone(),
            self.cancel.clone(),
        )
        .with_max_vus(self.max_vus);
        if let Some(tick) = self.tick {
            scheduler = scheduler.with_tick(tick);
        }
        let scheduled = scheduler.run().await;

        monitor_stop.cancel();
        let abort_trigger = match monitor {
            Some(handle) => handle.await?,
            None => None,
        };

        let snapshot = self.collector.snapshot();
        let evaluation = self.evaluator.evaluate(&snapshot);

        let teardown_error = run_teardown(&*self.scenario, &setup_ctx, &setup.data, self.teardown_timeout).await;

        let (status, abort_reason) = if let Some(trigger) = abort_trigger {
            (
                RunStatus::Aborted,
                Some(AbortReason::Threshold {
                    metric: trigger.metric,
                    expression: trigger.expression,
                }),
            )
        } else if scheduled.cancelled {
            (RunStatus::Aborted, Some(AbortReason::Operator))
        } else if !evaluation.all_passed() {
            (RunStatus::ThresholdsFailed, None)
        } else {
            (RunStatus::Passed, None)
        };

        for failure in evaluation.failures() {
            warn!(
                metric = %failure.metric,
                expression = %failure.expression,
                current = ?failure.current_value,
                "Threshold failed"
            );
        }
        info!(
            scenario = %scenario_name,
            status = %status,
            iterations = scheduled.total_iterations,
            peak_vus = scheduled.peak_vus,
            "Run finished"
        );

        Ok(RunSummary {
            scenario: scenario_name,
            status,
            abort_reason,
            started_at,
            duration_seconds: started.elapsed().as_secs_f64(),
            profile: self.profile.description(),
            peak_vus: scheduled.peak_vus,
            iterations: scheduled.total_iterations,
            setup_degraded: setup.degraded,
            teardown_error,
            warnings,
            checks: check_summaries(&snapshot),
            steps: step_summaries(&snapshot),
            thresholds: evaluation.outcomes,
            metrics: SnapshotReport::from(&snapshot),
        })
    }
}
