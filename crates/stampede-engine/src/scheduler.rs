//! Ramp scheduler: drives the number of looping VUs along a stage profile
//!
//! The scheduler ticks on a fixed interval, publishes the current target in a
//! shared atomic and spawns VUs for missing ids `1..=target`. A VU compares
//! its id against the target before each iteration and retires when it is
//! above it, so retirement never cuts an iteration short.

use crate::context::IterationContext;
use crate::executor::{Executor, IterationOutcome};
use crate::scenario::{Scenario, SetupData};
use stampede_core::{metrics, names, MetricCollector, MetricSample, StageProfile, Tags};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// Pause after a skipped iteration so no-op VUs do not spin.
const SKIPPED_ITERATION_PAUSE: Duration = Duration::from_millis(100);

/// One looping user. Owned by its task while alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualUser {
    /// 1-based id; VUs with `id > target` retire
    pub id: u32,

    /// Iterations started so far (executed or skipped)
    pub iterations: u64,
}

/// What the scheduler observed over the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    pub peak_vus: u32,
    pub total_iterations: u64,

    /// Whether the run stopped before the profile ended
    pub cancelled: bool,

    /// Highest target clamped by `max_vus`, if the cap was ever hit
    pub capped_target: Option<u32>,
}

/// Drives VUs of one scenario along a [`StageProfile`].
pub struct RampScheduler<S: Scenario> {
    profile: StageProfile,
    executor: Arc<Executor<S>>,
    setup: SetupData<S::Setup>,
    max_vus: u32,
    tick: Duration,
    cancel: CancellationToken,
}

impl<S: Scenario> RampScheduler<S> {
    pub fn new(
        profile: StageProfile,
        executor: Arc<Executor<S>>,
        setup: SetupData<S::Setup>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            profile,
            executor,
            setup,
            max_vus: u32::MAX,
            tick: DEFAULT_TICK,
            cancel,
        }
    }

    pub fn with_max_vus(mut self, max_vus: u32) -> Self {
        self.max_vus = max_vus;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Run until the profile ends or the token is cancelled, then wait for
    /// every VU to finish its in-flight iteration.
    pub async fn run(self) -> SchedulerReport {
        let collector = Arc::clone(self.executor.collector());
        let target = Arc::new(AtomicU32::new(0));
        let mut vus: HashMap<u32, JoinHandle<VirtualUser>> = HashMap::new();
        // Iteration counts of retired VUs, resumed when their id comes back
        let mut retired: HashMap<u32, u64> = HashMap::new();
        let mut report = SchedulerReport::default();
        let mut current_stage: Option<usize> = None;

        let start = Instant::now();
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(profile = %self.profile.description(), "Starting ramp");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.cancel.cancelled() => {
                    info!("Run cancelled, ramping down");
                    report.cancelled = true;
                    break;
                }
            }

            let Some(position) = self.profile.position_at(start.elapsed()) else {
                break;
            };

            if current_stage != Some(position.index) {
                current_stage = Some(position.index);
                info!(
                    stage = position.index + 1,
                    target = position.target,
                    remaining = ?position.remaining,
                    "Entering stage"
                );
            }

            let mut desired = position.target;
            if desired > self.max_vus {
                if report.capped_target.map(|c| desired > c).unwrap_or(true) {
                    warn!(target = desired, max_vus = self.max_vus, "Target exceeds max_vus, clamping");
                    metrics::CAPPED_SPAWNS.inc_by(u64::from(desired - self.max_vus));
                    report.capped_target = Some(desired);
                }
                desired = self.max_vus;
            }
            target.store(desired, Ordering::Release);
            metrics::TARGET_VUS.set(i64::from(desired));

            reap_finished(&mut vus, &mut retired).await;

            for id in 1..=desired {
                if vus.contains_key(&id) {
                    continue;
                }
                let vu = VirtualUser {
                    id,
                    iterations: retired.remove(&id).unwrap_or(0),
                };
                let handle = tokio::spawn(vu_loop(
                    vu,
                    Arc::clone(&target),
                    Arc::clone(&self.executor),
                    self.setup.clone(),
                    self.cancel.clone(),
                ));
                vus.insert(id, handle);
            }

            let active = vus.len() as u32;
            report.peak_vus = report.peak_vus.max(active);
            collector.record(MetricSample::gauge(names::VUS, f64::from(active)));
            metrics::ACTIVE_VUS.set(i64::from(active));
        }

        // Everyone retires after the in-flight iteration
        target.store(0, Ordering::Release);
        metrics::TARGET_VUS.set(0);
        debug!(vus = vus.len(), "Waiting for VUs to retire");

        for (id, handle) in vus.drain() {
            match handle.await {
                Ok(vu) => report.total_iterations += vu.iterations,
                Err(err) => warn!(vu_id = id, error = %err, "VU task failed"),
            }
        }
        report.total_iterations += retired.values().sum::<u64>();

        collector.record(MetricSample::gauge(names::VUS, 0.0));
        metrics::ACTIVE_VUS.set(0);

        info!(
            peak_vus = report.peak_vus,
            iterations = report.total_iterations,
            cancelled = report.cancelled,
            "Ramp finished"
        );
        report
    }
}

/// Collect VUs that retired since the last tick; their iteration counts move
/// to `retired` until the id is respawned or the run ends.
async fn reap_finished(vus: &mut HashMap<u32, JoinHandle<VirtualUser>>, retired: &mut HashMap<u32, u64>) {
    let finished: Vec<u32> = vus
        .iter()
        .filter(|(_, handle)| handle.is_finished())
        .map(|(id, _)| *id)
        .collect();

    for id in finished {
        let Some(handle) = vus.remove(&id) else {
            continue;
        };
        match handle.await {
            Ok(vu) => {
                debug!(vu_id = vu.id, iterations = vu.iterations, "VU retired");
                retired.insert(vu.id, vu.iterations);
            }
            Err(err) => warn!(vu_id = id, error = %err, "VU task failed"),
        }
    }
}

async fn vu_loop<S: Scenario>(
    mut vu: VirtualUser,
    target: Arc<AtomicU32>,
    executor: Arc<Executor<S>>,
    setup: SetupData<S::Setup>,
    cancel: CancellationToken,
) -> VirtualUser {
    let collector: Arc<MetricCollector> = Arc::clone(executor.collector());
    let mut tags = Tags::new();
    tags.insert("scenario".to_string(), executor.scenario().name().to_string());

    debug!(vu_id = vu.id, "VU started");
    loop {
        if cancel.is_cancelled() || vu.id > target.load(Ordering::Acquire) {
            break;
        }

        let mut ctx = IterationContext::new(
            vu.id,
            vu.iterations,
            setup.clone(),
            Arc::clone(&collector),
            tags.clone(),
        );
        let report = executor.execute(&mut ctx).await;
        vu.iterations += 1;

        if report.outcome == IterationOutcome::Skipped {
            tokio::time::sleep(SKIPPED_ITERATION_PAUSE).await;
        } else {
            tokio::task::yield_now().await;
        }
    }
    vu
}
