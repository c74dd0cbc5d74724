//! Periodic threshold evaluation during a run

use stampede_core::{metrics, MetricCollector, ThresholdEvaluator, ThresholdOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Evaluates thresholds every `interval` and cancels the run when an
/// `abort_on_fail` threshold fails.
pub struct ThresholdMonitor {
    evaluator: Arc<ThresholdEvaluator>,
    collector: Arc<MetricCollector>,
    interval: Duration,
    /// Cancelled by the monitor to abort the run
    abort: CancellationToken,
    /// Cancelled by the runner once the load phase is over
    stop: CancellationToken,
}

impl ThresholdMonitor {
    pub fn new(
        evaluator: Arc<ThresholdEvaluator>,
        collector: Arc<MetricCollector>,
        interval: Duration,
        abort: CancellationToken,
        stop: CancellationToken,
    ) -> Self {
        Self {
            evaluator,
            collector,
            interval,
            abort,
            stop,
        }
    }

    /// Returns the threshold that aborted the run, if one did.
    pub async fn run(self) -> Option<ThresholdOutcome> {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Log each breach once per selector and expression, not on every tick
        let mut reported: Vec<(String, String)> = Vec::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.stop.cancelled() => return None,
            }

            let evaluation = self.evaluator.evaluate(&self.collector.snapshot());
            for failure in evaluation.failures() {
                metrics::THRESHOLD_BREACHES
                    .with_label_values(&[&failure.metric])
                    .inc();
                let key = (failure.metric.clone(), failure.expression.clone());
                if !reported.contains(&key) {
                    warn!(
                        metric = %failure.metric,
                        expression = %failure.expression,
                        current = ?failure.current_value,
                        "Threshold breached"
                    );
                    reported.push(key);
                }
            }

            if let Some(trigger) = evaluation.abort_trigger() {
                warn!(
                    metric = %trigger.metric,
                    expression = %trigger.expression,
                    "Aborting run on failed threshold"
                );
                self.abort.cancel();
                return Some(trigger.clone());
            }
            debug!(thresholds = evaluation.outcomes.len(), "Thresholds evaluated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampede_core::{MetricSample, ThresholdSpec};

    #[tokio::test(start_paused = true)]
    async fn test_abort_on_fail_cancels() {
        let collector = Arc::new(MetricCollector::new());
        collector.record(MetricSample::rate("errors", true));
        let evaluator = Arc::new(ThresholdEvaluator::new(vec![
            ThresholdSpec::parse("errors", "rate<0.1").unwrap().abort_on_fail(true),
        ]));
        let abort = CancellationToken::new();
        let monitor = ThresholdMonitor::new(
            evaluator,
            collector,
            Duration::from_secs(2),
            abort.clone(),
            abort.child_token(),
        );

        let trigger = monitor.run().await.unwrap();
        assert_eq!(trigger.metric, "errors");
        assert!(abort.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_failure_does_not_abort() {
        let collector = Arc::new(MetricCollector::new());
        collector.record(MetricSample::rate("errors", true));
        let evaluator = Arc::new(ThresholdEvaluator::new(vec![
            ThresholdSpec::parse("errors", "rate<0.1").unwrap(),
        ]));
        let abort = CancellationToken::new();
        let stop = abort.child_token();
        let handle = tokio::spawn(
            ThresholdMonitor::new(evaluator, collector, Duration::from_secs(2), abort.clone(), stop.clone()).run(),
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        stop.cancel();
        assert!(handle.await.unwrap().is_none());
        assert!(!abort.is_cancelled());
    }
}
