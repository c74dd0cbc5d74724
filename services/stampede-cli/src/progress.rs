//! Live progress line while a run is in flight

use indicatif::{ProgressBar, ProgressStyle};
use stampede_core::{names, MetricCollector, MetricsSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const REFRESH: Duration = Duration::from_millis(500);

/// Spinner showing VUs, iterations and request counts.
pub struct RunProgress {
    bar: ProgressBar,
    updater: JoinHandle<()>,
}

impl RunProgress {
    pub fn start(collector: Arc<MetricCollector>, planned: Duration) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message("Running setup...");

        let planned = planned.as_secs();
        let updater = {
            let bar = bar.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(REFRESH);
                loop {
                    interval.tick().await;
                    bar.set_message(progress_message(&collector.snapshot(), planned));
                }
            })
        };

        Self { bar, updater }
    }

    pub fn finish(self) {
        self.updater.abort();
        self.bar.finish_and_clear();
    }
}

fn progress_message(snapshot: &MetricsSnapshot, planned_secs: u64) -> String {
    let count = |name: &str| snapshot.get(name).map(|m| m.count()).unwrap_or(0);
    let vus = snapshot.get(names::VUS).and_then(|m| m.last()).unwrap_or(0.0);
    let vus_max = snapshot.get(names::VUS_MAX).and_then(|m| m.last()).unwrap_or(0.0);
    let failed = snapshot
        .get(names::HTTP_REQ_FAILED)
        .and_then(|m| m.rate())
        .unwrap_or(0.0);

    format!(
        "{}s/{}s | VUs {}/{} | iterations {} | requests {} | failed {:.1}%",
        snapshot.elapsed.as_secs(),
        planned_secs,
        vus as u64,
        vus_max as u64,
        snapshot.get(names::ITERATIONS).map(|m| m.sum() as u64).unwrap_or(0),
        count(names::HTTP_REQS),
        failed * 100.0
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampede_core::MetricSample;

    #[test]
    fn test_progress_message() {
        let collector = MetricCollector::new();
        collector.record(MetricSample::gauge(names::VUS, 4.0));
        collector.record(MetricSample::gauge(names::VUS_MAX, 10.0));
        collector.record(MetricSample::counter(names::ITERATIONS, 1.0));
        collector.record(MetricSample::counter(names::HTTP_REQS, 1.0));
        collector.record(MetricSample::counter(names::HTTP_REQS, 1.0));
        collector.record(MetricSample::rate(names::HTTP_REQ_FAILED, true));
        collector.record(MetricSample::rate(names::HTTP_REQ_FAILED, false));

        let message = progress_message(&collector.snapshot(), 60);
        assert!(message.contains("VUs 4/10"), "{}", message);
        assert!(message.contains("iterations 1"));
        assert!(message.contains("requests 2"));
        assert!(message.contains("failed 50.0%"));
    }
}
