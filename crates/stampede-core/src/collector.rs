//! Thread-safe metric collection shared by every VU
//!
//! The series map sits behind a `parking_lot::RwLock`; each series has its own
//! mutex. Recording an existing series takes the map's read lock plus the
//! series lock, so VUs only contend when they hit the same series at the same
//! instant. The write lock is taken once per new series.

use crate::aggregate::{AggregateMetric, AggregateSummary};
use crate::sample::{MetricKey, MetricKind, MetricSample, Tags};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

type Series = Arc<Mutex<AggregateMetric>>;

/// Anything samples can be recorded into.
///
/// Implemented by the collector itself and by wrappers that stamp extra tags
/// (such as a VU's iteration context) before forwarding.
pub trait MetricSink: Send + Sync {
    fn record(&self, sample: MetricSample);
}

/// Metric store for one run.
pub struct MetricCollector {
    series: RwLock<HashMap<MetricKey, Series>>,
    recorded: AtomicU64,
    started: Instant,
}

impl MetricCollector {
    pub fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            recorded: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Record one sample into its roll-up series and, when tagged, its tagged series.
    ///
    /// A series keeps the kind of the first sample that created it.
    pub fn record(&self, sample: MetricSample) {
        let MetricSample {
            name,
            kind,
            value,
            tags,
        } = sample;

        if !tags.is_empty() {
            self.series_for(MetricKey::new(name.clone(), tags), kind)
                .lock()
                .add(value);
        }
        self.series_for(MetricKey::untagged(name), kind)
            .lock()
            .add(value);

        self.recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Convenience for a batch of samples from one step.
    pub fn record_all(&self, samples: impl IntoIterator<Item = MetricSample>) {
        for sample in samples {
            self.record(sample);
        }
    }

    /// Record a named check outcome into the `checks` rate metric.
    pub fn record_check(&self, name: &str, passed: bool, tags: &Tags) {
        self.record(
            MetricSample::rate(crate::sample::names::CHECKS, passed)
                .with_tag("check", name)
                .with_tags(tags),
        );
    }

    fn series_for(&self, key: MetricKey, kind: MetricKind) -> Series {
        if let Some(series) = self.series.read().get(&key) {
            return Arc::clone(series);
        }
        let mut map = self.series.write();
        Arc::clone(
            map.entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(AggregateMetric::new(kind)))),
        )
    }

    /// Number of samples recorded so far.
    pub fn samples_recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Point-in-time copy of every series.
    ///
    /// Series are copied one at a time, so a snapshot taken during heavy
    /// recording may trail the live counters slightly. It never counts a
    /// sample twice.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let handles: Vec<(MetricKey, Series)> = self
            .series
            .read()
            .iter()
            .map(|(key, series)| (key.clone(), Arc::clone(series)))
            .collect();

        let series = handles
            .into_iter()
            .map(|(key, series)| {
                let aggregate = series.lock().clone();
                (key, aggregate)
            })
            .collect();

        MetricsSnapshot {
            elapsed: self.elapsed(),
            series,
        }
    }
}

impl MetricSink for MetricCollector {
    fn record(&self, sample: MetricSample) {
        MetricCollector::record(self, sample);
    }
}

impl Default for MetricCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Frozen view of the collector.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Run time when the snapshot was taken
    pub elapsed: Duration,

    pub series: BTreeMap<MetricKey, AggregateMetric>,
}

impl MetricsSnapshot {
    /// Roll-up series of a metric.
    pub fn get(&self, name: &str) -> Option<&AggregateMetric> {
        self.series.get(&MetricKey::untagged(name))
    }

    /// Exact series lookup (metric name and full tag set).
    pub fn get_key(&self, key: &MetricKey) -> Option<&AggregateMetric> {
        self.series.get(key)
    }

    /// Resolve a selector: an untagged selector reads the roll-up; a tagged
    /// selector merges every series whose tags include the selector's tags.
    pub fn select(&self, selector: &MetricKey) -> Option<AggregateMetric> {
        if selector.is_rollup() {
            return self.get(&selector.name).cloned();
        }

        let mut merged: Option<AggregateMetric> = None;
        for (key, aggregate) in &self.series {
            if key.name != selector.name || key.is_rollup() {
                continue;
            }
            let matches = selector
                .tags
                .iter()
                .all(|(k, v)| key.tags.get(k).map(|actual| actual == v).unwrap_or(false));
            if !matches {
                continue;
            }
            match merged.as_mut() {
                Some(existing) => existing.merge(aggregate),
                None => merged = Some(aggregate.clone()),
            }
        }
        merged
    }

    /// Values of one tag key seen on a metric, e.g. every `name` of `http_req_duration`.
    pub fn tag_values(&self, metric: &str, tag: &str) -> Vec<String> {
        let mut values: Vec<String> = self
            .series
            .keys()
            .filter(|key| key.name == metric)
            .filter_map(|key| key.tags.get(tag).cloned())
            .collect();
        values.sort();
        values.dedup();
        values
    }

    /// Samples represented by this snapshot (sum of roll-up counts).
    pub fn total_samples(&self) -> u64 {
        self.series
            .iter()
            .filter(|(key, _)| key.is_rollup())
            .map(|(_, aggregate)| aggregate.count())
            .sum()
    }

    /// Fold another snapshot (e.g. from a second collector) into this one.
    pub fn merge(&mut self, other: &MetricsSnapshot) {
        for (key, aggregate) in &other.series {
            match self.series.get_mut(key) {
                Some(existing) => existing.merge(aggregate),
                None => {
                    self.series.insert(key.clone(), aggregate.clone());
                }
            }
        }
        self.elapsed = self.elapsed.max(other.elapsed);
    }

    /// Serializable digest of every series keyed by selector text.
    pub fn summaries(&self) -> BTreeMap<String, AggregateSummary> {
        self.series
            .iter()
            .map(|(key, aggregate)| (key.to_string(), aggregate.summary(self.elapsed)))
            .collect()
    }
}

/// Serializable form of a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotReport {
    pub elapsed_seconds: f64,
    pub total_samples: u64,
    pub metrics: BTreeMap<String, AggregateSummary>,
}

impl From<&MetricsSnapshot> for SnapshotReport {
    fn from(snapshot: &MetricsSnapshot) -> Self {
        Self {
            elapsed_seconds: snapshot.elapsed.as_secs_f64(),
            total_samples: snapshot.total_samples(),
            metrics: snapshot.summaries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::names;

    #[test]
    fn test_record_updates_rollup_and_tagged_series() {
        let collector = MetricCollector::new();
        collector.record(MetricSample::trend(names::HTTP_REQ_DURATION, 120.0).with_tag("name", "Signup"));
        collector.record(MetricSample::trend(names::HTTP_REQ_DURATION, 80.0).with_tag("name", "Login"));
        collector.record(MetricSample::trend(names::HTTP_REQ_DURATION, 40.0));

        let snapshot = collector.snapshot();
        let rollup = snapshot.get(names::HTTP_REQ_DURATION).unwrap();
        assert_eq!(rollup.count(), 3);
        assert_eq!(rollup.max(), Some(120.0));

        let signup: MetricKey = "http_req_duration{name:Signup}".parse().unwrap();
        assert_eq!(snapshot.get_key(&signup).unwrap().count(), 1);
        assert_eq!(snapshot.total_samples(), 3);
        assert_eq!(collector.samples_recorded(), 3);
        assert_eq!(
            snapshot.tag_values(names::HTTP_REQ_DURATION, "name"),
            vec!["Login".to_string(), "Signup".to_string()]
        );
    }

    #[test]
    fn test_select_merges_matching_series() {
        let collector = MetricCollector::new();
        collector.record(
            MetricSample::rate(names::HTTP_REQ_FAILED, true)
                .with_tag("name", "Login")
                .with_tag("status", "500"),
        );
        collector.record(
            MetricSample::rate(names::HTTP_REQ_FAILED, false)
                .with_tag("name", "Login")
                .with_tag("status", "200"),
        );
        collector.record(MetricSample::rate(names::HTTP_REQ_FAILED, false).with_tag("name", "Signup"));

        let snapshot = collector.snapshot();
        let login: MetricKey = "http_req_failed{name:Login}".parse().unwrap();
        let selected = snapshot.select(&login).unwrap();
        assert_eq!(selected.count(), 2);
        assert_eq!(selected.rate(), Some(0.5));

        let missing: MetricKey = "http_req_failed{name:Report}".parse().unwrap();
        assert!(snapshot.select(&missing).is_none());
    }

    #[test]
    fn test_record_check() {
        let collector = MetricCollector::new();
        collector.record_check("signup ok", true, &Tags::new());
        collector.record_check("signup ok", false, &Tags::new());

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.get(names::CHECKS).unwrap().rate(), Some(0.5));
        let key: MetricKey = "checks{check:signup ok}".parse().unwrap();
        assert_eq!(snapshot.get_key(&key).unwrap().count(), 2);
    }

    #[test]
    fn test_concurrent_recording_loses_nothing() {
        let collector = Arc::new(MetricCollector::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let collector = Arc::clone(&collector);
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        collector.record(
                            MetricSample::counter(names::HTTP_REQS, 1.0)
                                .with_tag("vu", worker.to_string())
                                .with_tag("parity", (i % 2).to_string()),
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_samples(), 8000);
        assert_eq!(snapshot.get(names::HTTP_REQS).unwrap().sum(), 8000.0);
    }

    #[test]
    fn test_snapshot_merge() {
        let a = MetricCollector::new();
        let b = MetricCollector::new();
        a.record(MetricSample::counter(names::ITERATIONS, 1.0));
        b.record(MetricSample::counter(names::ITERATIONS, 1.0));
        b.record(MetricSample::counter("errors_total", 1.0));

        let mut merged = a.snapshot();
        merged.merge(&b.snapshot());

        assert_eq!(merged.get(names::ITERATIONS).unwrap().count(), 2);
        assert_eq!(merged.total_samples(), 3);
    }
}
