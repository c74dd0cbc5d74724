//! Mergeable per-series aggregates
//!
//! Trends keep an HDR histogram (3 significant digits, auto-resizing) so
//! percentiles stay accurate without buffering samples. Values are stored at
//! 1/1000 resolution: a trend in milliseconds resolves to the microsecond.

use crate::sample::MetricKind;
use hdrhistogram::Histogram;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

const HISTOGRAM_SCALE: f64 = 1000.0;
const HISTOGRAM_SIGFIG: u8 = 3;

/// Statistic a threshold reads from an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Count,
    Rate,
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
    Value,
}

impl std::fmt::Display for Aggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Count => write!(f, "count"),
            Self::Rate => write!(f, "rate"),
            Self::Avg => write!(f, "avg"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
            Self::Med => write!(f, "med"),
            Self::Percentile(p) => write!(f, "p({})", p),
            Self::Value => write!(f, "value"),
        }
    }
}

/// Running aggregate for one series.
#[derive(Debug, Clone)]
pub struct AggregateMetric {
    kind: MetricKind,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    non_zero: u64,
    last: f64,
    histogram: Option<Histogram<u64>>,
}

impl AggregateMetric {
    pub fn new(kind: MetricKind) -> Self {
        let histogram = match kind {
            // Auto-resizing histogram construction cannot fail for sigfig 3
            MetricKind::Trend => Histogram::new(HISTOGRAM_SIGFIG).ok(),
            _ => None,
        };
        Self {
            kind,
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            non_zero: 0,
            last: 0.0,
            histogram,
        }
    }

    pub fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.last = value;
        if value != 0.0 {
            self.non_zero += 1;
        }
        if let Some(histogram) = self.histogram.as_mut() {
            let scaled = (value.max(0.0) * HISTOGRAM_SCALE).round() as u64;
            // `record` grows the range; `saturating_record` would clamp to it
            if let Err(err) = histogram.record(scaled) {
                warn!(value, error = %err, "Dropping trend value from histogram");
            }
        }
    }

    /// Fold another aggregate of the same series into this one.
    pub fn merge(&mut self, other: &AggregateMetric) {
        if other.count == 0 {
            return;
        }
        self.count += other.count;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.non_zero += other.non_zero;
        self.last = other.last;
        if let (Some(mine), Some(theirs)) = (self.histogram.as_mut(), other.histogram.as_ref()) {
            if let Err(err) = mine.add(theirs) {
                warn!(error = %err, samples = theirs.len(), "Failed to merge trend histogram");
            }
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn non_zero(&self) -> u64 {
        self.non_zero
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn last(&self) -> Option<f64> {
        (self.count > 0).then_some(self.last)
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Share of non-zero samples (0.0-1.0).
    pub fn rate(&self) -> Option<f64> {
        (self.count > 0).then(|| self.non_zero as f64 / self.count as f64)
    }

    /// Percentile in 0-100. Only trends carry a distribution.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let histogram = self.histogram.as_ref()?;
        if histogram.len() == 0 {
            return None;
        }
        let quantile = (p / 100.0).clamp(0.0, 1.0);
        Some(histogram.value_at_quantile(quantile) as f64 / HISTOGRAM_SCALE)
    }

    /// Read one statistic. `None` when the aggregation does not apply to this
    /// kind or nothing has been recorded yet.
    ///
    /// `elapsed` is the run time, used for the per-second rate of counters.
    pub fn value(&self, aggregation: Aggregation, elapsed: Duration) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        match (self.kind, aggregation) {
            (MetricKind::Counter, Aggregation::Count) => Some(self.sum),
            (MetricKind::Counter, Aggregation::Rate) => {
                let secs = elapsed.as_secs_f64();
                Some(if secs > 0.0 { self.sum / secs } else { 0.0 })
            }
            (MetricKind::Rate, Aggregation::Rate) => self.rate(),
            (MetricKind::Rate, Aggregation::Count) => Some(self.non_zero as f64),
            (MetricKind::Gauge, Aggregation::Value) => self.last(),
            (MetricKind::Gauge, Aggregation::Min) | (MetricKind::Trend, Aggregation::Min) => self.min(),
            (MetricKind::Gauge, Aggregation::Max) | (MetricKind::Trend, Aggregation::Max) => self.max(),
            (MetricKind::Trend, Aggregation::Count) => Some(self.count as f64),
            (MetricKind::Trend, Aggregation::Avg) => self.mean(),
            (MetricKind::Trend, Aggregation::Med) => self.percentile(50.0),
            (MetricKind::Trend, Aggregation::Percentile(p)) => self.percentile(p),
            _ => None,
        }
    }

    /// Serializable digest used in run summaries.
    pub fn summary(&self, elapsed: Duration) -> AggregateSummary {
        let mut summary = AggregateSummary {
            kind: self.kind,
            count: self.count,
            ..Default::default()
        };
        match self.kind {
            MetricKind::Counter => {
                summary.sum = Some(self.sum);
                summary.rate = self.value(Aggregation::Rate, elapsed);
            }
            MetricKind::Gauge => {
                summary.value = self.last();
                summary.min = self.min();
                summary.max = self.max();
            }
            MetricKind::Rate => {
                summary.rate = self.rate();
                summary.passes = Some(self.non_zero);
                summary.fails = Some(self.count - self.non_zero);
            }
            MetricKind::Trend => {
                summary.avg = self.mean();
                summary.min = self.min();
                summary.max = self.max();
                summary.med = self.percentile(50.0);
                summary.p90 = self.percentile(90.0);
                summary.p95 = self.percentile(95.0);
                summary.p99 = self.percentile(99.0);
            }
        }
        summary
    }
}

/// Flattened statistics for one series.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateSummary {
    pub kind: MetricKind,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fails: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub med: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p90: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p95: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p99: Option<f64>,
}

impl Default for AggregateSummary {
    fn default() -> Self {
        Self {
            kind: MetricKind::Counter,
            count: 0,
            sum: None,
            rate: None,
            passes: None,
            fails: None,
            value: None,
            avg: None,
            min: None,
            max: None,
            med: None,
            p90: None,
            p95: None,
            p99: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(actual: Option<f64>, expected: f64) -> bool {
        match actual {
            Some(value) => (value - expected).abs() <= expected.abs() * 0.01 + 0.001,
            None => false,
        }
    }

    #[test]
    fn test_trend_statistics() {
        let mut trend = AggregateMetric::new(MetricKind::Trend);
        // 100 samples: 0ms, 100ms, ..., 9900ms
        for i in 0..100 {
            trend.add(i as f64 * 100.0);
        }

        assert_eq!(trend.count(), 100);
        assert_eq!(trend.min(), Some(0.0));
        assert_eq!(trend.max(), Some(9900.0));
        assert!(approx(trend.mean(), 4950.0));
        assert!(approx(trend.percentile(50.0), 4900.0));
        assert!(approx(trend.percentile(95.0), 9400.0));
        assert!(approx(trend.percentile(99.0), 9800.0));
    }

    #[test]
    fn test_percentiles_follow_large_values() {
        let mut trend = AggregateMetric::new(MetricKind::Trend);
        trend.add(250.0);
        assert!(approx(trend.percentile(95.0), 250.0));

        for _ in 0..100 {
            trend.add(10_000.0);
        }
        assert!(approx(trend.percentile(95.0), 10_000.0));
        assert!(approx(trend.value(Aggregation::Med, Duration::ZERO), 10_000.0));
    }

    #[test]
    fn test_rate_statistics() {
        let mut rate = AggregateMetric::new(MetricKind::Rate);
        for i in 0..10 {
            rate.add(if i < 3 { 1.0 } else { 0.0 });
        }

        assert_eq!(rate.rate(), Some(0.3));
        assert_eq!(rate.value(Aggregation::Rate, Duration::ZERO), Some(0.3));
        assert_eq!(rate.value(Aggregation::Count, Duration::ZERO), Some(3.0));
        assert_eq!(rate.value(Aggregation::Avg, Duration::ZERO), None);
        assert!(rate.percentile(50.0).is_none());
    }

    #[test]
    fn test_counter_rate_per_second() {
        let mut counter = AggregateMetric::new(MetricKind::Counter);
        for _ in 0..1000 {
            counter.add(1.0);
        }

        assert_eq!(counter.value(Aggregation::Count, Duration::from_secs(10)), Some(1000.0));
        assert_eq!(counter.value(Aggregation::Rate, Duration::from_secs(10)), Some(100.0));
    }

    #[test]
    fn test_empty_aggregate_has_no_values() {
        let trend = AggregateMetric::new(MetricKind::Trend);
        assert!(trend.value(Aggregation::Max, Duration::ZERO).is_none());
        assert!(trend.mean().is_none());
        assert!(trend.percentile(95.0).is_none());
    }

    #[test]
    fn test_merge_combines_distributions() {
        let mut left = AggregateMetric::new(MetricKind::Trend);
        let mut right = AggregateMetric::new(MetricKind::Trend);
        for i in 0..50 {
            left.add(i as f64);
            right.add((i + 50) as f64);
        }

        left.merge(&right);

        assert_eq!(left.count(), 100);
        assert_eq!(left.min(), Some(0.0));
        assert_eq!(left.max(), Some(99.0));
        assert!(approx(left.percentile(50.0), 49.0));
    }

    #[test]
    fn test_gauge_keeps_last_value() {
        let mut gauge = AggregateMetric::new(MetricKind::Gauge);
        gauge.add(10.0);
        gauge.add(25.0);
        gauge.add(5.0);

        assert_eq!(gauge.value(Aggregation::Value, Duration::ZERO), Some(5.0));
        assert_eq!(gauge.value(Aggregation::Max, Duration::ZERO), Some(25.0));
    }
}
