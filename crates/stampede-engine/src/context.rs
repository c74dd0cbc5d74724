//! Per-iteration execution context and the check primitive

use crate::scenario::SetupData;
use serde::Serialize;
use stampede_core::{MetricCollector, MetricSample, MetricSink, Tags};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one named check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
}

/// Everything one iteration can see. Built fresh for every iteration.
pub struct IterationContext<S> {
    vu_id: u32,
    iteration: u64,
    setup: SetupData<S>,
    collector: Arc<MetricCollector>,
    tags: Tags,
    checks: Vec<CheckResult>,
}

impl<S> IterationContext<S> {
    pub fn new(
        vu_id: u32,
        iteration: u64,
        setup: SetupData<S>,
        collector: Arc<MetricCollector>,
        tags: Tags,
    ) -> Self {
        Self {
            vu_id,
            iteration,
            setup,
            collector,
            tags,
            checks: Vec::new(),
        }
    }

    /// 1-based VU id
    pub fn vu_id(&self) -> u32 {
        self.vu_id
    }

    /// 0-based iteration number within this VU
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Shared setup payload, `None` when setup failed.
    pub fn setup(&self) -> Option<&S> {
        self.setup.get()
    }

    pub fn setup_data(&self) -> &SetupData<S> {
        &self.setup
    }

    /// Tags stamped on every sample recorded through this context.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn collector(&self) -> &Arc<MetricCollector> {
        &self.collector
    }

    /// Record a check outcome. Never halts the iteration; returns `passed`.
    pub fn check<T: ?Sized>(&mut self, value: &T, name: &str, predicate: impl FnOnce(&T) -> bool) -> bool {
        let passed = predicate(value);
        self.push_check(name, passed);
        passed
    }

    /// Start a group of checks over one value.
    ///
    /// ```ignore
    /// let ok = ctx
    ///     .checks(&response)
    ///     .that("status is 200", |r| r.status == 200)
    ///     .that("body not empty", |r| !r.body.is_empty())
    ///     .finish();
    /// ```
    pub fn checks<'a, T: ?Sized>(&'a mut self, value: &'a T) -> CheckSet<'a, S, T> {
        CheckSet {
            ctx: self,
            value,
            all_passed: true,
        }
    }

    fn push_check(&mut self, name: &str, passed: bool) {
        self.collector.record_check(name, passed, &self.tags);
        self.checks.push(CheckResult {
            name: name.to_string(),
            passed,
        });
    }

    /// Checks recorded so far.
    pub fn check_results(&self) -> &[CheckResult] {
        &self.checks
    }

    pub(crate) fn record_fault_check(&mut self, name: &str) {
        self.push_check(name, false);
    }

    pub(crate) fn take_checks(&mut self) -> Vec<CheckResult> {
        std::mem::take(&mut self.checks)
    }

    /// Think time. Suspends only this VU.
    pub async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

impl<S> MetricSink for IterationContext<S>
where
    S: Send + Sync,
{
    fn record(&self, sample: MetricSample) {
        self.collector.record(sample.with_tags(&self.tags));
    }
}

/// Builder returned by [`IterationContext::checks`].
pub struct CheckSet<'a, S, T: ?Sized> {
    ctx: &'a mut IterationContext<S>,
    value: &'a T,
    all_passed: bool,
}

impl<'a, S, T: ?Sized> CheckSet<'a, S, T> {
    /// Evaluate one predicate; every predicate runs even after a failure.
    pub fn that(mut self, name: &str, predicate: impl FnOnce(&T) -> bool) -> Self {
        let passed = predicate(self.value);
        self.ctx.push_check(name, passed);
        self.all_passed &= passed;
        self
    }

    /// Whether every predicate passed.
    pub fn finish(self) -> bool {
        self.all_passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampede_core::names;

    fn context() -> IterationContext<()> {
        let mut tags = Tags::new();
        tags.insert("scenario".into(), "test".into());
        IterationContext::new(3, 7, SetupData::new(()), Arc::new(MetricCollector::new()), tags)
    }

    #[test]
    fn test_check_records_result_and_metric() {
        let mut ctx = context();
        assert!(ctx.check(&200u16, "status is 200", |s| *s == 200));
        assert!(!ctx.check(&500u16, "status is 200", |s| *s == 200));

        assert_eq!(ctx.check_results().len(), 2);
        let snapshot = ctx.collector().snapshot();
        assert_eq!(snapshot.get(names::CHECKS).unwrap().rate(), Some(0.5));
        let key = "checks{check:status is 200,scenario:test}".parse().unwrap();
        assert_eq!(snapshot.get_key(&key).unwrap().count(), 2);
    }

    #[test]
    fn test_check_set_runs_every_predicate() {
        let mut ctx = context();
        let body = "hello";
        let ok = ctx
            .checks(body)
            .that("not empty", |b| !b.is_empty())
            .that("is json", |b| b.starts_with('{'))
            .that("short", |b| b.len() < 10)
            .finish();

        assert!(!ok);
        let passed: Vec<bool> = ctx.check_results().iter().map(|c| c.passed).collect();
        assert_eq!(passed, vec![true, false, true]);
    }

    #[test]
    fn test_sink_stamps_context_tags() {
        let ctx = context();
        MetricSink::record(&ctx, MetricSample::rate("errors", true));

        let key = "errors{scenario:test}".parse().unwrap();
        assert_eq!(ctx.collector().snapshot().get_key(&key).unwrap().count(), 1);
        assert_eq!(ctx.vu_id(), 3);
        assert_eq!(ctx.iteration(), 7);
    }
}
