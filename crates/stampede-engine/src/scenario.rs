//! Scenario hooks implemented by load-test authors

use crate::context::IterationContext;
use async_trait::async_trait;
use stampede_core::{MetricCollector, MetricSample, MetricSink, Tags};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A user-defined workload.
///
/// `setup` runs once before any VU starts and its result is shared read-only
/// with every iteration. `iteration` is looped by every VU. `teardown` runs
/// once after the last VU retires, with the empty payload if setup degraded.
#[async_trait]
pub trait Scenario: Send + Sync + 'static {
    /// Payload produced by `setup`.
    type Setup: Send + Sync + 'static;

    fn name(&self) -> &str;

    async fn setup(&self, ctx: &SetupContext) -> anyhow::Result<Self::Setup>;

    async fn iteration(&self, ctx: &mut IterationContext<Self::Setup>) -> anyhow::Result<()>;

    async fn teardown(&self, _ctx: &SetupContext, _setup: &SetupData<Self::Setup>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Whether a successful setup result still counts as empty
    /// (e.g. the seed source returned no members).
    fn is_setup_empty(&self, _setup: &Self::Setup) -> bool {
        false
    }

    /// Skip the iteration body while the setup payload is empty.
    fn skip_when_setup_empty(&self) -> bool {
        true
    }
}

/// Context handed to `setup` and `teardown`.
#[derive(Clone)]
pub struct SetupContext {
    scenario: String,
    collector: Arc<MetricCollector>,
    cancel: CancellationToken,
    tags: Tags,
}

impl SetupContext {
    pub fn new(scenario: impl Into<String>, collector: Arc<MetricCollector>, cancel: CancellationToken) -> Self {
        let scenario = scenario.into();
        let mut tags = Tags::new();
        tags.insert("scenario".to_string(), scenario.clone());
        tags.insert("group".to_string(), "setup".to_string());
        Self {
            scenario,
            collector,
            cancel,
            tags,
        }
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn collector(&self) -> &Arc<MetricCollector> {
        &self.collector
    }

    /// Run-level cancellation; set once the operator interrupts the run.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl MetricSink for SetupContext {
    fn record(&self, sample: MetricSample) {
        self.collector.record(sample.with_tags(&self.tags));
    }
}

/// Setup payload as seen by iterations: either the shared result of `setup`
/// or the empty payload substituted after a failure.
pub struct SetupData<S> {
    inner: Option<Arc<S>>,
}

impl<S> SetupData<S> {
    pub fn new(setup: S) -> Self {
        Self {
            inner: Some(Arc::new(setup)),
        }
    }

    pub fn empty() -> Self {
        Self { inner: None }
    }

    pub fn get(&self) -> Option<&S> {
        self.inner.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }
}

impl<S> Clone for SetupData<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> std::fmt::Debug for SetupData<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupData")
            .field("empty", &self.is_empty())
            .finish()
    }
}
