//! One-time setup and teardown around the load phase

use crate::scenario::{Scenario, SetupContext, SetupData};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{info, warn};

/// Setup payload plus the reason it was degraded, if it was.
#[derive(Debug)]
pub struct SetupOutcome<S> {
    pub data: SetupData<S>,

    /// Why the empty payload was substituted (failure, timeout or panic)
    pub degraded: Option<String>,
}

/// Run `setup` exactly once. Failure, panic, timeout or run cancellation
/// yields the empty payload.
pub async fn run_setup<S: Scenario>(
    scenario: &S,
    ctx: &SetupContext,
    timeout: Duration,
) -> SetupOutcome<S::Setup> {
    info!(scenario = scenario.name(), timeout = ?timeout, "Running setup");

    let body = AssertUnwindSafe(scenario.setup(ctx)).catch_unwind();
    let degraded = tokio::select! {
        result = tokio::time::timeout(timeout, body) => match result {
            Ok(Ok(Ok(setup))) => {
                if scenario.is_setup_empty(&setup) {
                    warn!(scenario = scenario.name(), "Setup returned an empty payload");
                } else {
                    info!(scenario = scenario.name(), "Setup complete");
                }
                return SetupOutcome {
                    data: SetupData::new(setup),
                    degraded: None,
                };
            }
            Ok(Ok(Err(err))) => format!("setup failed: {:#}", err),
            Ok(Err(_)) => "setup panicked".to_string(),
            Err(_) => format!("setup timed out after {:?}", timeout),
        },
        _ = ctx.cancel_token().cancelled() => "setup cancelled".to_string(),
    };

    warn!(scenario = scenario.name(), reason = %degraded, "Continuing with empty setup data");
    SetupOutcome {
        data: SetupData::empty(),
        degraded: Some(degraded),
    }
}

/// Run `teardown` exactly once, also after a degraded setup. Returns the
/// failure text; never changes run status.
pub async fn run_teardown<S: Scenario>(
    scenario: &S,
    ctx: &SetupContext,
    setup: &SetupData<S::Setup>,
    timeout: Duration,
) -> Option<String> {
    info!(scenario = scenario.name(), empty_setup = setup.is_empty(), "Running teardown");
    let body = AssertUnwindSafe(scenario.teardown(ctx, setup)).catch_unwind();
    let error = match tokio::time::timeout(timeout, body).await {
        Ok(Ok(Ok(()))) => return None,
        Ok(Ok(Err(err))) => format!("teardown failed: {:#}", err),
        Ok(Err(_)) => "teardown panicked".to_string(),
        Err(_) => format!("teardown timed out after {:?}", timeout),
    };

    warn!(scenario = scenario.name(), reason = %error, "Teardown did not complete");
    Some(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::IterationContext;
    use async_trait::async_trait;
    use stampede_core::MetricCollector;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct Recorder {
        fail_setup: bool,
        hang_setup: bool,
        fail_teardown: bool,
        setup_calls: AtomicU32,
        teardown_calls: AtomicU32,
    }

    #[async_trait]
    impl Scenario for Recorder {
        type Setup = String;

        fn name(&self) -> &str {
            "recorder"
        }

        async fn setup(&self, _ctx: &SetupContext) -> anyhow::Result<String> {
            self.setup_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang_setup {
                tokio::time::sleep(Duration::from_secs(600)).await;
            }
            if self.fail_setup {
                anyhow::bail!("seed source unreachable");
            }
            Ok("members".to_string())
        }

        async fn iteration(&self, _ctx: &mut IterationContext<String>) -> anyhow::Result<()> {
            Ok(())
        }

        async fn teardown(&self, _ctx: &SetupContext, setup: &SetupData<String>) -> anyhow::Result<()> {
            self.teardown_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(members) = setup.get() {
                assert_eq!(members, "members");
            }
            if self.fail_teardown {
                anyhow::bail!("cleanup endpoint returned 500");
            }
            Ok(())
        }
    }

    fn ctx() -> SetupContext {
        SetupContext::new("recorder", Arc::new(MetricCollector::new()), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_setup_success() {
        let recorder = Recorder::default();
        let outcome = run_setup(&recorder, &ctx(), Duration::from_secs(5)).await;
        assert_eq!(outcome.data.get().map(String::as_str), Some("members"));
        assert!(outcome.degraded.is_none());
        assert_eq!(recorder.setup_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_setup_failure_degrades() {
        let recorder = Recorder {
            fail_setup: true,
            ..Default::default()
        };
        let outcome = run_setup(&recorder, &ctx(), Duration::from_secs(5)).await;
        assert!(outcome.data.is_empty());
        assert!(outcome.degraded.unwrap().contains("seed source unreachable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_timeout_degrades() {
        let recorder = Recorder {
            hang_setup: true,
            ..Default::default()
        };
        let outcome = run_setup(&recorder, &ctx(), Duration::from_secs(300)).await;
        assert!(outcome.data.is_empty());
        assert!(outcome.degraded.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_teardown_failure_reported() {
        let recorder = Recorder {
            fail_teardown: true,
            ..Default::default()
        };
        let data = SetupData::new("members".to_string());
        let error = run_teardown(&recorder, &ctx(), &data, Duration::from_secs(5)).await;
        assert!(error.unwrap().contains("500"));
        assert_eq!(recorder.teardown_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_teardown_runs_after_degraded_setup() {
        let recorder = Recorder::default();
        let error = run_teardown(&recorder, &ctx(), &SetupData::empty(), Duration::from_secs(5)).await;
        assert!(error.is_none());
        assert_eq!(recorder.teardown_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_stops_on_cancel() {
        let recorder = Recorder {
            hang_setup: true,
            ..Default::default()
        };
        let ctx = ctx();
        let cancel = ctx.cancel_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });

        let started = tokio::time::Instant::now();
        let outcome = run_setup(&recorder, &ctx, Duration::from_secs(300)).await;

        assert!(outcome.data.is_empty());
        assert_eq!(outcome.degraded.as_deref(), Some("setup cancelled"));
        assert!(started.elapsed() < Duration::from_secs(300));
    }
}
