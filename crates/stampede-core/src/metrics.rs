//! Engine self-metrics
//!
//! Prometheus metrics describing the load generator itself (not the system
//! under test). Registered lazily on first access using once_cell::Lazy.

use crate::error::{CoreError, CoreResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

// ===== Scheduler Metrics =====

/// VU tasks currently alive
pub static ACTIVE_VUS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("stampede_active_vus", "Number of VU tasks currently alive")
        .expect("Failed to register active VUs gauge")
});

/// Target VU count requested by the stage profile
pub static TARGET_VUS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("stampede_target_vus", "Target VU count of the current stage")
        .expect("Failed to register target VUs gauge")
});

/// Spawns refused because the target exceeded `max_vus`
pub static CAPPED_SPAWNS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "stampede_capped_spawns_total",
        "VU spawns refused by the concurrency cap"
    )
    .expect("Failed to register capped spawns counter")
});

// ===== Executor Metrics =====

/// Iterations by scenario and outcome (completed/skipped/faulted/timed_out)
pub static ITERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "stampede_iterations_total",
        "Total number of scenario iterations",
        &["scenario", "outcome"]
    )
    .expect("Failed to register iterations counter")
});

/// Iteration wall time
pub static ITERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "stampede_iteration_duration_seconds",
        "Scenario iteration duration in seconds",
        &["scenario"],
        // Buckets: 10ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s, 30s, 60s, 120s
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .expect("Failed to register iteration duration histogram")
});

// ===== Threshold Metrics =====

/// Failed threshold evaluations by metric selector
pub static THRESHOLD_BREACHES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "stampede_threshold_breaches_total",
        "Threshold evaluations that failed",
        &["metric"]
    )
    .expect("Failed to register threshold breaches counter")
});

/// Encode every registered metric in the Prometheus text format.
pub fn gather_text() -> CoreResult<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| CoreError::SerializationError(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| CoreError::SerializationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let _ = &*ACTIVE_VUS;
        let _ = &*TARGET_VUS;
        let _ = &*CAPPED_SPAWNS;
        let _ = &*ITERATIONS;
        let _ = &*ITERATION_DURATION;
        let _ = &*THRESHOLD_BREACHES;
    }

    #[test]
    fn test_gather_text_contains_iterations() {
        ITERATIONS.with_label_values(&["signup", "completed"]).inc();

        let text = gather_text().unwrap();
        assert!(text.contains("stampede_iterations_total"));
    }
}
