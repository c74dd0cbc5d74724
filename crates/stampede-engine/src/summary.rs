//! Run summary and report generation

use crate::error::EngineResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use stampede_core::{names, MetricKey, MetricKind, MetricsSnapshot, SnapshotReport, ThresholdOutcome};
use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;

/// Final verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    ThresholdsFailed,
    Aborted,
}

impl RunStatus {
    /// Process exit code for this status.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Passed => 0,
            Self::ThresholdsFailed => 99,
            Self::Aborted => 108,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::ThresholdsFailed => write!(f, "thresholds_failed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Why a run was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum AbortReason {
    Threshold { metric: String, expression: String },
    Operator,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Threshold { metric, expression } => {
                write!(f, "threshold {} {} failed", metric, expression)
            }
            Self::Operator => write!(f, "interrupted by operator"),
        }
    }
}

/// Pass/fail tally of one named check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

impl CheckSummary {
    pub fn rate(&self) -> f64 {
        let total = self.passes + self.fails;
        if total == 0 {
            0.0
        } else {
            self.passes as f64 / total as f64
        }
    }
}

/// Request latency of one named step (the `name` tag of HTTP samples).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSummary {
    pub name: String,
    pub requests: u64,
    pub avg: Option<f64>,
    pub p95: Option<f64>,
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_rate: Option<f64>,
}

/// Everything known about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub scenario: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub profile: String,
    pub peak_vus: u32,
    pub iterations: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_degraded: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_error: Option<String>,
    pub warnings: Vec<String>,
    pub checks: Vec<CheckSummary>,
    pub steps: Vec<StepSummary>,
    pub thresholds: Vec<ThresholdOutcome>,
    pub metrics: SnapshotReport,
}

/// Report format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Markdown,
    Json,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown report format `{}`", other)),
        }
    }
}

impl ReportFormat {
    /// Guess the format from a file extension, defaulting to JSON.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
            .unwrap_or(Self::Json)
    }
}

/// Per-check tallies read from the `checks` metric.
pub fn check_summaries(snapshot: &MetricsSnapshot) -> Vec<CheckSummary> {
    snapshot
        .tag_values(names::CHECKS, "check")
        .into_iter()
        .filter_map(|name| {
            let mut selector = MetricKey::untagged(names::CHECKS);
            selector.tags.insert("check".to_string(), name.clone());
            let aggregate = snapshot.select(&selector)?;
            Some(CheckSummary {
                name,
                passes: aggregate.non_zero(),
                fails: aggregate.count() - aggregate.non_zero(),
            })
        })
        .collect()
}

/// Per-step latency read from the `name`-tagged `http_req_duration` series.
pub fn step_summaries(snapshot: &MetricsSnapshot) -> Vec<StepSummary> {
    let tagged = |metric: &str, name: &str| {
        let mut selector = MetricKey::untagged(metric);
        selector.tags.insert("name".to_string(), name.to_string());
        snapshot.select(&selector)
    };

    snapshot
        .tag_values(names::HTTP_REQ_DURATION, "name")
        .into_iter()
        .filter_map(|name| {
            let duration = tagged(names::HTTP_REQ_DURATION, &name)?;
            let failed_rate = tagged(names::HTTP_REQ_FAILED, &name).and_then(|failed| failed.rate());
            Some(StepSummary {
                requests: duration.count(),
                avg: duration.mean(),
                p95: duration.percentile(95.0),
                max: duration.max(),
                failed_rate,
                name,
            })
        })
        .collect()
}

impl RunSummary {
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    pub fn render(&self, format: ReportFormat) -> EngineResult<String> {
        Ok(match format {
            ReportFormat::Text => self.generate_text(),
            ReportFormat::Markdown => self.generate_markdown(),
            ReportFormat::Json => serde_json::to_string_pretty(self)?,
        })
    }

    /// Write report to file
    pub fn write_report(&self, path: impl AsRef<Path>, format: ReportFormat) -> EngineResult<()> {
        std::fs::write(path, self.render(format)?)?;
        Ok(())
    }

    fn status_line(&self) -> String {
        match &self.abort_reason {
            Some(reason) => format!("{} ({})", self.status, reason),
            None => self.status.to_string(),
        }
    }

    /// Roll-up series in name order; per-step breakdowns come from `steps`.
    fn rollup_lines(&self) -> Vec<(String, String)> {
        self.metrics
            .metrics
            .iter()
            .filter(|(key, _)| !key.contains('{'))
            .map(|(key, summary)| {
                let text = match summary.kind {
                    MetricKind::Counter => format!(
                        "{} {:.2}/s",
                        summary.sum.unwrap_or(0.0),
                        summary.rate.unwrap_or(0.0)
                    ),
                    MetricKind::Gauge => format!(
                        "value={} min={} max={}",
                        summary.value.unwrap_or(0.0),
                        summary.min.unwrap_or(0.0),
                        summary.max.unwrap_or(0.0)
                    ),
                    MetricKind::Rate => format!(
                        "{:.2}% ✓ {} ✗ {}",
                        summary.rate.unwrap_or(0.0) * 100.0,
                        summary.passes.unwrap_or(0),
                        summary.fails.unwrap_or(0)
                    ),
                    MetricKind::Trend => format!(
                        "avg={:.2} min={:.2} med={:.2} max={:.2} p(90)={:.2} p(95)={:.2} p(99)={:.2}",
                        summary.avg.unwrap_or(0.0),
                        summary.min.unwrap_or(0.0),
                        summary.med.unwrap_or(0.0),
                        summary.max.unwrap_or(0.0),
                        summary.p90.unwrap_or(0.0),
                        summary.p95.unwrap_or(0.0),
                        summary.p99.unwrap_or(0.0)
                    ),
                };
                (key.clone(), text)
            })
            .collect()
    }

    fn generate_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "scenario: {}", self.scenario);
        let _ = writeln!(out, "status:   {}", self.status_line());
        let _ = writeln!(
            out,
            "duration: {:.1}s  peak VUs: {}  iterations: {}",
            self.duration_seconds, self.peak_vus, self.iterations
        );
        let _ = writeln!(out, "profile:  {}", self.profile);

        if let Some(reason) = &self.setup_degraded {
            let _ = writeln!(out, "setup:    degraded ({})", reason);
        }
        if let Some(error) = &self.teardown_error {
            let _ = writeln!(out, "teardown: {}", error);
        }
        for warning in &self.warnings {
            let _ = writeln!(out, "warning:  {}", warning);
        }

        if !self.checks.is_empty() {
            let _ = writeln!(out, "\nchecks");
            for check in &self.checks {
                let _ = writeln!(
                    out,
                    "  {} {:.<40} {:.2}% ✓ {} ✗ {}",
                    if check.fails == 0 { "✓" } else { "✗" },
                    format!("{} ", check.name),
                    check.rate() * 100.0,
                    check.passes,
                    check.fails
                );
            }
        }

        if !self.thresholds.is_empty() {
            let _ = writeln!(out, "\nthresholds");
            for outcome in &self.thresholds {
                let _ = writeln!(out, "  {}", outcome);
            }
        }

        if !self.steps.is_empty() {
            let _ = writeln!(out, "\nsteps");
            for step in &self.steps {
                let _ = writeln!(
                    out,
                    "  {:.<30} {} reqs avg={:.2}ms p(95)={:.2}ms max={:.2}ms failed={:.2}%",
                    format!("{} ", step.name),
                    step.requests,
                    step.avg.unwrap_or(0.0),
                    step.p95.unwrap_or(0.0),
                    step.max.unwrap_or(0.0),
                    step.failed_rate.unwrap_or(0.0) * 100.0
                );
            }
        }

        let _ = writeln!(out, "\nmetrics");
        for (name, text) in self.rollup_lines() {
            let _ = writeln!(out, "  {:.<30} {}", format!("{} ", name), text);
        }
        out
    }

    fn generate_markdown(&self) -> String {
        let mut out = String::new();
        let emoji = if self.passed() { "✅" } else { "❌" };
        let _ = writeln!(out, "# Load Test Report: {}\n", self.scenario);
        let _ = writeln!(out, "**Status**: {} {}\n", emoji, self.status_line());
        let _ = writeln!(out, "---\n\n## Summary\n");
        let _ = writeln!(out, "- **Started**: {}", self.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(out, "- **Duration**: {:.1} seconds", self.duration_seconds);
        let _ = writeln!(out, "- **Profile**: {}", self.profile);
        let _ = writeln!(out, "- **Peak VUs**: {}", self.peak_vus);
        let _ = writeln!(out, "- **Iterations**: {}", self.iterations);
        let _ = writeln!(out, "- **Samples**: {}", self.metrics.total_samples);
        if let Some(reason) = &self.setup_degraded {
            let _ = writeln!(out, "- **Setup**: degraded ({})", reason);
        }
        if let Some(error) = &self.teardown_error {
            let _ = writeln!(out, "- **Teardown**: {}", error);
        }
        for warning in &self.warnings {
            let _ = writeln!(out, "- **Warning**: {}", warning);
        }

        if !self.thresholds.is_empty() {
            let _ = writeln!(out, "\n---\n\n## Thresholds\n");
            let _ = writeln!(out, "| Metric | Expression | Current | Status |");
            let _ = writeln!(out, "|--------|------------|---------|--------|");
            for outcome in &self.thresholds {
                let _ = writeln!(
                    out,
                    "| `{}` | `{}` | {} | {} |",
                    outcome.metric,
                    outcome.expression,
                    outcome
                        .current_value
                        .map(|v| format!("{:.4}", v))
                        .unwrap_or_else(|| "-".to_string()),
                    if outcome.passed { "✅" } else { "❌" }
                );
            }
        }

        if !self.checks.is_empty() {
            let _ = writeln!(out, "\n---\n\n## Checks\n");
            let _ = writeln!(out, "| Check | Passes | Fails | Rate |");
            let _ = writeln!(out, "|-------|--------|-------|------|");
            for check in &self.checks {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {:.2}% |",
                    check.name,
                    check.passes,
                    check.fails,
                    check.rate() * 100.0
                );
            }
        }

        if !self.steps.is_empty() {
            let _ = writeln!(out, "\n---\n\n## Steps\n");
            let _ = writeln!(out, "| Step | Requests | Avg (ms) | P95 (ms) | Max (ms) | Failed |");
            let _ = writeln!(out, "|------|----------|----------|----------|----------|--------|");
            for step in &self.steps {
                let _ = writeln!(
                    out,
                    "| {} | {} | {:.2} | {:.2} | {:.2} | {:.2}% |",
                    step.name,
                    step.requests,
                    step.avg.unwrap_or(0.0),
                    step.p95.unwrap_or(0.0),
                    step.max.unwrap_or(0.0),
                    step.failed_rate.unwrap_or(0.0) * 100.0
                );
            }
        }

        let _ = writeln!(out, "\n---\n\n## Metrics\n");
        let _ = writeln!(out, "| Metric | Values |");
        let _ = writeln!(out, "|--------|--------|");
        for (name, text) in self.rollup_lines() {
            let _ = writeln!(out, "| `{}` | {} |", name, text);
        }

        let _ = writeln!(
            out,
            "\n---\n\n**Report Generated**: {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );
        out
    }
}
