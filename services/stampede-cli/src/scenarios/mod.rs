//! Built-in scenarios against the banking service
//!
//! Each scenario ships a default stage profile and threshold set, used when
//! neither the config file nor the command line provide one.

pub mod burst;
pub mod identity;
pub mod signup;
pub mod workflow;

pub use burst::BurstScenario;
pub use identity::{Account, Identity, Member};
pub use signup::SignupScenario;
pub use workflow::WorkflowScenario;

use clap::ValueEnum;
use stampede_core::{MetricSample, MetricSink, RunConfig, Stage, ThresholdRule};
use std::fmt;
use std::time::Duration;

/// Rate metric: one sample per scenario step, a hit when the step failed.
pub const ERRORS: &str = "errors";

/// Seed endpoint listing members.
pub const MEMBERS_PATH: &str = "/api/test/members";

/// Record the outcome of one step into the `errors` rate.
pub fn record_step(sink: &dyn MetricSink, succeeded: bool) {
    sink.record(MetricSample::rate(ERRORS, !succeeded));
}

/// Scales every think time; 0 disables them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pace(f64);

impl Pace {
    pub fn new(scale: f64) -> Self {
        Self(if scale.is_finite() { scale.max(0.0) } else { 1.0 })
    }

    pub fn think(&self, base: Duration) -> Duration {
        base.mul_f64(self.0)
    }
}

impl Default for Pace {
    fn default() -> Self {
        Self(1.0)
    }
}

/// Built-in scenario selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScenarioKind {
    /// Signup stress with real member data
    Signup,
    /// Instant burst of signups
    Burst,
    /// Signup, login, cards, goal and report per iteration
    Workflow,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 3] = [Self::Signup, Self::Burst, Self::Workflow];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Signup => "signup",
            Self::Burst => "burst",
            Self::Workflow => "workflow",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Signup => "signup stress test with real member data",
            Self::Burst => "burst of 5000 concurrent signups",
            Self::Workflow => "full signup, login, card, goal and report workflow",
        }
    }

    pub fn defaults(&self) -> ScenarioDefaults {
        let m = |minutes: u64| Duration::from_secs(minutes * 60);
        match self {
            Self::Signup => ScenarioDefaults {
                stages: vec![
                    Stage::new(Duration::from_secs(30), 50),
                    Stage::new(m(1), 100),
                    Stage::new(m(2), 200),
                    Stage::new(m(3), 500),
                    Stage::new(m(5), 1000),
                    Stage::new(m(10), 2000),
                    Stage::new(m(5), 0),
                ],
                thresholds: vec![
                    ("http_req_duration", "p(95)<3000"),
                    ("http_req_failed", "rate<0.1"),
                    (ERRORS, "rate<0.1"),
                ],
            },
            Self::Burst => ScenarioDefaults {
                stages: vec![Stage::new(Duration::from_secs(30), 5000)],
                thresholds: vec![("http_req_duration", "max<5000")],
            },
            Self::Workflow => ScenarioDefaults {
                stages: vec![
                    Stage::new(m(2), 50),
                    Stage::new(m(5), 100),
                    Stage::new(m(5), 200),
                    Stage::new(m(5), 300),
                    Stage::new(m(5), 0),
                ],
                thresholds: vec![
                    ("http_req_duration", "p(95)<10000"),
                    ("http_req_failed", "rate<0.30"),
                    (ERRORS, "rate<0.30"),
                ],
            },
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Profile and thresholds a scenario runs with unless overridden.
#[derive(Debug, Clone)]
pub struct ScenarioDefaults {
    pub stages: Vec<Stage>,
    pub thresholds: Vec<(&'static str, &'static str)>,
}

impl ScenarioDefaults {
    /// Fill stages and thresholds the configuration left empty.
    pub fn apply(&self, config: &mut RunConfig) {
        if config.stages.is_empty() {
            config.stages = self.stages.clone();
        }
        if config.thresholds.is_empty() {
            for (selector, expression) in &self.thresholds {
                config.add_threshold(*selector, ThresholdRule::from(*expression));
            }
        }
    }
}
