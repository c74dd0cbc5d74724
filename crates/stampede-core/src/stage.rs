//! Staged concurrency profiles
//!
//! A profile is an ordered list of stages, each holding a target VU count for a
//! window of wall-clock time. How the target moves inside a stage is decided by
//! the [`RampPolicy`].

use crate::duration::serde_literal;
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// One window of the profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// How long the stage lasts (strictly positive)
    #[serde(with = "serde_literal")]
    pub duration: Duration,

    /// Target number of concurrently looping VUs
    pub target: u32,
}

impl Stage {
    pub fn new(duration: Duration, target: u32) -> Self {
        Self { duration, target }
    }
}

/// Parses the CLI shorthand `<duration>:<target>`, e.g. `30s:50`.
impl FromStr for Stage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (duration, target) = s
            .split_once(':')
            .ok_or_else(|| CoreError::invalid_profile(format!("stage `{}` is not <duration>:<target>", s)))?;
        let duration = crate::duration::parse_duration(duration)?;
        let target = target
            .trim()
            .parse()
            .map_err(|_| CoreError::invalid_profile(format!("stage `{}` has a non-numeric target", s)))?;
        Ok(Self { duration, target })
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", crate::duration::format_duration(self.duration), self.target)
    }
}

/// How the target moves inside a stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RampPolicy {
    /// The stage target holds for the entire stage.
    #[default]
    Plateau,

    /// Interpolate from the previous stage's target (0 before the first stage)
    /// to this stage's target over the stage duration.
    Linear,
}

impl fmt::Display for RampPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plateau => write!(f, "plateau"),
            Self::Linear => write!(f, "linear"),
        }
    }
}

/// Position of an elapsed instant inside the profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePosition {
    /// Zero-based stage index
    pub index: usize,

    /// Target VUs at this instant
    pub target: u32,

    /// Time left in the current stage
    pub remaining: Duration,
}

/// Immutable, validated stage profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProfile {
    stages: Vec<Stage>,

    #[serde(default)]
    policy: RampPolicy,
}

impl StageProfile {
    /// Build a profile, rejecting empty lists and zero-length stages.
    pub fn new(stages: Vec<Stage>, policy: RampPolicy) -> CoreResult<Self> {
        let profile = Self { stages, policy };
        profile.validate()?;
        Ok(profile)
    }

    /// A single plateau: `vus` for `duration`.
    pub fn constant(vus: u32, duration: Duration) -> CoreResult<Self> {
        Self::new(vec![Stage::new(duration, vus)], RampPolicy::Plateau)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.stages.is_empty() {
            return Err(CoreError::invalid_profile("profile has no stages"));
        }
        if let Some(index) = self.stages.iter().position(|s| s.duration.is_zero()) {
            return Err(CoreError::invalid_profile(format!(
                "stage {} has a zero duration",
                index + 1
            )));
        }
        Ok(())
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn policy(&self) -> RampPolicy {
        self.policy
    }

    /// Same stages under a different ramp policy.
    pub fn with_policy(mut self, policy: RampPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Highest target anywhere in the profile.
    pub fn peak_target(&self) -> u32 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Locate `elapsed` in the profile. Returns `None` once the profile is over.
    pub fn position_at(&self, elapsed: Duration) -> Option<StagePosition> {
        let mut stage_start = Duration::ZERO;
        let mut previous_target = 0u32;

        for (index, stage) in self.stages.iter().enumerate() {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                let into_stage = elapsed - stage_start;
                let target = match self.policy {
                    RampPolicy::Plateau => stage.target,
                    RampPolicy::Linear => {
                        let progress = into_stage.as_secs_f64() / stage.duration.as_secs_f64();
                        let from = f64::from(previous_target);
                        let to = f64::from(stage.target);
                        (from + (to - from) * progress).round() as u32
                    }
                };
                return Some(StagePosition {
                    index,
                    target,
                    remaining: stage_end - elapsed,
                });
            }
            stage_start = stage_end;
            previous_target = stage.target;
        }

        None
    }

    /// Target VUs at `elapsed`; zero once the profile is over.
    pub fn target_at(&self, elapsed: Duration) -> u32 {
        self.position_at(elapsed).map(|p| p.target).unwrap_or(0)
    }

    pub fn description(&self) -> String {
        let parts: Vec<String> = self
            .stages
            .iter()
            .map(|s| format!("{}→{}", crate::duration::format_duration(s.duration), s.target))
            .collect();
        format!("{} [{}]", self.policy, parts.join(", "))
    }
}
