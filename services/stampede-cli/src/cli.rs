//! Command-line interface and config resolution

use crate::scenarios::ScenarioKind;
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use stampede_core::{parse_duration, RampPolicy, RunConfig, Stage, ThresholdRule};
use stampede_engine::ReportFormat;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "stampede")]
#[command(about = "Staged virtual-user load generator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a built-in scenario
    Run(RunArgs),

    /// Resolve and validate the run configuration without generating load
    Validate(RunArgs),

    /// List built-in scenarios with their default profiles
    Scenarios,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Scenario to run
    #[arg(value_enum)]
    pub scenario: ScenarioKind,

    /// Config file (defaults to STAMPEDE_CONFIG, then ./config/stampede.*)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Stage as DURATION:TARGET, repeatable (e.g. --stage 30s:50 --stage 1m:0)
    #[arg(long = "stage", value_name = "DURATION:TARGET", value_parser = parse_stage)]
    pub stages: Vec<Stage>,

    /// Constant VU count (with --duration)
    #[arg(long, requires = "duration", conflicts_with = "stages")]
    pub vus: Option<u32>,

    /// Constant-profile duration (with --vus)
    #[arg(long, requires = "vus", value_parser = parse_duration_arg)]
    pub duration: Option<Duration>,

    /// Threshold as SELECTOR=EXPRESSION, repeatable (e.g. http_req_failed=rate<0.1)
    #[arg(long = "threshold", value_name = "SELECTOR=EXPR")]
    pub thresholds: Vec<String>,

    /// Threshold that stops the run as soon as it fails
    #[arg(long = "abort-threshold", value_name = "SELECTOR=EXPR")]
    pub abort_thresholds: Vec<String>,

    /// How targets move within a stage
    #[arg(long, value_enum)]
    pub ramp_policy: Option<RampPolicyArg>,

    /// Concurrency cap
    #[arg(long)]
    pub max_vus: Option<u32>,

    /// Upper bound on a single iteration
    #[arg(long, value_parser = parse_duration_arg)]
    pub iteration_timeout: Option<Duration>,

    /// System under test
    #[arg(long, env = "STAMPEDE_BASE_URL")]
    pub base_url: Option<String>,

    /// Seed-data service (defaults to the base URL)
    #[arg(long, env = "STAMPEDE_SEED_URL")]
    pub seed_url: Option<String>,

    /// Write the run summary to this file
    #[arg(long)]
    pub summary: Option<PathBuf>,

    /// Summary format (defaults to the file extension)
    #[arg(long, value_parser = parse_report_format)]
    pub format: Option<ReportFormat>,

    /// Multiply every think time (0 disables them)
    #[arg(long, default_value = "1.0")]
    pub think_time_scale: f64,

    /// Hide the live progress line
    #[arg(long)]
    pub no_progress: bool,

    /// Serve engine metrics for Prometheus on this address during the run
    #[arg(long, env = "STAMPEDE_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RampPolicyArg {
    Plateau,
    Linear,
}

impl From<RampPolicyArg> for RampPolicy {
    fn from(arg: RampPolicyArg) -> Self {
        match arg {
            RampPolicyArg::Plateau => RampPolicy::Plateau,
            RampPolicyArg::Linear => RampPolicy::Linear,
        }
    }
}

impl RunArgs {
    /// Load the config file and environment, apply flags, fill scenario
    /// defaults and validate the result.
    pub fn resolve_config(&self) -> anyhow::Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => RunConfig::load().context("failed to load configuration")?,
        };

        self.apply(&mut config)?;
        self.scenario.defaults().apply(&mut config);
        config.validate()?;

        Ok(config)
    }

    /// Flags override file and environment values.
    pub fn apply(&self, config: &mut RunConfig) -> anyhow::Result<()> {
        if !self.stages.is_empty() {
            config.stages = self.stages.clone();
        }
        if let (Some(vus), Some(duration)) = (self.vus, self.duration) {
            config.stages = vec![Stage::new(duration, vus)];
        }

        for raw in &self.thresholds {
            let (selector, expression) = split_threshold(raw)?;
            config.add_threshold(selector, ThresholdRule::from(expression));
        }
        for raw in &self.abort_thresholds {
            let (selector, expression) = split_threshold(raw)?;
            config.add_threshold(
                selector,
                ThresholdRule::Detailed {
                    threshold: expression.to_string(),
                    abort_on_fail: true,
                },
            );
        }

        if let Some(policy) = self.ramp_policy {
            config.ramp_policy = policy.into();
        }
        if let Some(max_vus) = self.max_vus {
            config.max_vus = max_vus;
        }
        if self.iteration_timeout.is_some() {
            config.iteration_timeout = self.iteration_timeout;
        }
        if let Some(base_url) = &self.base_url {
            config.http.base_url = base_url.clone();
        }
        if let Some(seed_url) = &self.seed_url {
            config.http.seed_url = Some(seed_url.clone());
        }

        Ok(())
    }

    /// Summary destination and its format.
    pub fn summary_target(&self) -> Option<(PathBuf, ReportFormat)> {
        self.summary.as_ref().map(|path| {
            let format = self.format.unwrap_or_else(|| ReportFormat::from_path(path));
            (path.clone(), format)
        })
    }
}

fn split_threshold(raw: &str) -> anyhow::Result<(&str, &str)> {
    match raw.split_once('=') {
        Some((selector, expression)) if !selector.trim().is_empty() && !expression.trim().is_empty() => {
            Ok((selector.trim(), expression.trim()))
        }
        _ => bail!("threshold `{}` must look like SELECTOR=EXPRESSION", raw),
    }
}

fn parse_stage(s: &str) -> Result<Stage, String> {
    s.parse().map_err(|e: stampede_core::CoreError| e.to_string())
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

fn parse_report_format(s: &str) -> Result<ReportFormat, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> RunArgs {
        let mut full = vec!["stampede", "run"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Run(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_stage_flags_override_config() {
        let args = args(&["signup", "--stage", "10s:5", "--stage", "5s:0", "--ramp-policy", "linear"]);
        let mut config = RunConfig::default();
        args.apply(&mut config).unwrap();

        assert_eq!(config.stages.len(), 2);
        assert_eq!(config.stages[0], Stage::new(Duration::from_secs(10), 5));
        assert_eq!(config.ramp_policy, RampPolicy::Linear);
    }

    #[test]
    fn test_vus_and_duration_make_constant_profile() {
        let args = args(&["burst", "--vus", "20", "--duration", "1m"]);
        let mut config = RunConfig::default();
        args.apply(&mut config).unwrap();

        assert_eq!(config.stages, vec![Stage::new(Duration::from_secs(60), 20)]);
        assert!(Cli::try_parse_from(["stampede", "run", "burst", "--vus", "20"]).is_err());
    }

    #[test]
    fn test_threshold_flags() {
        let args = args(&[
            "workflow",
            "--threshold",
            "http_req_duration{name:Login}=p(95)<=500",
            "--abort-threshold",
            "errors=rate<0.5",
        ]);
        let mut config = RunConfig::default();
        args.apply(&mut config).unwrap();

        let specs = config.threshold_specs().unwrap();
        assert_eq!(specs.len(), 2);
        assert!(specs.iter().any(|s| s.abort_on_fail));
        assert_eq!(config.thresholds["http_req_duration{name:Login}"][0].expression(), "p(95)<=500");
    }

    #[test]
    fn test_malformed_threshold_flag() {
        let args = args(&["signup", "--threshold", "rate<0.1"]);
        assert!(args.apply(&mut RunConfig::default()).is_err());
    }

    #[test]
    fn test_endpoints_and_limits() {
        let args = args(&[
            "signup",
            "--base-url",
            "http://sut:8080",
            "--seed-url",
            "http://seed:8081",
            "--max-vus",
            "50",
            "--iteration-timeout",
            "90s",
        ]);
        let mut config = RunConfig::default();
        args.apply(&mut config).unwrap();

        assert_eq!(config.http.base_url, "http://sut:8080");
        assert_eq!(config.http.seed_base_url(), "http://seed:8081");
        assert_eq!(config.max_vus, 50);
        assert_eq!(config.iteration_timeout, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_summary_format_follows_extension() {
        let markdown = args(&["signup", "--summary", "out/summary.md"]);
        let (path, format) = markdown.summary_target().unwrap();
        assert_eq!(path, PathBuf::from("out/summary.md"));
        assert_eq!(format, ReportFormat::Markdown);

        let forced = args(&["signup", "--summary", "out.txt", "--format", "json"]);
        assert_eq!(forced.summary_target().unwrap().1, ReportFormat::Json);
        assert!(args(&["signup"]).summary_target().is_none());
    }

    #[test]
    fn test_metrics_addr_flag() {
        let args = args(&["burst", "--metrics-addr", "0.0.0.0:9464"]);
        assert_eq!(args.metrics_addr, Some("0.0.0.0:9464".parse().unwrap()));
        assert!(Cli::try_parse_from(["stampede", "run", "burst", "--metrics-addr", "nowhere"]).is_err());
    }
}
