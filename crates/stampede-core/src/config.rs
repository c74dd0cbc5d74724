//! Run configuration
//!
//! Sources, lowest priority first:
//! - Built-in defaults
//! - Config file named by `STAMPEDE_CONFIG`
//! - ./config/stampede.{yaml,toml,json}
//! - Environment variables (`STAMPEDE__MAX_VUS=2000`, `STAMPEDE__HTTP__TIMEOUT=10s`)

use crate::duration::{serde_literal, serde_literal_opt};
use crate::error::{CoreError, CoreResult};
use crate::stage::{RampPolicy, Stage, StageProfile};
use crate::threshold::ThresholdSpec;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Root configuration of one load run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Stage list. Empty means "use the scenario's built-in profile".
    #[serde(default)]
    pub stages: Vec<Stage>,

    #[serde(default)]
    pub ramp_policy: RampPolicy,

    /// Metric selector -> threshold expressions
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<ThresholdRule>>,

    #[serde(with = "serde_literal", default = "default_setup_timeout")]
    pub setup_timeout: Duration,

    #[serde(with = "serde_literal", default = "default_teardown_timeout")]
    pub teardown_timeout: Duration,

    /// Upper bound on a single iteration; unbounded when absent
    #[serde(with = "serde_literal_opt", default)]
    pub iteration_timeout: Option<Duration>,

    #[serde(with = "serde_literal", default = "default_threshold_interval")]
    pub threshold_interval: Duration,

    /// Concurrency cap; higher stage targets are clamped with a warning
    #[serde(default = "default_max_vus")]
    pub max_vus: u32,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_setup_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_teardown_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_threshold_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_max_vus() -> u32 {
    10_000
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            ramp_policy: RampPolicy::default(),
            thresholds: BTreeMap::new(),
            setup_timeout: default_setup_timeout(),
            teardown_timeout: default_teardown_timeout(),
            iteration_timeout: None,
            threshold_interval: default_threshold_interval(),
            max_vus: default_max_vus(),
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load configuration from every source. Stages may still be empty; call
    /// [`RunConfig::validate`] once scenario defaults and CLI flags are applied.
    pub fn load() -> CoreResult<Self> {
        let mut builder = Config::builder();

        builder = Self::set_defaults(builder)?;

        if let Ok(config_path) = std::env::var("STAMPEDE_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder.add_source(File::with_name("./config/stampede").required(false));

        builder = builder.add_source(
            Environment::with_prefix("STAMPEDE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: RunConfig = builder.build()?.try_deserialize()?;
        config.validate_settings()?;

        Ok(config)
    }

    /// Load configuration from a specific file path, over the defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let config: RunConfig = Self::set_defaults(Config::builder())?
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        config.validate_settings()?;

        Ok(config)
    }

    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_default("ramp_policy", "plateau")?
            .set_default("setup_timeout", "5m")?
            .set_default("teardown_timeout", "1m")?
            .set_default("threshold_interval", "2s")?
            .set_default("max_vus", default_max_vus())?
            // HTTP
            .set_default("http.timeout", "60s")?
            .set_default("http.base_url", "http://localhost:8080")?
            .set_default("http.user_agent", default_user_agent())?
            // Logging
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")
    }

    /// Full validation, including the stage profile.
    pub fn validate(&self) -> CoreResult<()> {
        self.validate_settings()?;
        self.profile().map(|_| ())
    }

    /// Everything except the presence of stages.
    pub fn validate_settings(&self) -> CoreResult<()> {
        if let Some(index) = self.stages.iter().position(|s| s.duration.is_zero()) {
            return Err(CoreError::invalid_profile(format!(
                "stage {} has a zero duration",
                index + 1
            )));
        }

        if self.threshold_interval.is_zero() {
            return Err(config_message("threshold_interval must be > 0"));
        }

        if self.setup_timeout.is_zero() {
            return Err(config_message("setup_timeout must be > 0"));
        }

        if self.teardown_timeout.is_zero() {
            return Err(config_message("teardown_timeout must be > 0"));
        }

        if self.iteration_timeout.map(|t| t.is_zero()).unwrap_or(false) {
            return Err(config_message("iteration_timeout must be > 0 when set"));
        }

        if self.max_vus == 0 {
            return Err(config_message("max_vus must be > 0"));
        }

        if self.http.timeout.is_zero() {
            return Err(config_message("http.timeout must be > 0"));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(config_message(format!(
                "logging.level must be one of {:?}, got `{}`",
                LOG_LEVELS, self.logging.level
            )));
        }

        self.threshold_specs()?;

        Ok(())
    }

    /// Stage profile under the configured ramp policy.
    pub fn profile(&self) -> CoreResult<StageProfile> {
        StageProfile::new(self.stages.clone(), self.ramp_policy)
    }

    /// Parse every configured threshold.
    pub fn threshold_specs(&self) -> CoreResult<Vec<ThresholdSpec>> {
        let mut specs = Vec::new();
        for (selector, rules) in &self.thresholds {
            for rule in rules {
                specs.push(ThresholdSpec::parse(selector, rule.expression())?.abort_on_fail(rule.abort_on_fail()));
            }
        }
        Ok(specs)
    }

    /// Add a threshold rule for `selector`.
    pub fn add_threshold(&mut self, selector: impl Into<String>, rule: ThresholdRule) {
        self.thresholds.entry(selector.into()).or_default().push(rule);
    }
}

fn config_message(message: impl Into<String>) -> CoreError {
    CoreError::Config(ConfigError::Message(message.into()))
}

/// One threshold entry: `"p(95)<3000"` or `{threshold: "rate<0.1", abort_on_fail: true}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ThresholdRule {
    Expression(String),
    Detailed {
        threshold: String,
        #[serde(default)]
        abort_on_fail: bool,
    },
}

impl ThresholdRule {
    pub fn expression(&self) -> &str {
        match self {
            Self::Expression(expr) => expr,
            Self::Detailed { threshold, .. } => threshold,
        }
    }

    pub fn abort_on_fail(&self) -> bool {
        match self {
            Self::Expression(_) => false,
            Self::Detailed { abort_on_fail, .. } => *abort_on_fail,
        }
    }
}

impl From<&str> for ThresholdRule {
    fn from(expression: &str) -> Self {
        Self::Expression(expression.to_string())
    }
}

/// HTTP client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    /// Default per-call timeout
    #[serde(with = "serde_literal", default = "default_http_timeout")]
    pub timeout: Duration,

    /// Base URL of the system under test
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Seed-data service; when unset the base URL is used
    #[serde(default)]
    pub seed_url: Option<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_user_agent() -> String {
    concat!("stampede/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_http_timeout(),
            base_url: default_base_url(),
            seed_url: None,
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    /// Seed-data base URL, falling back to the system under test.
    pub fn seed_base_url(&self) -> &str {
        self.seed_url.as_deref().unwrap_or(&self.base_url)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}
