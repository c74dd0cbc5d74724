//! Metric samples and series keys

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Tag set attached to a sample. Ordered so equal sets compare and hash alike.
pub type Tags = BTreeMap<String, String>;

/// Names of the metrics the engine and HTTP client emit on their own.
pub mod names {
    /// Counter: HTTP requests issued
    pub const HTTP_REQS: &str = "http_reqs";
    /// Trend: HTTP request duration in milliseconds
    pub const HTTP_REQ_DURATION: &str = "http_req_duration";
    /// Rate: share of HTTP requests that failed
    pub const HTTP_REQ_FAILED: &str = "http_req_failed";
    /// Counter: iterations started (executed or skipped)
    pub const ITERATIONS: &str = "iterations";
    /// Trend: iteration wall time in milliseconds
    pub const ITERATION_DURATION: &str = "iteration_duration";
    /// Rate: share of passed checks
    pub const CHECKS: &str = "checks";
    /// Gauge: active VUs
    pub const VUS: &str = "vus";
    /// Gauge: highest VU count the profile asks for
    pub const VUS_MAX: &str = "vus_max";
}

/// Aggregation family of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonic sum (requests, iterations)
    Counter,
    /// Last observed value (active VUs)
    Gauge,
    /// Share of non-zero samples (failures, checks)
    Rate,
    /// Distribution with percentiles (durations)
    Trend,
}

/// One measurement emitted by a VU, the HTTP client or the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    #[serde(default)]
    pub tags: Tags,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, kind: MetricKind, value: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            tags: Tags::new(),
        }
    }

    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricKind::Counter, value)
    }

    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricKind::Gauge, value)
    }

    /// Rate samples are booleans: `true` counts toward the rate.
    pub fn rate(name: impl Into<String>, hit: bool) -> Self {
        Self::new(name, MetricKind::Rate, if hit { 1.0 } else { 0.0 })
    }

    pub fn trend(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricKind::Trend, value)
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Merge `tags` under the sample's own tags (sample tags win).
    pub fn with_tags(mut self, tags: &Tags) -> Self {
        for (key, value) in tags {
            self.tags.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self
    }
}

/// Identity of one aggregated series: metric name plus exact tag set.
///
/// Displayed and parsed in selector syntax: `http_req_duration{name:Signup,status:200}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub name: String,
    pub tags: Tags,
}

impl MetricKey {
    /// The roll-up series every tagged sample also feeds.
    pub fn untagged(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Tags::new(),
        }
    }

    pub fn new(name: impl Into<String>, tags: Tags) -> Self {
        Self {
            name: name.into(),
            tags,
        }
    }

    pub fn is_rollup(&self) -> bool {
        self.tags.is_empty()
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tags.is_empty() {
            return write!(f, "{}", self.name);
        }
        let tags: Vec<String> = self.tags.iter().map(|(k, v)| format!("{}:{}", k, v)).collect();
        write!(f, "{}{{{}}}", self.name, tags.join(","))
    }
}

impl FromStr for MetricKey {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let s = s.trim();
        let Some(open) = s.find('{') else {
            if s.is_empty() {
                return Err(CoreError::invalid_threshold(s, "empty metric name"));
            }
            return Ok(Self::untagged(s));
        };

        let name = s[..open].trim();
        let body = s[open + 1..]
            .strip_suffix('}')
            .ok_or_else(|| CoreError::invalid_threshold(s, "unterminated tag selector"))?;
        if name.is_empty() {
            return Err(CoreError::invalid_threshold(s, "empty metric name"));
        }

        let mut tags = Tags::new();
        for pair in body.split(',').filter(|p| !p.trim().is_empty()) {
            let (key, value) = pair
                .split_once(':')
                .ok_or_else(|| CoreError::invalid_threshold(s, format!("tag `{}` is not key:value", pair)))?;
            tags.insert(key.trim().to_string(), value.trim().to_string());
        }

        Ok(Self::new(name, tags))
    }
}

impl Serialize for MetricKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MetricKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_and_parse() {
        let key: MetricKey = "http_req_duration{name:Signup,status:200}".parse().unwrap();
        assert_eq!(key.name, "http_req_duration");
        assert_eq!(key.tags.get("name").map(String::as_str), Some("Signup"));
        assert_eq!(key.to_string(), "http_req_duration{name:Signup,status:200}");

        let plain: MetricKey = "errors".parse().unwrap();
        assert!(plain.is_rollup());
        assert_eq!(plain.to_string(), "errors");
    }

    #[test]
    fn test_key_parse_errors() {
        assert!("".parse::<MetricKey>().is_err());
        assert!("{name:x}".parse::<MetricKey>().is_err());
        assert!("m{name:x".parse::<MetricKey>().is_err());
        assert!("m{name}".parse::<MetricKey>().is_err());
    }

    #[test]
    fn test_sample_tag_merge_keeps_own_tags() {
        let mut defaults = Tags::new();
        defaults.insert("name".into(), "Default".into());
        defaults.insert("vu".into(), "3".into());

        let sample = MetricSample::rate("checks", true)
            .with_tag("name", "Login")
            .with_tags(&defaults);

        assert_eq!(sample.tags["name"], "Login");
        assert_eq!(sample.tags["vu"], "3");
        assert_eq!(sample.value, 1.0);
    }
}
