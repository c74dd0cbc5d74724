//! Core domain types for the Stampede load generator.

pub mod aggregate;
pub mod collector;
pub mod config;
pub mod duration;
pub mod error;
pub mod metrics;
pub mod sample;
pub mod stage;
pub mod threshold;

pub use aggregate::{AggregateMetric, AggregateSummary, Aggregation};
pub use collector::{MetricCollector, MetricSink, MetricsSnapshot, SnapshotReport};
pub use config::{HttpConfig, LogFormat, LoggingConfig, RunConfig, ThresholdRule};
pub use duration::{format_duration, parse_duration};
pub use error::{CoreError, CoreResult};
pub use sample::{names, MetricKey, MetricKind, MetricSample, Tags};
pub use stage::{RampPolicy, Stage, StagePosition, StageProfile};
pub use threshold::{
    Comparison, ThresholdEvaluation, ThresholdEvaluator, ThresholdExpression, ThresholdOutcome,
    ThresholdPredicate, ThresholdSpec,
};
