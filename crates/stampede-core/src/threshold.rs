//! Pass/fail thresholds over aggregated metrics
//!
//! Expressions use the familiar `<aggregation><operator><number>` form:
//! `p(95)<3000`, `rate<0.1`, `max<5000`, `avg<=200`, `count>10`.

use crate::aggregate::{AggregateMetric, Aggregation};
use crate::collector::MetricsSnapshot;
use crate::error::{CoreError, CoreResult};
use crate::sample::MetricKey;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Comparison operator of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    fn holds(self, left: f64, right: f64) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Gt => left > right,
            Self::Ge => left >= right,
            Self::Eq => left == right,
            Self::Ne => left != right,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

/// Parsed `<aggregation><operator><number>` expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpression {
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub bound: f64,
}

impl fmt::Display for ThresholdExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.aggregation, self.comparison.symbol(), self.bound)
    }
}

impl FromStr for ThresholdExpression {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let text: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        let op_start = text
            .find(|c| matches!(c, '<' | '>' | '=' | '!'))
            .ok_or_else(|| CoreError::invalid_threshold(s, "missing comparison operator"))?;

        let (lhs, rest) = text.split_at(op_start);
        let (comparison, number) = if let Some(n) = rest.strip_prefix("<=") {
            (Comparison::Le, n)
        } else if let Some(n) = rest.strip_prefix(">=") {
            (Comparison::Ge, n)
        } else if let Some(n) = rest.strip_prefix("==") {
            (Comparison::Eq, n)
        } else if let Some(n) = rest.strip_prefix("!=") {
            (Comparison::Ne, n)
        } else if let Some(n) = rest.strip_prefix('<') {
            (Comparison::Lt, n)
        } else if let Some(n) = rest.strip_prefix('>') {
            (Comparison::Gt, n)
        } else {
            return Err(CoreError::invalid_threshold(s, "unknown comparison operator"));
        };

        let aggregation = parse_aggregation(lhs).ok_or_else(|| {
            CoreError::invalid_threshold(s, format!("unknown aggregation `{}`", lhs))
        })?;
        let bound: f64 = number
            .parse()
            .map_err(|_| CoreError::invalid_threshold(s, format!("`{}` is not a number", number)))?;

        Ok(Self {
            aggregation,
            comparison,
            bound,
        })
    }
}

fn parse_aggregation(text: &str) -> Option<Aggregation> {
    match text {
        "count" => Some(Aggregation::Count),
        "rate" => Some(Aggregation::Rate),
        "avg" => Some(Aggregation::Avg),
        "min" => Some(Aggregation::Min),
        "max" => Some(Aggregation::Max),
        "med" => Some(Aggregation::Med),
        "value" => Some(Aggregation::Value),
        _ => {
            let inner = text.strip_prefix("p(")?.strip_suffix(')')?;
            let p: f64 = inner.parse().ok()?;
            (0.0..=100.0).contains(&p).then_some(Aggregation::Percentile(p))
        }
    }
}

/// Boolean rule over one aggregate.
#[derive(Clone)]
pub enum ThresholdPredicate {
    Expression(ThresholdExpression),

    /// Arbitrary predicate supplied in code.
    Custom {
        description: String,
        check: Arc<dyn Fn(&AggregateMetric) -> bool + Send + Sync>,
    },
}

impl fmt::Debug for ThresholdPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expression(expr) => write!(f, "Expression({})", expr),
            Self::Custom { description, .. } => write!(f, "Custom({})", description),
        }
    }
}

impl fmt::Display for ThresholdPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expression(expr) => write!(f, "{}", expr),
            Self::Custom { description, .. } => write!(f, "{}", description),
        }
    }
}

/// Threshold attached to a metric selector.
#[derive(Debug, Clone)]
pub struct ThresholdSpec {
    pub selector: MetricKey,
    pub predicate: ThresholdPredicate,
    pub abort_on_fail: bool,
}

impl ThresholdSpec {
    /// Parse `selector` and `expression`, e.g. (`"http_req_duration{name:Signup}"`, `"p(95)<3000"`).
    pub fn parse(selector: &str, expression: &str) -> CoreResult<Self> {
        Ok(Self {
            selector: selector.parse()?,
            predicate: ThresholdPredicate::Expression(expression.parse()?),
            abort_on_fail: false,
        })
    }

    pub fn custom(
        selector: &str,
        description: impl Into<String>,
        check: impl Fn(&AggregateMetric) -> bool + Send + Sync + 'static,
    ) -> CoreResult<Self> {
        Ok(Self {
            selector: selector.parse()?,
            predicate: ThresholdPredicate::Custom {
                description: description.into(),
                check: Arc::new(check),
            },
            abort_on_fail: false,
        })
    }

    pub fn abort_on_fail(mut self, abort: bool) -> Self {
        self.abort_on_fail = abort;
        self
    }

    /// Evaluate against a snapshot. A selector with no samples passes.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> ThresholdOutcome {
        let aggregate = snapshot.select(&self.selector);
        let (current_value, passed) = match (&self.predicate, aggregate) {
            (_, None) => (None, true),
            (ThresholdPredicate::Expression(expr), Some(aggregate)) => {
                match aggregate.value(expr.aggregation, snapshot.elapsed) {
                    Some(value) => (Some(value), expr.comparison.holds(value, expr.bound)),
                    // Aggregation does not apply to this metric kind
                    None => (None, false),
                }
            }
            (ThresholdPredicate::Custom { check, .. }, Some(aggregate)) => (None, check(&aggregate)),
        };

        ThresholdOutcome {
            metric: self.selector.to_string(),
            expression: self.predicate.to_string(),
            current_value,
            passed,
            abort_on_fail: self.abort_on_fail,
        }
    }
}

/// Result of evaluating one threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expression: String,
    pub current_value: Option<f64>,
    pub passed: bool,
    pub abort_on_fail: bool,
}

impl fmt::Display for ThresholdOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self
            .current_value
            .map(|v| format!("{:.4}", v))
            .unwrap_or_else(|| "n/a".to_string());
        write!(
            f,
            "{} {} {} (current: {})",
            if self.passed { "✓" } else { "✗" },
            self.metric,
            self.expression,
            value
        )
    }
}

/// Outcomes of one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThresholdEvaluation {
    pub outcomes: Vec<ThresholdOutcome>,
}

impl ThresholdEvaluation {
    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ThresholdOutcome> {
        self.outcomes.iter().filter(|o| !o.passed)
    }

    /// First failing threshold configured to abort the run.
    pub fn abort_trigger(&self) -> Option<&ThresholdOutcome> {
        self.outcomes.iter().find(|o| !o.passed && o.abort_on_fail)
    }
}

/// Evaluates a fixed set of thresholds. Pure over the snapshot it is given.
#[derive(Debug, Clone, Default)]
pub struct ThresholdEvaluator {
    specs: Vec<ThresholdSpec>,
}

impl ThresholdEvaluator {
    pub fn new(specs: Vec<ThresholdSpec>) -> Self {
        Self { specs }
    }

    pub fn specs(&self) -> &[ThresholdSpec] {
        &self.specs
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> ThresholdEvaluation {
        ThresholdEvaluation {
            outcomes: self.specs.iter().map(|spec| spec.evaluate(snapshot)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MetricCollector;
    use crate::sample::{names, MetricSample};

    #[test]
    fn test_parse_expressions() {
        let expr: ThresholdExpression = "p(95)<3000".parse().unwrap();
        assert_eq!(expr.aggregation, Aggregation::Percentile(95.0));
        assert_eq!(expr.comparison, Comparison::Lt);
        assert_eq!(expr.bound, 3000.0);

        let expr: ThresholdExpression = "rate <= 0.1".parse().unwrap();
        assert_eq!(expr.aggregation, Aggregation::Rate);
        assert_eq!(expr.comparison, Comparison::Le);

        assert!("p(95)3000".parse::<ThresholdExpression>().is_err());
        assert!("p95<3000".parse::<ThresholdExpression>().is_err());
        assert!("p(150)<3000".parse::<ThresholdExpression>().is_err());
        assert!("rate<abc".parse::<ThresholdExpression>().is_err());
    }

    #[test]
    fn test_display_round_trip() {
        let expr: ThresholdExpression = "max<5000".parse().unwrap();
        assert_eq!(expr.to_string(), "max<5000");
        let expr: ThresholdExpression = "p(99.9)>=1.5".parse().unwrap();
        assert_eq!(expr.to_string(), "p(99.9)>=1.5");
    }

    #[test]
    fn test_evaluate_pass_and_fail() {
        let collector = MetricCollector::new();
        for i in 0..10 {
            collector.record(MetricSample::rate(names::HTTP_REQ_FAILED, i < 2));
            collector.record(MetricSample::trend(names::HTTP_REQ_DURATION, 100.0 * (i + 1) as f64));
        }
        let snapshot = collector.snapshot();

        let evaluator = ThresholdEvaluator::new(vec![
            ThresholdSpec::parse(names::HTTP_REQ_FAILED, "rate<0.1").unwrap(),
            ThresholdSpec::parse(names::HTTP_REQ_DURATION, "max<5000").unwrap(),
        ]);
        let evaluation = evaluator.evaluate(&snapshot);

        assert!(!evaluation.outcomes[0].passed);
        assert_eq!(evaluation.outcomes[0].current_value, Some(0.2));
        assert!(evaluation.outcomes[1].passed);
        assert!(!evaluation.all_passed());
        assert!(evaluation.abort_trigger().is_none());
    }

    #[test]
    fn test_percentile_threshold_fails_on_slow_requests() {
        let collector = MetricCollector::new();
        for _ in 0..100 {
            collector.record(MetricSample::trend(names::HTTP_REQ_DURATION, 10_000.0));
        }

        let outcome = ThresholdSpec::parse(names::HTTP_REQ_DURATION, "p(95)<3000")
            .unwrap()
            .evaluate(&collector.snapshot());

        assert!(!outcome.passed);
        let value = outcome.current_value.unwrap();
        assert!((value - 10_000.0).abs() <= 10.0, "p(95) = {}", value);
    }

    #[test]
    fn test_abort_trigger_only_for_abort_specs() {
        let collector = MetricCollector::new();
        collector.record(MetricSample::rate("errors", true));
        let snapshot = collector.snapshot();

        let evaluator = ThresholdEvaluator::new(vec![
            ThresholdSpec::parse("errors", "rate<0.1").unwrap().abort_on_fail(true),
        ]);
        let evaluation = evaluator.evaluate(&snapshot);
        let trigger = evaluation.abort_trigger().unwrap();
        assert_eq!(trigger.metric, "errors");
    }

    #[test]
    fn test_missing_metric_passes() {
        let snapshot = MetricCollector::new().snapshot();
        let outcome = ThresholdSpec::parse("errors", "rate<0.1").unwrap().evaluate(&snapshot);
        assert!(outcome.passed);
        assert!(outcome.current_value.is_none());
    }

    #[test]
    fn test_inapplicable_aggregation_fails() {
        let collector = MetricCollector::new();
        collector.record(MetricSample::rate("errors", false));
        let outcome = ThresholdSpec::parse("errors", "p(95)<1")
            .unwrap()
            .evaluate(&collector.snapshot());
        assert!(!outcome.passed);
    }

    #[test]
    fn test_custom_predicate() {
        let collector = MetricCollector::new();
        collector.record(MetricSample::counter(names::ITERATIONS, 1.0));
        let spec = ThresholdSpec::custom(names::ITERATIONS, "at least one iteration", |agg| {
            agg.count() >= 1
        })
        .unwrap();
        let outcome = spec.evaluate(&collector.snapshot());
        assert!(outcome.passed);
        assert_eq!(outcome.expression, "at least one iteration");
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let collector = MetricCollector::new();
        for i in 0..100 {
            collector.record(MetricSample::trend(names::HTTP_REQ_DURATION, i as f64));
        }
        let snapshot = collector.snapshot();
        let evaluator = ThresholdEvaluator::new(vec![
            ThresholdSpec::parse(names::HTTP_REQ_DURATION, "p(95)<90").unwrap(),
            ThresholdSpec::parse(names::HTTP_REQ_DURATION, "avg<60").unwrap(),
        ]);

        assert_eq!(evaluator.evaluate(&snapshot), evaluator.evaluate(&snapshot));
    }
}
