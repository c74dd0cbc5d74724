//! Human-readable duration literals (`"500ms"`, `"30s"`, `"2m"`, `"1h"`, `"1m30s"`).
//!
//! Run configuration files express every duration this way, so the module also
//! provides serde adapters for `Duration` and `Option<Duration>` fields.

use crate::error::{CoreError, CoreResult};
use std::time::Duration;

/// Parse a duration literal.
///
/// Accepts a sequence of `<number><unit>` groups where unit is one of `ms`,
/// `s`, `m`, `h`. A bare integer is read as seconds. Fractional numbers are
/// allowed (`"0.5s"`).
pub fn parse_duration(input: &str) -> CoreResult<Duration> {
    let text = input.trim();
    if text.is_empty() {
        return Err(CoreError::InvalidDuration(input.to_string()));
    }

    if let Ok(secs) = text.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| CoreError::InvalidDuration(input.to_string()))?;
        if number_len == 0 {
            return Err(CoreError::InvalidDuration(input.to_string()));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| CoreError::InvalidDuration(input.to_string()))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let multiplier = match &rest[..unit_len] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(CoreError::InvalidDuration(input.to_string())),
        };
        rest = &rest[unit_len..];

        total += Duration::from_secs_f64(value * multiplier);
    }

    Ok(total)
}

/// Render a duration in the same literal syntax [`parse_duration`] accepts.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        return "0s".to_string();
    }
    if millis % 1000 != 0 {
        return format!("{}ms", millis);
    }

    let mut secs = duration.as_secs();
    let mut out = String::new();
    let hours = secs / 3600;
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
        secs %= 3600;
    }
    let minutes = secs / 60;
    if minutes > 0 {
        out.push_str(&format!("{}m", minutes));
        secs %= 60;
    }
    if secs > 0 {
        out.push_str(&format!("{}s", secs));
    }
    out
}

/// Serde adapter for `Duration` fields written as literals.
pub mod serde_literal {
    use super::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = DurationLiteral::deserialize(deserializer)?;
        raw.into_duration().map_err(serde::de::Error::custom)
    }

    /// Files may carry either a string literal or a plain number of seconds.
    #[derive(Deserialize)]
    #[serde(untagged)]
    pub(super) enum DurationLiteral {
        Text(String),
        Seconds(u64),
    }

    impl DurationLiteral {
        pub(super) fn into_duration(self) -> Result<Duration, String> {
            match self {
                Self::Text(text) => parse_duration(&text).map_err(|e| e.to_string()),
                Self::Seconds(secs) => Ok(Duration::from_secs(secs)),
            }
        }
    }
}

/// Serde adapter for `Option<Duration>` fields written as literals.
pub mod serde_literal_opt {
    use super::format_duration;
    use super::serde_literal::DurationLiteral;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&format_duration(*duration)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let raw = Option::<DurationLiteral>::deserialize(deserializer)?;
        raw.map(|literal| literal.into_duration().map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn test_parse_compound_and_fractional() {
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("0.5s").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("10").is_ok());
    }

    #[test]
    fn test_format_round_trips() {
        for literal in ["500ms", "30s", "2m", "1h", "1m30s", "2h5m"] {
            let parsed = parse_duration(literal).unwrap();
            assert_eq!(format_duration(parsed), literal);
        }
    }
}
