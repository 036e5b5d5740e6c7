//! Per-request query context.
//!
//! A [`QueryContext`] is built once per incoming query and never mutated in
//! place: the interpolator derives copies with [`QueryContext::with_sql`]
//! whenever a macro has to look at partially rewritten SQL.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use chmacro::context::{QueryContext, TimeRange};
//!
//! let range = TimeRange::from_millis(1415792726371, 1447328726371).unwrap();
//! let ctx = QueryContext::new("SELECT 1", range, Duration::from_secs(20));
//! let copy = ctx.with_sql("SELECT 2");
//!
//! assert_eq!(ctx.raw_sql, "SELECT 1");
//! assert_eq!(copy.raw_sql, "SELECT 2");
//! assert_eq!(copy.interval, ctx.interval);
//! ```

use std::{collections::HashMap, sync::LazyLock, time::Duration};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Microseconds from 0001-01-01T00:00:00Z to the Unix epoch.
const YEAR_ONE_OFFSET_MICROS: i64 = 62_135_596_800_000_000;

/// One `<decimal><unit>` part of a duration such as `1.5h` or `1h0.5m`.
static DECIMAL_DURATION_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d*)?|\.\d+)(ns|us|µs|ms|s|m|h)").expect("valid regex")
});

/// Dashboard time range, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to:   DateTime<Utc>
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from,
            to
        }
    }

    /// Build a range from Unix epoch milliseconds
    pub fn from_millis(from: i64, to: i64) -> Option<Self> {
        Some(Self {
            from: DateTime::from_timestamp_millis(from)?,
            to:   DateTime::from_timestamp_millis(to)?
        })
    }
}

/// Dashboard-supplied filter applied by `$__adHocFilter()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdHocFilter {
    pub key:      String,
    pub operator: String,
    #[serde(default)]
    pub value:    String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values:   Vec<String>
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QueryMeta {
    #[serde(default)]
    pub timezone: Option<String>
}

/// Query JSON model as sent by the dashboard host.
///
/// Time range and interval are not part of the model; they travel alongside
/// it in the host request.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryModel {
    #[serde(default)]
    pub raw_sql:        String,
    #[serde(default)]
    pub format:         i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round:          Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query_settings: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters:        Vec<AdHocFilter>,
    #[serde(default)]
    pub meta:           QueryMeta
}

/// Everything a macro function may consult while expanding.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub raw_sql:        String,
    pub time_range:     TimeRange,
    pub interval:       Duration,
    pub round:          Option<String>,
    pub filters:        Vec<AdHocFilter>,
    pub query_settings: HashMap<String, serde_json::Value>,
    pub format:         i64,
    pub timezone:       Option<String>
}

impl QueryContext {
    pub fn new(raw_sql: impl Into<String>, time_range: TimeRange, interval: Duration) -> Self {
        Self {
            raw_sql: raw_sql.into(),
            time_range,
            interval,
            round: None,
            filters: Vec::new(),
            query_settings: HashMap::new(),
            format: 0,
            timezone: None
        }
    }

    pub fn from_model(model: QueryModel, time_range: TimeRange, interval: Duration) -> Self {
        Self {
            raw_sql: model.raw_sql,
            time_range,
            interval,
            round: model.round,
            filters: model.filters,
            query_settings: model.query_settings,
            format: model.format,
            timezone: model.meta.timezone
        }
    }

    #[must_use]
    pub fn with_filters(mut self, filters: Vec<AdHocFilter>) -> Self {
        self.filters = filters;
        self
    }

    #[must_use]
    pub fn with_round(mut self, round: impl Into<String>) -> Self {
        self.round = Some(round.into());
        self
    }

    /// Copy of this context carrying different SQL text
    pub fn with_sql(&self, raw_sql: impl Into<String>) -> Self {
        Self {
            raw_sql: raw_sql.into(),
            ..self.clone()
        }
    }

    /// Copy of this context with the time range rounded per `round`.
    ///
    /// Returns `None` when no rounding applies.
    pub fn rounded(&self) -> Option<Self> {
        let round = self.round.as_deref()?;
        if round.is_empty() || round == "0" {
            return None;
        }
        Some(Self {
            time_range: round_time_range(self.time_range, round),
            ..self.clone()
        })
    }
}

/// Round both ends of `range` to the nearest multiple of `interval`.
///
/// Invalid intervals and intervals shorter than one second leave the range
/// untouched.
pub fn round_time_range(range: TimeRange, interval: &str) -> TimeRange {
    let step = match parse_round_spec(interval) {
        Some(step) if step >= Duration::from_secs(1) => step,
        _ => {
            warn!(
                interval,
                "Using default time range, provided round interval is invalid"
            );
            return range;
        }
    };
    let (Some(from), Some(to)) = (round_to(range.from, step), round_to(range.to, step)) else {
        warn!(interval, "Using default time range, rounding overflowed");
        return range;
    };
    debug!(
        original_from = %range.from,
        original_to = %range.to,
        %from,
        %to,
        interval,
        "Time range rounded"
    );
    TimeRange {
        from,
        to
    }
}

/// Parse a rounding spec: humantime syntax, or decimal parts such as `1.5h`.
fn parse_round_spec(spec: &str) -> Option<Duration> {
    if let Ok(step) = humantime::parse_duration(spec) {
        return Some(step);
    }
    let mut consumed = 0;
    let mut seconds = 0.0;
    for caps in DECIMAL_DURATION_PART.captures_iter(spec) {
        let part = caps.get(0)?;
        if part.start() != consumed {
            return None;
        }
        consumed = part.end();
        let value: f64 = caps[1].parse().ok()?;
        let unit = match &caps[2] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            _ => 3600.0
        };
        seconds += value * unit;
    }
    if consumed == 0 || consumed != spec.len() {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

/// Half-to-even rounding on the microsecond timeline since 0001-01-01 UTC.
///
/// Steps that divide a day give the same result as counting from the Unix
/// epoch; others such as `7m` depend on the origin.
fn round_to(time: DateTime<Utc>, step: Duration) -> Option<DateTime<Utc>> {
    let step = i64::try_from(step.as_micros()).ok()?;
    let micros = time.timestamp_micros().checked_add(YEAR_ONE_OFFSET_MICROS)?;
    let mut quotient = micros.div_euclid(step);
    let doubled = micros.rem_euclid(step).checked_mul(2)?;
    if doubled > step || (doubled == step && quotient % 2 != 0) {
        quotient += 1;
    }
    let rounded = quotient.checked_mul(step)?.checked_sub(YEAR_ONE_OFFSET_MICROS)?;
    DateTime::from_timestamp_micros(rounded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_range() -> TimeRange {
        TimeRange::new(
            DateTime::from_timestamp(1740674812, 123456789).unwrap(),
            DateTime::from_timestamp(1740678412, 123456789).unwrap()
        )
    }

    #[test]
    fn test_round_to_second() {
        let range = round_time_range(default_range(), "1s");
        assert_eq!(range.to.timestamp(), 1740678412);
        assert_eq!(range.to.timestamp_subsec_nanos(), 0);
        assert_eq!(range.from.timestamp(), 1740674812);
    }

    #[test]
    fn test_round_to_minute() {
        let range = round_time_range(default_range(), "1m");
        assert_eq!(range.to.timestamp(), 1740678420);
        assert_eq!(range.from.timestamp(), 1740674820);
    }

    #[test]
    fn test_round_to_hour() {
        let range = round_time_range(default_range(), "1h");
        assert_eq!(range.to.timestamp(), 1740679200);
        assert_eq!(range.from.timestamp(), 1740675600);
    }

    #[test]
    fn test_round_counts_from_year_one() {
        let range = round_time_range(default_range(), "7m");
        assert_eq!(range.from.timestamp(), 1740674820);
    }

    #[test]
    fn test_round_decimal_spec() {
        assert_eq!(parse_round_spec("1.5h"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_round_spec(".5m"), Some(Duration::from_secs(30)));
        assert_eq!(parse_round_spec("1h0.5m"), Some(Duration::from_secs(3630)));
        assert_eq!(parse_round_spec("1.5x"), None);
        assert_eq!(parse_round_spec("1.5h junk"), None);
        let range = round_time_range(default_range(), "1.5h");
        assert_eq!(range.from.timestamp(), 1740673800);
    }

    #[test]
    fn test_round_invalid_keeps_range() {
        assert_eq!(round_time_range(default_range(), "not valid duration"), default_range());
    }

    #[test]
    fn test_round_sub_second_keeps_range() {
        assert_eq!(round_time_range(default_range(), "500ms"), default_range());
    }

    #[test]
    fn test_round_half_to_even() {
        let step = Duration::from_secs(2);
        let odd_tie = DateTime::from_timestamp(3, 0).unwrap();
        let even_tie = DateTime::from_timestamp(5, 0).unwrap();
        assert_eq!(round_to(odd_tie, step).unwrap().timestamp(), 4);
        assert_eq!(round_to(even_tie, step).unwrap().timestamp(), 4);
    }

    #[test]
    fn test_rounded_skips_sentinels() {
        let ctx = QueryContext::new("SELECT 1", default_range(), Duration::ZERO);
        assert!(ctx.rounded().is_none());
        assert!(ctx.clone().with_round("0").rounded().is_none());
        assert!(ctx.clone().with_round("").rounded().is_none());
        let rounded = ctx.with_round("1m").rounded().unwrap();
        assert_eq!(rounded.time_range.to.timestamp(), 1740678420);
    }

    #[test]
    fn test_query_model_deserialize() {
        let json = r#"{
            "rawSql": "SELECT $__fromTime",
            "format": 1,
            "round": "1m",
            "filters": [{"key": "host", "operator": "=|", "values": ["a", "b"]}],
            "meta": {"timezone": "UTC"}
        }"#;
        let model: QueryModel = serde_json::from_str(json).unwrap();
        assert_eq!(model.raw_sql, "SELECT $__fromTime");
        assert_eq!(model.round.as_deref(), Some("1m"));
        assert_eq!(model.filters[0].values, vec!["a", "b"]);
        assert!(model.filters[0].value.is_empty());
        assert_eq!(model.meta.timezone.as_deref(), Some("UTC"));
    }
}
