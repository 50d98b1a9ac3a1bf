//! Timestamp normalization.
//!
//! Both stores hand back timestamps in whatever shape their client produced:
//! epoch seconds, epoch millis, ISO-8601 strings, SQL datetimes or the replica's
//! native timestamp objects. Everything is folded into epoch millis here, once,
//! when a raw document becomes a [`SyncRecord`](super::types::SyncRecord).

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// Numbers below this are epoch seconds, at or above it epoch millis.
pub const MILLIS_THRESHOLD: f64 = 1_000_000_000_000.0;

/// The shapes a stored timestamp can take.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTimestamp<'a> {
    Absent,
    Number(f64),
    Text(&'a str),
    /// Native store object exposing a `seconds` field.
    Seconds { seconds: i64, nanos: i64 },
    /// Native store object exposing its own conversion.
    Native(DateTime<Utc>),
}

impl<'a> RawTimestamp<'a> {
    pub fn from_value(value: Option<&'a Value>) -> Self {
        match value {
            None | Some(Value::Null) => RawTimestamp::Absent,
            Some(Value::Number(n)) => n.as_f64().map(RawTimestamp::Number).unwrap_or(RawTimestamp::Absent),
            Some(Value::String(s)) => RawTimestamp::Text(s),
            Some(Value::Object(obj)) => {
                if let Some(Value::String(s)) = obj.get("timestampValue") {
                    return parse_text(s).map(RawTimestamp::Native).unwrap_or(RawTimestamp::Absent);
                }
                let seconds = obj.get("seconds").or_else(|| obj.get("_seconds")).and_then(Value::as_i64);
                let nanos = obj
                    .get("nanoseconds")
                    .or_else(|| obj.get("_nanoseconds"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                match seconds {
                    Some(seconds) => RawTimestamp::Seconds { seconds, nanos },
                    None => RawTimestamp::Absent,
                }
            }
            Some(_) => RawTimestamp::Absent,
        }
    }

    /// Epoch millis, never negative; 0 for anything unusable.
    pub fn to_epoch_millis(&self) -> i64 {
        let millis = match self {
            RawTimestamp::Absent => 0,
            RawTimestamp::Number(n) => {
                if !n.is_finite() {
                    0
                } else if *n < MILLIS_THRESHOLD {
                    (n * 1000.0) as i64
                } else {
                    *n as i64
                }
            }
            RawTimestamp::Text(s) => parse_text(s).map(|dt| dt.timestamp_millis()).unwrap_or(0),
            RawTimestamp::Seconds { seconds, nanos } => {
                seconds.saturating_mul(1000).saturating_add(nanos / 1_000_000)
            }
            RawTimestamp::Native(dt) => dt.timestamp_millis(),
        };
        millis.max(0)
    }
}

/// Normalize an optional JSON timestamp to epoch millis.
pub fn normalize(value: Option<&Value>) -> i64 {
    RawTimestamp::from_value(value).to_epoch_millis()
}

/// The timestamp written on every replica write.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Format epoch millis the way replica writes stamp them. `None` for 0 (unknown).
pub fn millis_to_iso(millis: i64) -> Option<String> {
    if millis <= 0 {
        return None;
    }
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}

fn parse_text(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // SQL / Laravel style datetimes without an offset are read as UTC.
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
