//! Coercion helpers shared by the deriver, the provider and the store.
//!
//! Provider payloads are loosely typed: numbers sometimes arrive as strings and
//! dates in several ISO-8601 shapes. Everything here is lenient and returns
//! `None` instead of failing, leaving the data contract to decide validity.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// Strip NUL bytes (0x00), which PostgreSQL rejects in text columns
pub fn sanitize_string(s: &str) -> String {
    s.replace('\0', "")
}

/// JSON number or numeric string to `f64`. Anything else, including a
/// string spelling of NaN, is missing.
pub fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| !v.is_nan()),
        _ => None,
    }
}

/// JSON integer (or integral float / numeric string) to `i32`.
pub fn value_to_i32(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .and_then(|v| i32::try_from(v).ok()),
        Value::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    }
}

/// JSON string (or number, rendered) to `String`. Null and containers are missing.
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse an ISO-8601 timestamp, a naive date-time (taken as UTC) or a bare date.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Unix milliseconds to a UTC timestamp; `None` when out of chrono's range.
pub fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_sanitize_string_removes_nul() {
        assert_eq!(sanitize_string("bit\0coin"), "bitcoin");
    }

    #[test]
    fn test_value_to_f64() {
        assert_eq!(value_to_f64(&json!(1.5)), Some(1.5));
        assert_eq!(value_to_f64(&json!(" 42 ")), Some(42.0));
        assert_eq!(value_to_f64(&json!("NaN")), None);
        assert_eq!(value_to_f64(&json!(null)), None);
        assert_eq!(value_to_f64(&json!(true)), None);
    }

    #[test]
    fn test_value_to_i32() {
        assert_eq!(value_to_i32(&json!(7)), Some(7));
        assert_eq!(value_to_i32(&json!(7.0)), Some(7));
        assert_eq!(value_to_i32(&json!(7.5)), None);
        assert_eq!(value_to_i32(&json!(10_000_000_000i64)), None);
    }

    #[test]
    fn test_parse_timestamp_shapes() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap();
        assert_eq!(parse_timestamp(&json!("2024-01-31T12:00:00.000Z")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-01-31T12:00:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-01-31 12:00:00")), Some(expected));
        assert_eq!(
            parse_timestamp(&json!("2024-01-31")),
            Some(Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_timestamp(&json!(1706702400)), None);
    }

    #[test]
    fn test_millis_to_datetime() {
        assert_eq!(
            millis_to_datetime(1_706_702_400_000),
            Some(Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap())
        );
        assert_eq!(millis_to_datetime(i64::MAX), None);
    }
}
