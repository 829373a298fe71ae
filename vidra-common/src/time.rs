//! Activity-window time logic
//!
//! Promotions and A/B tests are active inside `[startDate, endDate + 1 day)`,
//! evaluated against the current time shifted by a fixed +1 hour reference
//! offset. The offset approximates the server's reference timezone and is
//! preserved exactly as the product defined it.

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Fixed reference offset applied to "now" before window comparison
pub fn reference_offset() -> Duration {
    Duration::hours(1)
}

/// Whether `now` (shifted by the reference offset) falls inside the window
///
/// The end date is inclusive: the whole end day counts. Missing or
/// malformed dates make the window inactive.
pub fn window_contains(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    let (Some(start), Some(end)) = (start, end) else {
        return false;
    };

    let shifted = now + reference_offset();
    let end_inclusive = end + Duration::days(1);

    shifted >= start && shifted < end_inclusive
}

/// Lenient parse of a wire date string
///
/// Accepts RFC 3339 timestamps and bare `YYYY-MM-DD` dates (midnight UTC).
/// Anything else yields `None` rather than an error; an unparseable date
/// simply deactivates the window it belongs to.
pub fn parse_wire_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = raw.parse::<NaiveDate>() {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

/// Serde adapter for optional wire dates: lenient on read, RFC 3339 on write
pub mod wire_date {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse_wire_datetime))
    }

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
    }

    #[test]
    fn window_requires_both_dates() {
        let now = utc(2024, 5, 1, 12);
        assert!(!window_contains(None, Some(now), now));
        assert!(!window_contains(Some(now), None, now));
        assert!(!window_contains(None, None, now));
    }

    #[test]
    fn window_end_day_is_inclusive() {
        let start = utc(2024, 5, 1, 0);
        let end = utc(2024, 5, 2, 0);
        // 23:00 UTC on the end day is 00:00 on May 3 after the +1h shift,
        // exactly the exclusive bound of end + 1 day.
        assert!(window_contains(Some(start), Some(end), utc(2024, 5, 2, 22)));
        assert!(!window_contains(Some(start), Some(end), utc(2024, 5, 2, 23)));
    }

    #[test]
    fn window_start_respects_reference_offset() {
        let start = utc(2024, 5, 1, 0);
        let end = utc(2024, 5, 2, 0);
        // 23:00 UTC the day before shifts to midnight on the start day.
        assert!(window_contains(Some(start), Some(end), utc(2024, 4, 30, 23)));
        assert!(!window_contains(Some(start), Some(end), utc(2024, 4, 30, 22)));
    }

    #[test]
    fn parses_rfc3339_and_bare_dates() {
        assert_eq!(
            parse_wire_datetime("2024-05-01T10:30:00Z"),
            Some(utc(2024, 5, 1, 10) + Duration::minutes(30))
        );
        assert_eq!(parse_wire_datetime("2024-05-01"), Some(utc(2024, 5, 1, 0)));
        assert_eq!(parse_wire_datetime("garbage"), None);
    }
}
