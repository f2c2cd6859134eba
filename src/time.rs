//! Bugzilla wire date formats.
//!
//! See https://bugzilla.readthedocs.io/en/5.0/api/core/v1/general.html#common-data-types

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .ok()
        .map(|dt| dt.and_utc())
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

pub fn encode_datetime(dt: &DateTime<Utc>) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

pub fn encode_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetime_round_trip() {
        let dt = parse_datetime("2024-03-01T12:30:00Z").unwrap();
        assert_eq!(encode_datetime(&dt), "2024-03-01T12:30:00Z");
    }

    #[test]
    fn date_round_trip() {
        let d = parse_date("2024-03-01").unwrap();
        assert_eq!(encode_date(&d), "2024-03-01");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_datetime("not a date").is_none());
        assert!(parse_date("2024-03-01T12:30:00Z").is_none());
    }
}
