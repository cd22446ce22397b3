//! SQLite column conversions
//!
//! SQLite has no array, timestamp or boolean types. Arrays are stored as JSON
//! text, timestamps as RFC 3339 text and booleans as 0/1 integers.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};

/// Encode a slice as a JSON array string
pub fn vec_to_json<T: Serialize>(v: &[T]) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a JSON array string; malformed input decodes to an empty Vec
pub fn json_to_vec<T: DeserializeOwned>(s: &str) -> Vec<T> {
    serde_json::from_str(s).unwrap_or_default()
}

pub fn datetime_to_str(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Accepts RFC 3339 as well as SQLite's `datetime()` output
pub fn str_to_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
                .map_err(|e| anyhow!("Invalid datetime '{}': {}", s, e))
        })
}

pub fn bool_to_int(b: bool) -> i64 {
    if b { 1 } else { 0 }
}

pub fn int_to_bool(i: i64) -> bool {
    i != 0
}

/// Map a conversion failure into the error type `FromRow` expects
pub fn decode_err(e: anyhow::Error) -> sqlx::Error {
    sqlx::Error::Decode(e.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_weekday_list_json() {
        let days: Vec<u8> = vec![0, 3, 6];
        assert_eq!(vec_to_json(&days), "[0,3,6]");
        assert_eq!(json_to_vec::<u8>("[1,5]"), vec![1, 5]);
        assert!(json_to_vec::<u8>("garbage").is_empty());
    }

    #[test]
    fn test_datetime_formats() {
        let now = Utc::now();
        assert_eq!(str_to_datetime(&datetime_to_str(now)).unwrap().timestamp(), now.timestamp());

        let parsed = str_to_datetime("2024-01-15 10:30:45").unwrap();
        assert_eq!((parsed.year(), parsed.month(), parsed.day()), (2024, 1, 15));
        assert!(str_to_datetime("yesterday").is_err());
    }

    #[test]
    fn test_bool_conversion() {
        assert_eq!(bool_to_int(true), 1);
        assert!(int_to_bool(7));
        assert!(!int_to_bool(0));
    }
}
