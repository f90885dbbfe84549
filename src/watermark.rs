// ABOUTME: Watermark value type for incremental sync windows
// ABOUTME: Timestamp strings ordered chronologically, with lexicographic fallback

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Default lower bound for a table that has never been synchronized.
pub const EPOCH_WATERMARK: &str = "1970-01-01 00:00:00";

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Last row-change time successfully mirrored for a table.
///
/// Watermarks are stored exactly as the database rendered them (for MySQL,
/// `CAST(MAX(col) AS CHAR)`), so a value read from the source and written to
/// the checkpoint file round-trips without loss of precision.
///
/// Ordering is chronological when both sides parse as a date or datetime and
/// lexicographic otherwise. Two spellings of the same instant are ordered by
/// their text so that `Ord` agrees with `Eq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watermark(String);

impl Watermark {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The epoch-zero watermark used when neither a checkpoint nor a
    /// destination maximum is available.
    pub fn epoch() -> Self {
        Self(EPOCH_WATERMARK.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `self` is strictly later than `other` as an instant.
    ///
    /// Unlike `>`, equal instants spelled with different precision
    /// (`10:00:00` and `10:00:00.000000`) are not ordered by their text.
    pub fn is_after(&self, other: &Self) -> bool {
        match (self.parsed(), other.parsed()) {
            (Some(a), Some(b)) => a > b,
            _ => self.0 > other.0,
        }
    }

    fn parsed(&self) -> Option<NaiveDateTime> {
        let trimmed = self.0.trim();
        for format in DATETIME_FORMATS {
            if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
                return Some(parsed);
            }
        }
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
    }
}

impl Ord for Watermark {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.parsed(), other.parsed()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for Watermark {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Watermark {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Watermark {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chronological_ordering() {
        let a = Watermark::from("2024-01-01 09:00:00");
        let b = Watermark::from("2024-01-01 10:00:00");
        assert!(a < b);
        assert!(Watermark::epoch() < a);
    }

    #[test]
    fn test_fractional_seconds_order_after_whole_seconds() {
        let whole = Watermark::from("2024-01-01 10:00:00");
        let fractional = Watermark::from("2024-01-01 10:00:00.250000");
        assert!(whole < fractional);
    }

    #[test]
    fn test_is_after_ignores_precision_spelling() {
        let whole = Watermark::from("2024-01-01 10:00:00");
        let micros = Watermark::from("2024-01-01 10:00:00.000000");
        assert!(!micros.is_after(&whole));
        assert!(!whole.is_after(&micros));
        assert!(Watermark::from("2024-01-01 10:00:00.000001").is_after(&whole));
        assert!(Watermark::from("b").is_after(&Watermark::from("a")));
    }

    #[test]
    fn test_mixed_separators_compare_chronologically() {
        // Text order would put 'T' after ' '
        let earlier = Watermark::from("2024-01-01T09:00:00");
        let later = Watermark::from("2024-01-01 10:00:00");
        assert!(earlier < later);
    }

    #[test]
    fn test_date_only_values() {
        let day = Watermark::from("2024-03-01");
        let later = Watermark::from("2024-03-01 00:00:01");
        assert!(day < later);
    }

    #[test]
    fn test_unparseable_values_fall_back_to_text() {
        assert!(Watermark::from("abc") < Watermark::from("abd"));
    }

    #[test]
    fn test_equal_values_are_equal() {
        let a = Watermark::from("2024-01-01 10:00:00");
        let b = Watermark::from("2024-01-01 10:00:00");
        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert_eq!(a, b);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let wm = Watermark::from("2024-01-01 10:00:00");
        assert_eq!(
            serde_json::to_string(&wm).unwrap(),
            "\"2024-01-01 10:00:00\""
        );
    }
}
