//! Candidate records, fetched metrics and the write-back payload.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AppError;

/// Timestamp layout written to the store: ISO-8601 with a literal `Z`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Format a UTC instant the way the store expects it.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Opaque record identifier.
///
/// The store may hand ids back as JSON strings or numbers; both end up
/// as the same textual id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(i64),
            Unsigned(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self(s),
            Raw::Int(n) => Self(n.to_string()),
            Raw::Unsigned(n) => Self(n.to_string()),
        })
    }
}

/// A row selected for refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: RecordId,

    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(
        default,
        rename = "last_view_refresh",
        deserialize_with = "lenient_timestamp"
    )]
    pub last_refresh: Option<DateTime<Utc>>,
}

/// Accepts RFC 3339 timestamps as well as zone-less ones, which are read as UTC.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    parse_timestamp(&raw)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

/// Parse a store timestamp.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Absolute bounds of one run's candidate filter.
///
/// Computed once when the run starts and reused for every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshWindow {
    /// Oldest creation time still eligible
    pub window_start: DateTime<Utc>,
    /// Records refreshed at or after this instant are fresh
    pub refresh_cutoff: DateTime<Utc>,
}

impl RefreshWindow {
    /// Bounds for a run starting at `now`.
    ///
    /// Fails if either bound falls outside the representable date range.
    pub fn at(now: DateTime<Utc>, window_days: u32, refresh_hours: u32) -> Result<Self, AppError> {
        let window_start = Duration::try_days(i64::from(window_days))
            .and_then(|span| now.checked_sub_signed(span))
            .ok_or_else(|| {
                AppError::validation(format!("window of {window_days} days is out of range"))
            })?;
        let refresh_cutoff = Duration::try_hours(i64::from(refresh_hours))
            .and_then(|span| now.checked_sub_signed(span))
            .ok_or_else(|| {
                AppError::validation(format!("refresh age of {refresh_hours} hours is out of range"))
            })?;

        Ok(Self {
            window_start,
            refresh_cutoff,
        })
    }

    /// Whether a record falls inside the window and is stale.
    pub fn selects(&self, created_at: DateTime<Utc>, last_refresh: Option<DateTime<Utc>>) -> bool {
        created_at >= self.window_start
            && last_refresh.is_none_or(|refreshed| refreshed < self.refresh_cutoff)
    }
}

/// Counters fetched for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub view_count: u64,
    pub likes_count: u64,
}

/// Update applied to every target table for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBackPayload {
    pub view_count: u64,
    pub likes_count: u64,
    /// Raw view count; no decay is applied
    pub score: u64,
    pub last_view_refresh: String,
}

impl WriteBackPayload {
    pub fn new(metrics: Metrics, refreshed_at: DateTime<Utc>) -> Self {
        Self {
            view_count: metrics.view_count,
            likes_count: metrics.likes_count,
            score: metrics.view_count,
            last_view_refresh: format_timestamp(refreshed_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 30, 12, 0, 0).unwrap()
    }

    #[test]
    fn record_id_accepts_strings_and_numbers() {
        let ids: Vec<RecordId> = serde_json::from_str(r#"["clip_01", 42]"#).unwrap();
        assert_eq!(ids, vec![RecordId::from("clip_01"), RecordId::from("42")]);
    }

    #[test]
    fn candidate_parses_store_row() {
        let row = r#"{"id": 9, "created_at": "2025-07-29T10:00:00+00:00", "last_view_refresh": null}"#;
        let record: CandidateRecord = serde_json::from_str(row).unwrap();
        assert_eq!(record.id.as_str(), "9");
        assert_eq!(
            record.created_at,
            Some(Utc.with_ymd_and_hms(2025, 7, 29, 10, 0, 0).unwrap())
        );
        assert!(record.last_refresh.is_none());
    }

    #[test]
    fn zoneless_timestamps_read_as_utc() {
        assert_eq!(
            parse_timestamp("2025-07-29T10:00:00.123"),
            Some(Utc.with_ymd_and_hms(2025, 7, 29, 10, 0, 0).unwrap() + Duration::milliseconds(123))
        );
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn window_rejects_records_created_before_start() {
        let window = RefreshWindow::at(now(), 2, 6).unwrap();
        let too_old = now() - Duration::days(2) - Duration::seconds(1);
        assert!(!window.selects(too_old, None));
        assert!(window.selects(now() - Duration::days(2), None));
    }

    #[test]
    fn window_rejects_recently_refreshed_records() {
        let window = RefreshWindow::at(now(), 2, 6).unwrap();
        let created = now() - Duration::hours(30);
        assert!(!window.selects(created, Some(now() - Duration::hours(6))));
        assert!(!window.selects(created, Some(now() - Duration::hours(1))));
        assert!(window.selects(created, Some(now() - Duration::hours(7))));
    }

    #[test]
    fn window_out_of_range_is_an_error() {
        assert!(matches!(
            RefreshWindow::at(now(), u32::MAX, 6),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            RefreshWindow::at(now(), 2, u32::MAX),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn payload_uses_view_count_as_score() {
        let payload = WriteBackPayload::new(
            Metrics {
                view_count: 500,
                likes_count: 10,
            },
            now(),
        );
        assert_eq!(payload.score, 500);
        assert_eq!(payload.likes_count, 10);
        assert_eq!(payload.last_view_refresh, "2025-07-30T12:00:00Z");
    }
}
