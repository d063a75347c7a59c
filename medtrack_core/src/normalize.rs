//! Text normalization of raw log rows.
//!
//! Pulls the timestamp and free-text medication column out of each row.
//! Rows whose timestamp cannot be parsed are dropped and reported, never
//! fatal.

use crate::config::InputColumns;
use crate::{Error, LogRow, ParsedEvent, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Naive date-time layouts tried after RFC 3339 and RFC 2822
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
];

/// Date-only layouts, interpreted as midnight
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// A row that was dropped during normalization
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DroppedRow {
    pub row_index: usize,
    pub reason: String,
}

/// Output of [`normalize_rows`]
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct NormalizedRows {
    pub events: Vec<ParsedEvent>,
    pub dropped: Vec<DroppedRow>,
}

/// Parse a timestamp permissively
///
/// Accepts RFC 3339, RFC 2822 and common spreadsheet layouts. Values without
/// an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

/// Parse a timestamp given outside of log rows (e.g. a reference "now")
pub fn parse_timestamp_strict(raw: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(raw).ok_or_else(|| Error::InvalidTimestamp(raw.to_string()))
}

/// Normalize raw rows into timestamped events
///
/// Input order is preserved. Every row ends up either in `events` or in
/// `dropped`.
pub fn normalize_rows(rows: &[LogRow], columns: &InputColumns) -> NormalizedRows {
    let mut out = NormalizedRows::default();

    for (row_index, row) in rows.iter().enumerate() {
        let raw_timestamp = row
            .get(&columns.timestamp_column)
            .map(|s| s.trim())
            .unwrap_or("");

        if raw_timestamp.is_empty() {
            tracing::warn!("Row {}: missing timestamp, dropping", row_index);
            out.dropped.push(DroppedRow {
                row_index,
                reason: format!("missing '{}'", columns.timestamp_column),
            });
            continue;
        }

        let Some(timestamp) = parse_timestamp(raw_timestamp) else {
            tracing::warn!(
                "Row {}: unparseable timestamp {:?}, dropping",
                row_index,
                raw_timestamp
            );
            out.dropped.push(DroppedRow {
                row_index,
                reason: format!("unparseable timestamp '{}'", raw_timestamp),
            });
            continue;
        };

        let raw_text = row
            .get(&columns.medication_column)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        out.events.push(ParsedEvent {
            row_index,
            timestamp,
            raw_text,
            source_row: row.clone(),
        });
    }

    if !out.dropped.is_empty() {
        tracing::info!(
            "Normalized {} rows, dropped {}",
            out.events.len(),
            out.dropped.len()
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(ts: &str, text: &str) -> LogRow {
        let columns = InputColumns::default();
        let mut row = LogRow::new();
        row.insert(columns.timestamp_column, ts.into());
        row.insert(columns.medication_column, text.into());
        row
    }

    #[test]
    fn test_parse_rfc3339() {
        let ts = parse_timestamp("2024-01-01T09:00:00Z").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());

        let offset = parse_timestamp("2024-01-01T10:00:00+01:00").unwrap();
        assert_eq!(offset, ts);
    }

    #[test]
    fn test_parse_spreadsheet_layouts() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-05 14:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05 14:30"), Some(expected));
        assert_eq!(parse_timestamp("3/5/2024 14:30:00"), Some(expected));
        assert_eq!(parse_timestamp("3/5/2024 2:30:00 PM"), Some(expected));
        assert_eq!(parse_timestamp("2024/03/05 14:30"), Some(expected));
    }

    #[test]
    fn test_parse_date_only() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-05"), Some(expected));
        assert_eq!(parse_timestamp("03/05/2024"), Some(expected));
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("yesterday-ish"), None);
        assert!(matches!(
            parse_timestamp_strict("nope"),
            Err(Error::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_bad_rows_are_dropped_not_fatal() {
        let rows = vec![
            row("2024-01-01T09:00:00Z", "Ibuprofen 400mg"),
            row("not a date", "Ibuprofen 400mg"),
            LogRow::new(),
            row("2024-01-01T12:00:00Z", "  "),
        ];

        let normalized = normalize_rows(&rows, &InputColumns::default());

        assert_eq!(normalized.events.len(), 2);
        assert_eq!(normalized.dropped.len(), 2);
        assert_eq!(normalized.events[0].row_index, 0);
        assert_eq!(normalized.events[0].raw_text.as_deref(), Some("Ibuprofen 400mg"));
        assert_eq!(normalized.events[1].row_index, 3);
        assert_eq!(normalized.events[1].raw_text, None);
        assert_eq!(normalized.dropped[0].row_index, 1);
        assert_eq!(normalized.dropped[1].row_index, 2);
    }

    #[test]
    fn test_order_preserved() {
        let rows = vec![
            row("2024-01-02T09:00:00Z", "B"),
            row("2024-01-01T09:00:00Z", "A"),
        ];
        let normalized = normalize_rows(&rows, &InputColumns::default());
        let texts: Vec<_> = normalized
            .events
            .iter()
            .map(|e| e.raw_text.clone().unwrap())
            .collect();
        assert_eq!(texts, vec!["B", "A"]);
    }

    #[test]
    fn test_custom_columns() {
        let columns = InputColumns {
            timestamp_column: "when".into(),
            medication_column: "what".into(),
        };
        let mut r = LogRow::new();
        r.insert("when".into(), " 2024-01-01 08:00 ".into());
        r.insert("what".into(), " Caffeine 100mg ".into());

        let normalized = normalize_rows(&[r], &columns);
        assert_eq!(normalized.events.len(), 1);
        assert_eq!(normalized.events[0].raw_text.as_deref(), Some("Caffeine 100mg"));
    }
}
