//! Conversion of parsed events into medication entries with mention tokens.

use crate::{MedicationEntry, ParsedEvent};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;

/// Identifier derived from an entry's timestamp
pub fn entry_id(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Split a free-text medication field into mention tokens
///
/// Tokens are comma separated and trimmed; empty tokens are never returned.
pub fn split_mentions(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Convert events into entries, preserving order
///
/// Entries sharing a timestamp share an `id`; such collisions are logged
/// and left for `row_index` to disambiguate.
pub fn to_entries(events: &[ParsedEvent]) -> Vec<MedicationEntry> {
    let mut seen: HashMap<String, usize> = HashMap::new();

    events
        .iter()
        .map(|event| {
            let id = entry_id(&event.timestamp);
            if let Some(first_row) = seen.insert(id.clone(), event.row_index) {
                tracing::warn!(
                    "Entry id {} shared by rows {} and {}",
                    id,
                    first_row,
                    event.row_index
                );
            }

            let mention_tokens = event
                .raw_text
                .as_deref()
                .map(split_mentions)
                .unwrap_or_default();

            MedicationEntry {
                id,
                row_index: event.row_index,
                timestamp: event.timestamp,
                mention_tokens,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogRow;
    use chrono::TimeZone;

    fn event(row_index: usize, hour: u32, text: Option<&str>) -> ParsedEvent {
        ParsedEvent {
            row_index,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
            raw_text: text.map(str::to_string),
            source_row: LogRow::new(),
        }
    }

    #[test]
    fn test_entry_id_is_iso_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        assert_eq!(entry_id(&ts), "2024-01-01T09:00:00Z");
    }

    #[test]
    fn test_split_discards_empty_tokens() {
        assert_eq!(
            split_mentions(" Ibuprofen 400mg, ,Caffeine 100mg,,  "),
            vec!["Ibuprofen 400mg", "Caffeine 100mg"]
        );
        assert!(split_mentions(" , ,").is_empty());
    }

    #[test]
    fn test_to_entries() {
        let events = vec![
            event(0, 9, Some("Ibuprofen 400mg, Unknown Pill")),
            event(2, 10, None),
        ];

        let entries = to_entries(&events);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "2024-01-01T09:00:00Z");
        assert_eq!(entries[0].mention_tokens, vec!["Ibuprofen 400mg", "Unknown Pill"]);
        assert_eq!(entries[1].row_index, 2);
        assert!(entries[1].mention_tokens.is_empty());
    }

    #[test]
    fn test_colliding_ids_are_kept() {
        let events = vec![event(0, 9, Some("A")), event(1, 9, Some("B"))];
        let entries = to_entries(&events);
        assert_eq!(entries[0].id, entries[1].id);
        assert_ne!(entries[0].row_index, entries[1].row_index);
    }
}
