//! Timeline aggregation of doses into per-medication active windows.

use crate::rules::RuleSet;
use crate::types::*;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Resolve a dose's active window
///
/// The window is `active_duration_hours` long, or `default_width_hours` when
/// the duration is unknown.
pub fn process_dose(dose: &ParsedDose, default_width_hours: f64) -> ProcessedMedicationDose {
    let start_time = dose.timestamp();
    let width = dose.active_duration_hours().unwrap_or(default_width_hours);

    ProcessedMedicationDose {
        medication_id: dose.medication_id().to_string(),
        display_name: dose.display_name().to_string(),
        amount: dose.amount(),
        unit: dose.unit().map(str::to_string),
        start_time,
        end_time: add_hours(start_time, width),
        is_configured: dose.is_configured(),
        theme: dose.theme(),
    }
}

/// Group doses into timeline rows for rendering
///
/// - Only doses whose active window overlaps `range` are kept
/// - Overlapping windows of the same medication stay separate entries
/// - Rows follow rule declaration order, unconfigured rows come last in
///   order of first appearance
/// - An unconfigured mention sharing a configured medication's id gets its
///   own row
pub fn build_timeline(
    doses: &[ParsedDose],
    rules: &RuleSet,
    now: DateTime<Utc>,
    range: TimeRange,
) -> TimelineData {
    let default_width = rules.timeline.default_width_hours;

    let mut rows: Vec<TimelineRow> = Vec::new();
    let mut row_index: HashMap<(bool, String), usize> = HashMap::new();

    for dose in doses {
        let processed = process_dose(dose, default_width);
        if !range.overlaps(processed.start_time, processed.end_time) {
            continue;
        }

        let idx = *row_index
            .entry((processed.is_configured, processed.medication_id.clone()))
            .or_insert_with(|| {
                rows.push(TimelineRow {
                    medication_id: processed.medication_id.clone(),
                    display_name: processed.display_name.clone(),
                    is_configured: processed.is_configured,
                    theme: processed.theme.clone(),
                    doses: Vec::new(),
                });
                rows.len() - 1
            });
        rows[idx].doses.push(processed);
    }

    for row in &mut rows {
        // stable: equal start times keep input order
        row.doses.sort_by_key(|d| d.start_time);
    }

    // stable: unconfigured rows keep first-appearance order
    rows.sort_by_key(|row| {
        row.is_configured
            .then(|| rules.position(&row.medication_id))
            .flatten()
            .unwrap_or(usize::MAX)
    });

    tracing::debug!(
        "Built timeline with {} rows from {} doses",
        rows.len(),
        doses.len()
    );

    TimelineData { now, range, rows }
}
