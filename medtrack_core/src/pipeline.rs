//! End-to-end pipeline from raw log rows to timeline data.
//!
//! Stages run strictly in order:
//! 1. Normalize rows (drop unparseable timestamps)
//! 2. Split entries into mention tokens
//! 3. Extract doses
//! 4. Evaluate constraints
//! 5. Aggregate the timeline

use crate::constraints::{evaluate, ConstraintReport};
use crate::events::to_entries;
use crate::extract::extract_all;
use crate::normalize::{normalize_rows, DroppedRow};
use crate::rules::RuleSet;
use crate::timeline::build_timeline;
use crate::{LogRow, ParsedDose, TimeRange, TimelineData};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters describing one run
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineStats {
    pub rows_total: usize,
    pub rows_dropped: usize,
    pub entries: usize,
    pub tokens: usize,
    pub configured_doses: usize,
    pub unconfigured_doses: usize,
    pub violations: usize,
    pub unit_mismatches: usize,
}

/// Everything produced by one run
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PipelineOutput {
    pub timeline: TimelineData,
    pub doses: Vec<ParsedDose>,
    pub report: ConstraintReport,
    pub dropped: Vec<DroppedRow>,
    pub stats: PipelineStats,
}

/// Run the whole pipeline over `rows`
///
/// Constraints are evaluated over every dose, not only those inside `range`,
/// so a window reaching back before the range is still checked.
pub fn run(
    rows: &[LogRow],
    rules: &RuleSet,
    now: DateTime<Utc>,
    range: TimeRange,
) -> PipelineOutput {
    let normalized = normalize_rows(rows, &rules.input);
    let entries = to_entries(&normalized.events);
    let doses = extract_all(&entries, rules);
    let report = evaluate(&doses, rules);
    let timeline = build_timeline(&doses, rules, now, range);

    let configured_doses = doses.iter().filter(|d| d.is_configured()).count();
    let stats = PipelineStats {
        rows_total: rows.len(),
        rows_dropped: normalized.dropped.len(),
        entries: entries.len(),
        tokens: entries.iter().map(|e| e.mention_tokens.len()).sum(),
        configured_doses,
        unconfigured_doses: doses.len() - configured_doses,
        violations: report.violations.len(),
        unit_mismatches: report.unit_mismatches.len(),
    };

    tracing::info!(
        "Pipeline: {} rows ({} dropped), {} tokens, {} doses ({} unconfigured), {} violations",
        stats.rows_total,
        stats.rows_dropped,
        stats.tokens,
        doses.len(),
        stats.unconfigured_doses,
        stats.violations
    );

    PipelineOutput {
        timeline,
        doses,
        report,
        dropped: normalized.dropped,
        stats,
    }
}

/// Run the pipeline over the configured lookback window ending at `now`
pub fn run_lookback(rows: &[LogRow], rules: &RuleSet, now: DateTime<Utc>) -> PipelineOutput {
    let range = TimeRange::lookback(now, rules.timeline.lookback_hours);
    run(rows, rules, now, range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputColumns;
    use crate::types::*;
    use crate::Config;
    use chrono::TimeZone;

    fn row(ts: &str, text: &str) -> LogRow {
        let columns = InputColumns::default();
        let mut row = LogRow::new();
        row.insert(columns.timestamp_column, ts.into());
        row.insert(columns.medication_column, text.into());
        row
    }

    fn ibuprofen_rules() -> RuleSet {
        RuleSet::compile(&Config {
            medications: vec![MedicationRule {
                name: "Ibuprofen".into(),
                display_name: None,
                aliases: vec![],
                ingredients: vec!["ibuprofen".into()],
                amount_parser: AmountParser {
                    patterns: vec![r"Ibuprofen\s+(\d+)mg".into()],
                    amount_group: 1,
                    multiplier: None,
                    unit: "mg".into(),
                    unit_group: None,
                },
                constraints: vec![HourlyConstraint {
                    window_hours: 4.0,
                    max_amount: 1200.0,
                    unit: "mg".into(),
                }],
                cross_medication_parsers: vec![],
                active_duration: Some(ActiveDuration {
                    typical: 6.0,
                    min: None,
                    max: None,
                }),
                theme: None,
            }],
            global_limits: vec![],
            ..Config::default()
        })
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_simple_dose_scenario() {
        crate::logging::init_test();
        let rows = vec![row("2024-01-01T09:00:00Z", "Ibuprofen 400mg")];

        let output = run_lookback(&rows, &ibuprofen_rules(), now());

        assert_eq!(output.doses.len(), 1);
        let dose = output.doses[0].as_configured().unwrap();
        assert_eq!(dose.medication_id, "ibuprofen");
        assert_eq!(dose.amount, Some(400.0));
        assert_eq!(dose.unit, "mg");

        let row = output.timeline.row("ibuprofen").unwrap();
        assert_eq!(row.doses.len(), 1);
        assert_eq!(
            row.doses[0].end_time,
            Utc.with_ymd_and_hms(2024, 1, 1, 15, 0, 0).unwrap()
        );
        assert_eq!(row.active_at(now()).count(), 1);
    }

    #[test]
    fn test_hourly_violation_scenario() {
        let rows = vec![
            row("2024-01-01T08:00:00Z", "Ibuprofen 400mg"),
            row("2024-01-01T09:00:00Z", "Ibuprofen 400mg"),
            row("2024-01-01T10:00:00Z", "Ibuprofen 400mg"),
        ];
        let rules = ibuprofen_rules();

        let output = run_lookback(&rows, &rules, now());
        assert!(output.report.violations.is_empty());

        let mut rows = rows;
        rows.push(row("2024-01-01T11:00:00Z", "Ibuprofen 400mg"));
        let output = run_lookback(&rows, &rules, now());
        assert_eq!(output.report.violations.len(), 1);
        assert_eq!(output.report.violations[0].cumulative_amount, 1600.0);
        assert_eq!(output.stats.violations, 1);
    }

    #[test]
    fn test_stats_and_dropped_rows() {
        let rows = vec![
            row("2024-01-01T09:00:00Z", "Ibuprofen 400mg, Unknown Pill"),
            row("garbage", "Ibuprofen 400mg"),
            row("2024-01-01T10:00:00Z", ""),
        ];

        let output = run_lookback(&rows, &ibuprofen_rules(), now());

        assert_eq!(
            output.stats,
            PipelineStats {
                rows_total: 3,
                rows_dropped: 1,
                entries: 2,
                tokens: 2,
                configured_doses: 1,
                unconfigured_doses: 1,
                violations: 0,
                unit_mismatches: 0,
            }
        );
        assert_eq!(output.dropped[0].row_index, 1);
        assert!(output.timeline.row("unknown_pill").is_some());
    }

    #[test]
    fn test_bare_mention_does_not_relabel_configured_row() {
        let rows = vec![
            row("2024-01-01T09:00:00Z", "Ibuprofen"),
            row("2024-01-01T10:00:00Z", "Ibuprofen 400mg"),
        ];

        let output = run_lookback(&rows, &ibuprofen_rules(), now());

        assert_eq!(output.timeline.rows.len(), 2);
        let configured = &output.timeline.rows[0];
        assert_eq!(configured.medication_id, "ibuprofen");
        assert!(configured.is_configured);
        assert_eq!(configured.doses.len(), 1);
        assert_eq!(configured.doses[0].amount, Some(400.0));

        let fallback = &output.timeline.rows[1];
        assert!(!fallback.is_configured);
        assert_eq!(fallback.display_name, "Ibuprofen");
        assert_eq!(fallback.theme, Theme::unconfigured());
    }

    #[test]
    fn test_idempotent() {
        let rows = vec![
            row("2024-01-01T09:00:00Z", "Ibuprofen 400mg, Unknown Pill"),
            row("2024-01-01T09:00:00Z", "Ibuprofen 200mg"),
            row("2024-01-01T07:30:00Z", "Something Else"),
        ];
        let rules = ibuprofen_rules();

        let first = serde_json::to_string(&run_lookback(&rows, &rules, now())).unwrap();
        let second = serde_json::to_string(&run_lookback(&rows, &rules, now())).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_order_preservation_within_rows() {
        let rows = vec![
            row("2024-01-01T11:00:00Z", "Ibuprofen 200mg"),
            row("2024-01-01T08:00:00Z", "Ibuprofen 200mg"),
            row("2024-01-01T10:00:00Z", "Ibuprofen 200mg"),
        ];

        let output = run_lookback(&rows, &ibuprofen_rules(), now());

        let row = output.timeline.row("ibuprofen").unwrap();
        assert!(row
            .doses
            .windows(2)
            .all(|w| w[0].start_time <= w[1].start_time));
    }

    #[test]
    fn test_cross_medication_doses_count_toward_global_limit() {
        let rules = crate::default_rules().unwrap();
        let rows = vec![
            row("2024-01-01T00:00:00Z", "Excedrin 4"),
            row("2024-01-01T05:00:00Z", "Excedrin 4"),
            row("2024-01-01T10:00:00Z", "Excedrin 4"),
            row("2024-01-01T15:00:00Z", "Excedrin 4"),
            row("2024-01-01T20:00:00Z", "Tylenol 500mg"),
        ];
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 21, 0, 0).unwrap();

        let output = run_lookback(&rows, rules, now);

        // Each 4h window holds at most 1000 mg, so only the daily limit trips
        assert_eq!(output.report.violations_for("acetaminophen").count(), 0);
        let global: Vec<_> = output
            .report
            .violations
            .iter()
            .filter(|v| {
                v.scope
                    == crate::constraints::ConstraintScope::Global {
                        ingredient: "acetaminophen".into(),
                    }
            })
            .collect();
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].cumulative_amount, 4500.0);
        assert_eq!(global[0].at, Utc.with_ymd_and_hms(2024, 1, 1, 20, 0, 0).unwrap());
        assert!(output.report.unit_mismatches.is_empty());
    }

    #[test]
    fn test_constraints_see_doses_before_range() {
        let rows = vec![
            row("2024-01-01T06:00:00Z", "Ibuprofen 800mg"),
            row("2024-01-01T09:00:00Z", "Ibuprofen 800mg"),
        ];
        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap(),
            now(),
        );

        let output = run(&rows, &ibuprofen_rules(), now(), range);

        assert_eq!(output.report.violations.len(), 1);
    }
}
