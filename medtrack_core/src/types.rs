//! Core domain types for the medication timeline pipeline.
//!
//! This module defines the fundamental types used throughout the system:
//! - Raw log rows and the events normalized from them
//! - Rule configuration records (parsers, constraints, limits)
//! - Parsed doses (configured and unconfigured)
//! - Timeline rows ready for rendering

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Input Types
// ============================================================================

/// One raw input record, keyed by column name
pub type LogRow = BTreeMap<String, String>;

/// A log row whose timestamp parsed successfully
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ParsedEvent {
    pub row_index: usize,
    pub timestamp: DateTime<Utc>,
    pub raw_text: Option<String>,
    pub source_row: LogRow,
}

/// A timestamped entry with its free text split into mention tokens
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MedicationEntry {
    /// RFC 3339 form of `timestamp`; not unique on its own
    pub id: String,
    pub row_index: usize,
    pub timestamp: DateTime<Utc>,
    pub mention_tokens: Vec<String>,
}

// ============================================================================
// Rule Configuration Types
// ============================================================================

/// Declarative amount extraction: ordered patterns, first match wins
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AmountParser {
    pub patterns: Vec<String>,
    #[serde(default = "default_amount_group")]
    pub amount_group: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_group: Option<usize>,
}

fn default_amount_group() -> usize {
    1
}

fn default_unit() -> String {
    "mg".into()
}

/// Ceiling on cumulative amount within a trailing window for one medication
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HourlyConstraint {
    pub window_hours: f64,
    pub max_amount: f64,
    pub unit: String,
}

/// Ceiling on an active ingredient shared across several medications
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GlobalLimit {
    pub ingredient_name: String,
    pub max_amount: f64,
    pub unit: String,
    pub window_hours: f64,
}

/// A mention of one medication implying a dose of another
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CrossMedicationParser {
    pub medication_name: String,
    pub parser: AmountParser,
}

/// How long a dose stays active, in hours
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ActiveDuration {
    pub typical: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Visualization metadata carried through to the renderer
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Theme {
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl Theme {
    /// Theme used for mentions that matched no rule
    pub fn unconfigured() -> Self {
        Self {
            color: "#9E9E9E".into(),
            icon: None,
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            color: "#5C6BC0".into(),
            icon: None,
        }
    }
}

/// Static configuration for one medication
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MedicationRule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub ingredients: Vec<String>,
    pub amount_parser: AmountParser,
    #[serde(default)]
    pub constraints: Vec<HourlyConstraint>,
    #[serde(default)]
    pub cross_medication_parsers: Vec<CrossMedicationParser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_duration: Option<ActiveDuration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
}

impl MedicationRule {
    /// Stable identifier derived from the canonical name
    pub fn id(&self) -> String {
        medication_id(&self.name)
    }

    /// Name shown to the user
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

/// Derive a medication identifier from a name or raw mention
///
/// Lowercases and collapses whitespace runs into `_`:
/// `"Unknown Pill"` becomes `"unknown_pill"`.
pub fn medication_id(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

// ============================================================================
// Dose Types
// ============================================================================

/// Where a configured dose came from
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DoseSource {
    /// The medication named by the mention itself
    Primary,
    /// Implied by a mention of another (combination) medication
    CrossMedication { from: String },
}

/// A dose matched by a configured rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConfiguredDose {
    pub entry_id: String,
    pub medication_id: String,
    pub display_name: String,
    pub amount: Option<f64>,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    pub active_duration_hours: Option<f64>,
    pub theme: Theme,
    pub source: DoseSource,
}

/// A mention that matched no rule; still rendered, in degraded form
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UnconfiguredDose {
    pub entry_id: String,
    pub medication_id: String,
    pub display_name: String,
    pub timestamp: DateTime<Utc>,
}

/// One extracted dose
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedDose {
    Configured(ConfiguredDose),
    Unconfigured(UnconfiguredDose),
}

impl ParsedDose {
    pub fn medication_id(&self) -> &str {
        match self {
            ParsedDose::Configured(d) => &d.medication_id,
            ParsedDose::Unconfigured(d) => &d.medication_id,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            ParsedDose::Configured(d) => &d.display_name,
            ParsedDose::Unconfigured(d) => &d.display_name,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ParsedDose::Configured(d) => d.timestamp,
            ParsedDose::Unconfigured(d) => d.timestamp,
        }
    }

    pub fn entry_id(&self) -> &str {
        match self {
            ParsedDose::Configured(d) => &d.entry_id,
            ParsedDose::Unconfigured(d) => &d.entry_id,
        }
    }

    /// Extracted amount; `None` for unconfigured doses or unknown amounts
    pub fn amount(&self) -> Option<f64> {
        match self {
            ParsedDose::Configured(d) => d.amount,
            ParsedDose::Unconfigured(_) => None,
        }
    }

    pub fn unit(&self) -> Option<&str> {
        match self {
            ParsedDose::Configured(d) => Some(&d.unit),
            ParsedDose::Unconfigured(_) => None,
        }
    }

    pub fn active_duration_hours(&self) -> Option<f64> {
        match self {
            ParsedDose::Configured(d) => d.active_duration_hours,
            ParsedDose::Unconfigured(_) => None,
        }
    }

    pub fn theme(&self) -> Theme {
        match self {
            ParsedDose::Configured(d) => d.theme.clone(),
            ParsedDose::Unconfigured(_) => Theme::unconfigured(),
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, ParsedDose::Configured(_))
    }

    pub fn as_configured(&self) -> Option<&ConfiguredDose> {
        match self {
            ParsedDose::Configured(d) => Some(d),
            ParsedDose::Unconfigured(_) => None,
        }
    }
}

// ============================================================================
// Timeline Types
// ============================================================================

/// Inclusive time range requested by the renderer
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `hours` leading up to and including `now`
    pub fn lookback(now: DateTime<Utc>, hours: f64) -> Self {
        Self {
            start: sub_hours(now, hours),
            end: now,
        }
    }

    /// Whether `[start, end]` overlaps this range
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start <= self.end && end >= self.start
    }
}

/// A dose with its active window resolved
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProcessedMedicationDose {
    pub medication_id: String,
    pub display_name: String,
    pub amount: Option<f64>,
    pub unit: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_configured: bool,
    pub theme: Theme,
}

impl ProcessedMedicationDose {
    /// Whether the active window `[start, end)` contains `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now < self.end_time
    }
}

/// All doses of one medication, ordered by start time
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimelineRow {
    pub medication_id: String,
    pub display_name: String,
    pub is_configured: bool,
    pub theme: Theme,
    pub doses: Vec<ProcessedMedicationDose>,
}

impl TimelineRow {
    pub fn active_at(&self, now: DateTime<Utc>) -> impl Iterator<Item = &ProcessedMedicationDose> {
        self.doses.iter().filter(move |d| d.is_active_at(now))
    }
}

/// Timeline handed to the rendering layer
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimelineData {
    pub now: DateTime<Utc>,
    pub range: TimeRange,
    pub rows: Vec<TimelineRow>,
}

impl TimelineData {
    /// Row for `medication_id`, preferring the configured row when an
    /// unconfigured mention produced the same id
    pub fn row(&self, medication_id: &str) -> Option<&TimelineRow> {
        let mut matching = self.rows.iter().filter(|r| r.medication_id == medication_id);
        let first = matching.next()?;
        if first.is_configured {
            return Some(first);
        }
        Some(matching.find(|r| r.is_configured).unwrap_or(first))
    }
}

/// Longest window or active duration accepted anywhere in a configuration
pub const MAX_HOURS: f64 = 24.0 * 366.0 * 100.0;

/// Whether `hours` is usable as a window, duration or lookback
pub fn is_valid_hours(hours: f64) -> bool {
    hours.is_finite() && hours > 0.0 && hours <= MAX_HOURS
}

/// Convert fractional hours into a chrono duration (millisecond precision)
///
/// Returns `None` for non-finite input or when the result does not fit in
/// a `Duration`.
pub fn hours_to_duration(hours: f64) -> Option<Duration> {
    if !hours.is_finite() {
        return None;
    }
    let millis = (hours * 3_600_000.0).round();
    if millis.abs() >= i64::MAX as f64 {
        return None;
    }
    Duration::try_milliseconds(millis as i64)
}

/// `at` shifted by `hours`, clamped to the representable range
pub fn add_hours(at: DateTime<Utc>, hours: f64) -> DateTime<Utc> {
    if hours.is_nan() {
        return at;
    }
    hours_to_duration(hours)
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(if hours < 0.0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
}

/// `at` moved back by `hours`, clamped to the representable range
pub fn sub_hours(at: DateTime<Utc>, hours: f64) -> DateTime<Utc> {
    add_hours(at, -hours)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_hours_to_duration() {
        assert_eq!(hours_to_duration(1.5), Some(Duration::minutes(90)));
        assert_eq!(hours_to_duration(f64::NAN), None);
        assert_eq!(hours_to_duration(f64::INFINITY), None);
        assert_eq!(hours_to_duration(1e20), None);
    }

    #[test]
    fn test_shifts_clamp_instead_of_overflowing() {
        assert_eq!(add_hours(at(), 2.0), at() + Duration::hours(2));
        assert_eq!(sub_hours(at(), 2.0), at() - Duration::hours(2));
        assert_eq!(add_hours(at(), f64::INFINITY), DateTime::<Utc>::MAX_UTC);
        assert_eq!(sub_hours(at(), 1e16), DateTime::<Utc>::MIN_UTC);
        assert_eq!(add_hours(at(), f64::NAN), at());

        let range = TimeRange::lookback(at(), f64::INFINITY);
        assert_eq!(range.start, DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_valid_hours() {
        assert!(is_valid_hours(24.0));
        assert!(is_valid_hours(MAX_HOURS));
        assert!(!is_valid_hours(0.0));
        assert!(!is_valid_hours(MAX_HOURS * 2.0));
        assert!(!is_valid_hours(f64::NAN));
        assert!(!is_valid_hours(f64::NEG_INFINITY));
    }
}
