//! Constraint evaluation over trailing dose windows.
//!
//! Two kinds of limits are checked:
//! - Hourly constraints of a single medication
//! - Global limits on an ingredient shared by several medications
//!
//! Evaluation is pure: violations and unit mismatches are reported, doses are
//! never altered or removed.

use crate::rules::RuleSet;
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tolerance for floating point sums compared against a limit
const AMOUNT_EPSILON: f64 = 1e-9;

/// What a limit applies to
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintScope {
    Hourly { medication_id: String },
    Global { ingredient: String },
}

impl fmt::Display for ConstraintScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hourly { medication_id } => write!(f, "{}", medication_id),
            Self::Global { ingredient } => write!(f, "ingredient {}", ingredient),
        }
    }
}

/// A cumulative amount above a configured ceiling
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConstraintViolation {
    pub scope: ConstraintScope,
    pub window_hours: f64,
    pub max_amount: f64,
    pub unit: String,
    pub cumulative_amount: f64,
    /// Timestamp of the dose that pushed the sum over the limit
    pub at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub entry_id: String,
}

/// A dose whose unit differs from the limit it is checked against
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[error("unit mismatch for {scope}: {medication_id} dose at {at} is in '{dose_unit}', limit is in '{constraint_unit}'")]
pub struct UnitMismatch {
    pub scope: ConstraintScope,
    pub medication_id: String,
    pub dose_unit: String,
    pub constraint_unit: String,
    pub at: DateTime<Utc>,
    pub entry_id: String,
}

/// Everything the evaluator found
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ConstraintReport {
    pub violations: Vec<ConstraintViolation>,
    pub unit_mismatches: Vec<UnitMismatch>,
}

impl ConstraintReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty() && self.unit_mismatches.is_empty()
    }

    /// Hourly-constraint violations of one medication
    pub fn violations_for<'a>(
        &'a self,
        medication_id: &'a str,
    ) -> impl Iterator<Item = &'a ConstraintViolation> + 'a {
        self.violations.iter().filter(move |v| {
            matches!(&v.scope, ConstraintScope::Hourly { medication_id: id } if id == medication_id)
        })
    }

    fn extend(&mut self, other: ConstraintReport) {
        self.violations.extend(other.violations);
        self.unit_mismatches.extend(other.unit_mismatches);
    }
}

/// A ceiling on cumulative amount within a trailing window
#[derive(Clone, Copy, Debug)]
struct Limit<'a> {
    window_hours: f64,
    max_amount: f64,
    unit: &'a str,
}

fn same_unit(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Sum of same-unit amounts with timestamps in `[at - window_hours, at]`
pub fn cumulative_amount(
    doses: &[ParsedDose],
    at: DateTime<Utc>,
    window_hours: f64,
    unit: &str,
) -> f64 {
    let window_start = sub_hours(at, window_hours);
    doses
        .iter()
        .filter_map(ParsedDose::as_configured)
        .filter(|d| d.timestamp >= window_start && d.timestamp <= at)
        .filter(|d| same_unit(&d.unit, unit))
        .filter_map(|d| d.amount)
        .sum()
}

/// Check one medication's doses against its hourly constraints
pub fn evaluate_hourly(
    doses: &[ParsedDose],
    medication_id: &str,
    constraints: &[HourlyConstraint],
) -> ConstraintReport {
    let members = [medication_id.to_string()];
    let pool = collect_sorted(doses, &members);
    let scope = ConstraintScope::Hourly {
        medication_id: medication_id.to_string(),
    };

    let mut report = ConstraintReport::default();
    for constraint in constraints {
        let limit = Limit {
            window_hours: constraint.window_hours,
            max_amount: constraint.max_amount,
            unit: &constraint.unit,
        };
        evaluate_window(&scope, limit, &pool, &mut report);
    }
    report
}

/// Check the pooled doses of every medication listing an ingredient
pub fn evaluate_global(doses: &[ParsedDose], limit: &GlobalLimit, members: &[String]) -> ConstraintReport {
    let pool = collect_sorted(doses, members);
    let scope = ConstraintScope::Global {
        ingredient: limit.ingredient_name.trim().to_lowercase(),
    };

    let mut report = ConstraintReport::default();
    evaluate_window(
        &scope,
        Limit {
            window_hours: limit.window_hours,
            max_amount: limit.max_amount,
            unit: &limit.unit,
        },
        &pool,
        &mut report,
    );
    report
}

/// Evaluate every configured hourly constraint and global limit
pub fn evaluate(doses: &[ParsedDose], rules: &RuleSet) -> ConstraintReport {
    let mut report = ConstraintReport::default();

    for rule in rules.rules().iter().filter(|r| !r.constraints.is_empty()) {
        report.extend(evaluate_hourly(doses, &rule.id, &rule.constraints));
    }

    for limit in rules.global_limits() {
        let members = rules.medications_with_ingredient(&limit.ingredient_name);
        report.extend(evaluate_global(doses, limit, members));
    }

    for mismatch in &report.unit_mismatches {
        tracing::warn!("{}", mismatch);
    }
    if !report.violations.is_empty() {
        tracing::info!("{} constraint violations", report.violations.len());
    }

    report
}

/// Configured doses of the given medications, stable-sorted by time
fn collect_sorted<'a>(doses: &'a [ParsedDose], members: &[String]) -> Vec<&'a ConfiguredDose> {
    let mut pool: Vec<&ConfiguredDose> = doses
        .iter()
        .filter_map(ParsedDose::as_configured)
        .filter(|d| members.iter().any(|m| *m == d.medication_id))
        .collect();
    pool.sort_by_key(|d| d.timestamp);
    pool
}

fn evaluate_window(
    scope: &ConstraintScope,
    limit: Limit<'_>,
    pool: &[&ConfiguredDose],
    report: &mut ConstraintReport,
) {
    let mut counted: Vec<&ConfiguredDose> = Vec::with_capacity(pool.len());
    for dose in pool.iter().copied().filter(|d| d.amount.is_some()) {
        if same_unit(&dose.unit, limit.unit) {
            counted.push(dose);
        } else {
            report.unit_mismatches.push(UnitMismatch {
                scope: scope.clone(),
                medication_id: dose.medication_id.clone(),
                dose_unit: dose.unit.clone(),
                constraint_unit: limit.unit.to_string(),
                at: dose.timestamp,
                entry_id: dose.entry_id.clone(),
            });
        }
    }

    // prefix[i] = sum of the first i counted amounts
    let mut prefix = Vec::with_capacity(counted.len() + 1);
    prefix.push(0.0);
    for dose in &counted {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + dose.amount.unwrap_or(0.0));
    }

    for dose in &counted {
        let window_start = sub_hours(dose.timestamp, limit.window_hours);
        let lo = counted.partition_point(|d| d.timestamp < window_start);
        let hi = counted.partition_point(|d| d.timestamp <= dose.timestamp);
        let cumulative = prefix[hi] - prefix[lo];

        if cumulative > limit.max_amount + AMOUNT_EPSILON {
            tracing::debug!(
                "{}: {} {} within {}h at {} exceeds {}",
                scope,
                cumulative,
                limit.unit,
                limit.window_hours,
                dose.timestamp,
                limit.max_amount
            );
            report.violations.push(ConstraintViolation {
                scope: scope.clone(),
                window_hours: limit.window_hours,
                max_amount: limit.max_amount,
                unit: limit.unit.to_string(),
                cumulative_amount: cumulative,
                at: dose.timestamp,
                window_start,
                entry_id: dose.entry_id.clone(),
            });
        }
    }
}
