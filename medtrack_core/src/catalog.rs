//! Default catalog of medication rules and ingredient limits.
//!
//! This module provides the built-in rules used when no configuration file
//! overrides them.

use crate::rules::RuleSet;
use crate::types::*;
use crate::{Config, Error, Result};
use once_cell::sync::Lazy;

/// Cached default rule set - compiled once and reused across all operations
static DEFAULT_RULES: Lazy<std::result::Result<RuleSet, String>> =
    Lazy::new(|| RuleSet::compile(&Config::default()).map_err(|e| e.to_string()));

/// Get a reference to the compiled default rule set
///
/// Avoids recompiling every pattern of the default catalog on each run.
pub fn default_rules() -> Result<&'static RuleSet> {
    DEFAULT_RULES
        .as_ref()
        .map_err(|e| Error::Config(format!("Default catalog is invalid: {}", e)))
}

fn mg_parser(pattern: &str) -> AmountParser {
    AmountParser {
        patterns: vec![pattern.into()],
        amount_group: 1,
        multiplier: None,
        unit: "mg".into(),
        unit_group: None,
    }
}

fn theme(color: &str) -> Option<Theme> {
    Some(Theme {
        color: color.into(),
        icon: None,
    })
}

fn duration(typical: f64, min: f64, max: f64) -> Option<ActiveDuration> {
    Some(ActiveDuration {
        typical,
        min: Some(min),
        max: Some(max),
    })
}

/// Built-in medication rules
pub fn default_medications() -> Vec<MedicationRule> {
    vec![
        MedicationRule {
            name: "Ibuprofen".into(),
            display_name: None,
            aliases: vec!["Advil".into(), "Motrin".into()],
            ingredients: vec!["ibuprofen".into()],
            amount_parser: mg_parser(r"(?i)\bIbuprofen\b(?:\s+(\d+(?:[.,]\d+)?)\s*mg)?"),
            constraints: vec![HourlyConstraint {
                window_hours: 24.0,
                max_amount: 1200.0,
                unit: "mg".into(),
            }],
            cross_medication_parsers: vec![],
            active_duration: duration(6.0, 4.0, 8.0),
            theme: theme("#E57373"),
        },
        MedicationRule {
            name: "Acetaminophen".into(),
            display_name: None,
            aliases: vec!["Paracetamol".into(), "Tylenol".into()],
            ingredients: vec!["acetaminophen".into()],
            amount_parser: mg_parser(r"(?i)\bAcetaminophen\b(?:\s+(\d+(?:[.,]\d+)?)\s*mg)?"),
            constraints: vec![HourlyConstraint {
                window_hours: 4.0,
                max_amount: 1000.0,
                unit: "mg".into(),
            }],
            cross_medication_parsers: vec![],
            active_duration: duration(5.0, 4.0, 6.0),
            theme: theme("#64B5F6"),
        },
        MedicationRule {
            name: "Caffeine".into(),
            display_name: None,
            aliases: vec![],
            ingredients: vec!["caffeine".into()],
            amount_parser: mg_parser(r"(?i)\bCaffeine\b(?:\s+(\d+(?:[.,]\d+)?)\s*mg)?"),
            constraints: vec![HourlyConstraint {
                window_hours: 24.0,
                max_amount: 400.0,
                unit: "mg".into(),
            }],
            cross_medication_parsers: vec![],
            active_duration: duration(5.0, 3.0, 7.0),
            theme: theme("#A1887F"),
        },
        // Combination product: counted in tablets, implies its ingredients
        MedicationRule {
            name: "Excedrin".into(),
            display_name: Some("Excedrin (combination)".into()),
            aliases: vec![],
            ingredients: vec![],
            amount_parser: AmountParser {
                patterns: vec![r"(?i)\bExcedrin\b(?:\s+(\d+)\s*(?:x|tabs?|tablets?)?)?".into()],
                amount_group: 1,
                multiplier: None,
                unit: "tablet".into(),
                unit_group: None,
            },
            constraints: vec![],
            cross_medication_parsers: vec![
                CrossMedicationParser {
                    medication_name: "Acetaminophen".into(),
                    parser: AmountParser {
                        patterns: vec![r"(?i)\bExcedrin\b(?:\s+(\d+))?".into()],
                        amount_group: 1,
                        multiplier: Some(250.0),
                        unit: "mg".into(),
                        unit_group: None,
                    },
                },
                CrossMedicationParser {
                    medication_name: "Caffeine".into(),
                    parser: AmountParser {
                        patterns: vec![r"(?i)\bExcedrin\b(?:\s+(\d+))?".into()],
                        amount_group: 1,
                        multiplier: Some(65.0),
                        unit: "mg".into(),
                        unit_group: None,
                    },
                },
            ],
            active_duration: duration(6.0, 4.0, 6.0),
            theme: theme("#81C784"),
        },
    ]
}

/// Built-in cross-medication ingredient limits
pub fn default_global_limits() -> Vec<GlobalLimit> {
    vec![
        GlobalLimit {
            ingredient_name: "acetaminophen".into(),
            max_amount: 4000.0,
            unit: "mg".into(),
            window_hours: 24.0,
        },
        GlobalLimit {
            ingredient_name: "ibuprofen".into(),
            max_amount: 3200.0,
            unit: "mg".into(),
            window_hours: 24.0,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_loads() {
        assert_eq!(default_medications().len(), 4);
        assert_eq!(default_global_limits().len(), 2);
    }

    #[test]
    fn test_default_catalog_compiles() {
        let rules = default_rules().unwrap();
        assert_eq!(rules.rules().len(), 4);
        assert!(rules.rule("ibuprofen").is_some());
        assert!(rules.rule("excedrin").is_some());
    }

    #[test]
    fn test_cross_targets_are_configured() {
        let meds = default_medications();
        for med in &meds {
            for cross in &med.cross_medication_parsers {
                assert!(
                    meds.iter().any(|m| m.name == cross.medication_name),
                    "Cross-medication target {} not found",
                    cross.medication_name
                );
            }
        }
    }

    #[test]
    fn test_every_global_limit_has_members() {
        let rules = default_rules().unwrap();
        for limit in default_global_limits() {
            assert!(
                !rules.medications_with_ingredient(&limit.ingredient_name).is_empty(),
                "No medication lists ingredient {}",
                limit.ingredient_name
            );
        }
    }
}
