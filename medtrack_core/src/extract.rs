//! Dose extraction engine.
//!
//! Matches mention tokens against the compiled rules:
//! - Rules are tried in declaration order, aliases resolved first
//! - Within a rule, patterns are tried in order and the first match wins
//! - A matching rule may imply extra doses through cross-medication parsers
//! - A token no rule matches becomes exactly one unconfigured dose

use crate::rules::{CompiledRule, Extraction, RuleSet};
use crate::types::*;

/// Extract all doses implied by one mention token
///
/// Returns the primary dose followed by any cross-medication doses, or a
/// single unconfigured dose when nothing matches.
pub fn extract_doses(token: &str, entry: &MedicationEntry, rules: &RuleSet) -> Vec<ParsedDose> {
    for rule in rules.rules() {
        let text = rule.resolve_aliases(token);
        let Some(extraction) = rule.parser.parse(&text) else {
            continue;
        };

        tracing::debug!(
            "Token {:?} matched {} (pattern {}, amount {:?} {})",
            token,
            rule.id,
            extraction.pattern_index,
            extraction.amount,
            extraction.unit
        );

        let mut doses = vec![configured(rule, extraction, entry, DoseSource::Primary)];

        for cross in &rule.cross {
            let Some(extraction) = cross.parser.parse(&text) else {
                continue;
            };
            let Some(target) = rules.rule(&cross.target_id) else {
                continue;
            };
            tracing::debug!(
                "Token {:?} implies {} ({:?} {})",
                token,
                target.id,
                extraction.amount,
                extraction.unit
            );
            doses.push(configured(
                target,
                extraction,
                entry,
                DoseSource::CrossMedication {
                    from: rule.id.clone(),
                },
            ));
        }

        return doses;
    }

    tracing::debug!("Token {:?} matched no rule", token);
    vec![ParsedDose::Unconfigured(UnconfiguredDose {
        entry_id: entry.id.clone(),
        medication_id: medication_id(token),
        display_name: token.to_string(),
        timestamp: entry.timestamp,
    })]
}

fn configured(
    rule: &CompiledRule,
    extraction: Extraction,
    entry: &MedicationEntry,
    source: DoseSource,
) -> ParsedDose {
    ParsedDose::Configured(ConfiguredDose {
        entry_id: entry.id.clone(),
        medication_id: rule.id.clone(),
        display_name: rule.display_name.clone(),
        amount: extraction.amount,
        unit: extraction.unit,
        timestamp: entry.timestamp,
        active_duration_hours: rule.active_duration_hours,
        theme: rule.theme.clone(),
        source,
    })
}

/// Extract doses for every token of one entry, in token order
pub fn extract_entry(entry: &MedicationEntry, rules: &RuleSet) -> Vec<ParsedDose> {
    entry
        .mention_tokens
        .iter()
        .flat_map(|token| extract_doses(token, entry, rules))
        .collect()
}

/// Extract doses for a sequence of entries, in entry order
pub fn extract_all(entries: &[MedicationEntry], rules: &RuleSet) -> Vec<ParsedDose> {
    entries
        .iter()
        .flat_map(|entry| extract_entry(entry, rules))
        .collect()
}
