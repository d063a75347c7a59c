//! Compilation of medication configuration into an immutable rule set.
//!
//! All patterns are compiled and all cross references checked here, once,
//! before any log row is processed. A bad pattern or an inconsistent rule
//! fails the whole load.

use crate::config::{InputColumns, TimelineConfig};
use crate::types::*;
use crate::{Config, Error, Result};
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

/// Result of applying an amount parser to a mention
#[derive(Clone, Debug, PartialEq)]
pub struct Extraction {
    pub amount: Option<f64>,
    pub unit: String,
    /// Index of the pattern that matched
    pub pattern_index: usize,
}

/// An [`AmountParser`] with its patterns compiled
#[derive(Clone, Debug)]
pub struct CompiledParser {
    patterns: Vec<Regex>,
    amount_group: usize,
    multiplier: f64,
    unit: String,
    unit_group: Option<usize>,
}

impl CompiledParser {
    fn compile(medication: &str, parser: &AmountParser) -> Result<Self> {
        let patterns = parser
            .patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|source| Error::InvalidPattern {
                    medication: medication.to_string(),
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            patterns,
            amount_group: parser.amount_group,
            multiplier: parser.multiplier.unwrap_or(1.0),
            unit: parser.unit.clone(),
            unit_group: parser.unit_group,
        })
    }

    /// Apply the patterns in declared order; the first match wins.
    pub fn parse(&self, text: &str) -> Option<Extraction> {
        self.patterns
            .iter()
            .enumerate()
            .find_map(|(i, re)| re.captures(text).map(|caps| self.extract(i, &caps)))
    }

    fn extract(&self, pattern_index: usize, caps: &Captures<'_>) -> Extraction {
        let amount = caps
            .get(self.amount_group)
            .and_then(|m| parse_amount(m.as_str()))
            .map(|a| a * self.multiplier);

        let unit = self
            .unit_group
            .and_then(|g| caps.get(g))
            .map(|m| m.as_str().trim())
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.unit.clone());

        Extraction {
            amount,
            unit,
            pattern_index,
        }
    }

    fn check_groups(&self, medication: &str, errors: &mut Vec<String>) {
        for re in &self.patterns {
            let groups = re.captures_len();
            if self.amount_group >= groups {
                errors.push(format!(
                    "Medication '{}': amount group {} out of range for pattern '{}'",
                    medication,
                    self.amount_group,
                    re.as_str()
                ));
            }
            if let Some(g) = self.unit_group {
                if g >= groups {
                    errors.push(format!(
                        "Medication '{}': unit group {} out of range for pattern '{}'",
                        medication,
                        g,
                        re.as_str()
                    ));
                }
            }
        }
    }
}

/// Parse a captured amount, accepting a decimal comma
fn parse_amount(raw: &str) -> Option<f64> {
    raw.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// A cross-medication parser resolved to its target medication
#[derive(Clone, Debug)]
pub struct CompiledCross {
    pub target_id: String,
    pub parser: CompiledParser,
}

/// A [`MedicationRule`] ready for matching
#[derive(Clone, Debug)]
pub struct CompiledRule {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub ingredients: Vec<String>,
    pub constraints: Vec<HourlyConstraint>,
    pub active_duration_hours: Option<f64>,
    pub theme: Theme,
    pub parser: CompiledParser,
    pub cross: Vec<CompiledCross>,
    aliases: Vec<Regex>,
}

impl CompiledRule {
    /// Rewrite every alias occurrence in `token` to the canonical name
    pub fn resolve_aliases<'a>(&self, token: &'a str) -> Cow<'a, str> {
        let mut text = Cow::Borrowed(token);
        for alias in &self.aliases {
            if alias.is_match(&text) {
                let replaced = alias
                    .replace_all(&text, regex::NoExpand(&self.name))
                    .into_owned();
                text = Cow::Owned(replaced);
            }
        }
        text
    }
}

/// Immutable, validated medication configuration
#[derive(Clone, Debug)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
    by_id: HashMap<String, usize>,
    global_limits: Vec<GlobalLimit>,
    ingredient_index: BTreeMap<String, Vec<String>>,
    pub input: InputColumns,
    pub timeline: TimelineConfig,
}

impl RuleSet {
    /// Compile and validate a configuration
    pub fn compile(config: &Config) -> Result<Self> {
        let mut rules = Vec::with_capacity(config.medications.len());
        for med in &config.medications {
            rules.push(compile_rule(med)?);
        }

        let mut errors = Vec::new();
        let mut by_id = HashMap::new();
        for (i, (rule, med)) in rules.iter().zip(&config.medications).enumerate() {
            if rule.id.is_empty() {
                errors.push("Medication has empty name".to_string());
                continue;
            }
            if by_id.insert(rule.id.clone(), i).is_some() {
                errors.push(format!("Duplicate medication '{}'", rule.id));
            }
            validate_rule(med, rule, &mut errors);
        }

        check_alias_collisions(&config.medications, &mut errors);

        for (rule, med) in rules.iter_mut().zip(&config.medications) {
            for cross in &med.cross_medication_parsers {
                let target_id = medication_id(&cross.medication_name);
                if !by_id.contains_key(&target_id) {
                    errors.push(format!(
                        "Medication '{}': cross-medication target '{}' is not configured",
                        med.name, cross.medication_name
                    ));
                } else if target_id == rule.id {
                    errors.push(format!(
                        "Medication '{}': cross-medication parser targets itself",
                        med.name
                    ));
                }
                let parser = CompiledParser::compile(&med.name, &cross.parser)?;
                parser.check_groups(&med.name, &mut errors);
                check_multiplier(&med.name, &cross.parser, &mut errors);
                rule.cross.push(CompiledCross { target_id, parser });
            }
        }

        let ingredient_index = build_ingredient_index(&rules);
        for limit in &config.global_limits {
            validate_global_limit(limit, &ingredient_index, &mut errors);
        }

        check_hours(
            "Timeline",
            "default width",
            config.timeline.default_width_hours,
            &mut errors,
        );
        check_hours(
            "Timeline",
            "lookback",
            config.timeline.lookback_hours,
            &mut errors,
        );

        if !errors.is_empty() {
            for error in &errors {
                tracing::error!("Invalid configuration: {}", error);
            }
            return Err(Error::Config(errors.join("; ")));
        }

        tracing::debug!(
            "Compiled {} medication rules, {} global limits",
            rules.len(),
            config.global_limits.len()
        );

        Ok(Self {
            rules,
            by_id,
            global_limits: config.global_limits.clone(),
            ingredient_index,
            input: config.input.clone(),
            timeline: config.timeline.clone(),
        })
    }

    /// Rules in declaration order
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn rule(&self, medication_id: &str) -> Option<&CompiledRule> {
        self.by_id.get(medication_id).map(|&i| &self.rules[i])
    }

    /// Declaration position of a medication, used for stable row ordering
    pub fn position(&self, medication_id: &str) -> Option<usize> {
        self.by_id.get(medication_id).copied()
    }

    pub fn global_limits(&self) -> &[GlobalLimit] {
        &self.global_limits
    }

    /// Medications whose configuration lists `ingredient`, in declaration order
    pub fn medications_with_ingredient(&self, ingredient: &str) -> &[String] {
        self.ingredient_index
            .get(&ingredient.trim().to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn compile_rule(med: &MedicationRule) -> Result<CompiledRule> {
    let parser = CompiledParser::compile(&med.name, &med.amount_parser)?;

    let aliases = med
        .aliases
        .iter()
        .filter(|a| !a.trim().is_empty())
        .map(|a| {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(a.trim()));
            Regex::new(&pattern).map_err(|source| Error::InvalidPattern {
                medication: med.name.clone(),
                pattern,
                source,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CompiledRule {
        id: med.id(),
        name: med.name.trim().to_string(),
        display_name: med.label().to_string(),
        ingredients: med.ingredients.clone(),
        constraints: med.constraints.clone(),
        active_duration_hours: med.active_duration.as_ref().map(|d| d.typical),
        theme: med.theme.clone().unwrap_or_default(),
        parser,
        cross: Vec::new(),
        aliases,
    })
}

fn validate_rule(med: &MedicationRule, rule: &CompiledRule, errors: &mut Vec<String>) {
    if med.amount_parser.patterns.is_empty() {
        errors.push(format!("Medication '{}' has no patterns", med.name));
    }
    rule.parser.check_groups(&med.name, errors);
    check_multiplier(&med.name, &med.amount_parser, errors);

    let context = format!("Medication '{}'", med.name);
    for constraint in &med.constraints {
        check_hours(&context, "constraint window", constraint.window_hours, errors);
        check_amount(&context, "constraint max amount", constraint.max_amount, errors);
        if constraint.unit.trim().is_empty() {
            errors.push(format!("Medication '{}': constraint has empty unit", med.name));
        }
    }

    if let Some(duration) = &med.active_duration {
        check_hours(&context, "typical active duration", duration.typical, errors);
        for bound in [duration.min, duration.max].into_iter().flatten() {
            check_hours(&context, "active duration bound", bound, errors);
        }
        if let (Some(min), Some(max)) = (duration.min, duration.max) {
            if min > max {
                errors.push(format!(
                    "Medication '{}': active duration min {} > max {}",
                    med.name, min, max
                ));
            }
        }
    }
}

fn check_multiplier(medication: &str, parser: &AmountParser, errors: &mut Vec<String>) {
    if let Some(m) = parser.multiplier {
        if !m.is_finite() || m <= 0.0 {
            errors.push(format!(
                "Medication '{}': multiplier {} must be a positive number",
                medication, m
            ));
        }
    }
}

fn check_alias_collisions(medications: &[MedicationRule], errors: &mut Vec<String>) {
    let mut owners: HashMap<String, &str> = HashMap::new();
    for med in medications {
        owners.insert(med.name.trim().to_lowercase(), &med.name);
    }
    for med in medications {
        for alias in &med.aliases {
            let key = alias.trim().to_lowercase();
            match owners.get(key.as_str()) {
                Some(owner) if *owner != med.name => errors.push(format!(
                    "Alias '{}' of '{}' collides with '{}'",
                    alias, med.name, owner
                )),
                Some(_) => {}
                None => {
                    owners.insert(key, &med.name);
                }
            }
        }
    }
}

fn build_ingredient_index(rules: &[CompiledRule]) -> BTreeMap<String, Vec<String>> {
    let mut index: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for rule in rules {
        for ingredient in &rule.ingredients {
            let members = index.entry(ingredient.trim().to_lowercase()).or_default();
            if !members.contains(&rule.id) {
                members.push(rule.id.clone());
            }
        }
    }
    index
}

fn validate_global_limit(
    limit: &GlobalLimit,
    index: &BTreeMap<String, Vec<String>>,
    errors: &mut Vec<String>,
) {
    let key = limit.ingredient_name.trim().to_lowercase();
    if !index.contains_key(&key) {
        tracing::warn!(
            "Global limit for '{}': no medication lists this ingredient",
            limit.ingredient_name
        );
    }
    let context = format!("Global limit for '{}'", limit.ingredient_name);
    check_hours(&context, "window", limit.window_hours, errors);
    check_amount(&context, "max amount", limit.max_amount, errors);
    if limit.unit.trim().is_empty() {
        errors.push(format!("{}: empty unit", context));
    }
}

fn check_hours(context: &str, what: &str, hours: f64, errors: &mut Vec<String>) {
    if !is_valid_hours(hours) {
        errors.push(format!(
            "{}: {} {} must be a positive number of hours no greater than {}",
            context, what, hours, MAX_HOURS
        ));
    }
}

fn check_amount(context: &str, what: &str, amount: f64, errors: &mut Vec<String>) {
    if !amount.is_finite() || amount <= 0.0 {
        errors.push(format!(
            "{}: {} {} must be a positive number",
            context, what, amount
        ));
    }
}
