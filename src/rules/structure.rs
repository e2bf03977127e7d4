//! Structural validation of rule sets
//!
//! A rule set is structurally valid when it can be satisfied by at least one
//! value and every referenced artifact (regex, timezone) resolves.
//! All problems are collected before failing.

use std::str::FromStr;

use chrono_tz::Tz;
use regex::Regex;

use super::types::{
    DataType, DateRules, DateTimeRules, DecimalRules, DocumentRules, IntegerRules, ReferenceRules,
    RuleSet, StringRules,
};
use crate::errors::{EngineError, EngineResult};

/// Deepest structured document a rule set may allow
pub const MAX_DOCUMENT_DEPTH: u32 = 10;

/// Largest decimal precision a rule set may declare
pub const MAX_DECIMAL_PRECISION: u32 = 38;

/// Checks a rule set against the data type it is meant for.
pub fn check_structure(data_type: DataType, rules: &RuleSet) -> EngineResult<()> {
    if rules.data_type() != data_type {
        return Err(EngineError::InvalidRuleSet(format!(
            "rule set for '{}' cannot constrain a '{}' attribute",
            rules.data_type(),
            data_type
        )));
    }

    let problems = match rules {
        RuleSet::String(r) => check_string(r),
        RuleSet::Integer(r) => check_integer(r),
        RuleSet::Decimal(r) => check_decimal(r),
        RuleSet::Boolean(_) => Vec::new(),
        RuleSet::Date(r) => check_date(r),
        RuleSet::Datetime(r) => check_datetime(r),
        RuleSet::Document(r) => check_document(r),
        RuleSet::Reference(r) => check_reference(r),
    };

    if problems.is_empty() {
        Ok(())
    } else {
        Err(EngineError::InvalidRuleSet(problems.join("; ")))
    }
}

/// Resolves an IANA timezone name
pub fn resolve_timezone(name: &str) -> Option<Tz> {
    Tz::from_str(name).ok()
}

fn check_string(r: &StringRules) -> Vec<String> {
    let mut problems = Vec::new();
    if let (Some(min), Some(max)) = (r.min_length, r.max_length) {
        if min > max {
            problems.push(format!("min_length {} exceeds max_length {}", min, max));
        }
    }
    if let Some(pattern) = &r.pattern {
        if let Err(e) = Regex::new(pattern) {
            problems.push(format!("pattern does not compile: {}", e));
        }
    }
    if let Some(values) = &r.allowed_values {
        if values.is_empty() {
            problems.push("allowed_values must not be empty".into());
        }
        for value in values {
            let len = value.chars().count() as u32;
            let too_short = r.min_length.is_some_and(|min| len < min);
            let too_long = r.max_length.is_some_and(|max| len > max);
            if too_short || too_long {
                problems.push(format!("allowed value '{}' violates the length bounds", value));
            }
        }
    }
    problems
}

fn check_integer(r: &IntegerRules) -> Vec<String> {
    let mut problems = Vec::new();
    if let (Some(min), Some(max)) = (r.min, r.max) {
        if min > max {
            problems.push(format!("min {} exceeds max {}", min, max));
        }
    }
    if let Some(step) = r.multiple_of {
        if step <= 0 {
            problems.push(format!("multiple_of must be > 0, got {}", step));
        }
    }
    if let Some(values) = &r.allowed_values {
        if values.is_empty() {
            problems.push("allowed_values must not be empty".into());
        }
    }
    problems
}

fn check_decimal(r: &DecimalRules) -> Vec<String> {
    let mut problems = Vec::new();
    for (name, bound) in [("min", r.min), ("max", r.max), ("multiple_of", r.multiple_of)] {
        if bound.is_some_and(|v| !v.is_finite()) {
            problems.push(format!("{} must be finite", name));
        }
    }
    if let (Some(min), Some(max)) = (r.min, r.max) {
        if min > max {
            problems.push(format!("min {} exceeds max {}", min, max));
        }
    }
    if let Some(step) = r.multiple_of {
        if step <= 0.0 {
            problems.push(format!("multiple_of must be > 0, got {}", step));
        }
    }
    if let Some(precision) = r.precision {
        if precision == 0 || precision > MAX_DECIMAL_PRECISION {
            problems.push(format!(
                "precision must be within [1, {}], got {}",
                MAX_DECIMAL_PRECISION, precision
            ));
        }
    }
    if let (Some(precision), Some(scale)) = (r.precision, r.scale) {
        if scale > precision {
            problems.push(format!("scale {} exceeds precision {}", scale, precision));
        }
    }
    problems
}

fn check_date(r: &DateRules) -> Vec<String> {
    match (r.min, r.max) {
        (Some(min), Some(max)) if min > max => vec![format!("min {} is after max {}", min, max)],
        _ => Vec::new(),
    }
}

fn check_datetime(r: &DateTimeRules) -> Vec<String> {
    let mut problems = Vec::new();
    if let (Some(min), Some(max)) = (r.min, r.max) {
        if min > max {
            problems.push(format!("min {} is after max {}", min.to_rfc3339(), max.to_rfc3339()));
        }
    }
    if let Some(tz) = &r.timezone {
        if resolve_timezone(tz).is_none() {
            problems.push(format!("timezone '{}' cannot be resolved", tz));
        }
    }
    problems
}

fn check_document(r: &DocumentRules) -> Vec<String> {
    let mut problems = Vec::new();
    if let Some(depth) = r.max_depth {
        if !(1..=MAX_DOCUMENT_DEPTH).contains(&depth) {
            problems.push(format!(
                "max_depth must be within [1, {}], got {}",
                MAX_DOCUMENT_DEPTH, depth
            ));
        }
    }
    if let Some(keys) = &r.required_keys {
        if keys.iter().any(|k| k.is_empty()) {
            problems.push("required_keys must not contain empty keys".into());
        }
    }
    problems
}

fn check_reference(r: &ReferenceRules) -> Vec<String> {
    match &r.target_class {
        Some(target) if target.trim().is_empty() => vec!["target_class must not be empty".into()],
        _ => Vec::new(),
    }
}
