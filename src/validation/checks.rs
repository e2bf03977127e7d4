//! Per-data-type value checks
//!
//! `CompiledRules` holds a rule set together with its compiled artifacts
//! (regex, timezone) so repeated validations do not recompile them.
//! A value check never stops at the first failure: every broken rule
//! is reported.

use chrono_tz::Tz;
use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::Value;

use super::value::{coerce, document_depth, json_kind, TypedValue};
use super::violation::Violation;
use crate::errors::{EngineError, EngineResult};
use crate::rules::{resolve_timezone, Cardinality, RuleSet};

/// A rule set ready for value checking
#[derive(Debug, Clone)]
pub struct CompiledRules {
    rules: RuleSet,
    pattern: Option<Regex>,
    timezone: Option<Tz>,
}

impl CompiledRules {
    pub fn compile(rules: RuleSet) -> EngineResult<Self> {
        let pattern = match &rules {
            RuleSet::String(r) => r
                .pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|e| EngineError::InvalidRuleSet(format!("pattern does not compile: {}", e)))?,
            _ => None,
        };
        let timezone = match &rules {
            RuleSet::Datetime(r) => match r.timezone.as_deref() {
                Some(name) => Some(resolve_timezone(name).ok_or_else(|| {
                    EngineError::InvalidRuleSet(format!("timezone '{}' cannot be resolved", name))
                })?),
                None => None,
            },
            _ => None,
        };
        Ok(Self {
            rules,
            pattern,
            timezone,
        })
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Converts and checks one raw value for attribute `field`.
    pub fn check(&self, field: &str, raw: &Value) -> Result<TypedValue, Vec<Violation>> {
        let data_type = self.rules.data_type();
        let typed = coerce(data_type, raw, self.timezone)
            .map_err(|found| vec![Violation::invalid_type(field, data_type.type_name(), &found, raw)])?;

        let mut violations = Vec::new();
        self.check_typed(field, raw, &typed, &mut violations);
        if violations.is_empty() {
            Ok(typed)
        } else {
            Err(violations)
        }
    }

    fn check_typed(&self, field: &str, raw: &Value, typed: &TypedValue, out: &mut Vec<Violation>) {
        match (&self.rules, typed) {
            (RuleSet::String(r), TypedValue::String(s)) => {
                let len = s.chars().count() as u64;
                if let Some(min) = r.min_length {
                    if len < u64::from(min) {
                        out.push(Violation::rule(field, "min_length", raw, format!("length {} is below {}", len, min)));
                    }
                }
                if let Some(max) = r.max_length {
                    if len > u64::from(max) {
                        out.push(Violation::rule(field, "max_length", raw, format!("length {} exceeds {}", len, max)));
                    }
                }
                if let Some(pattern) = &self.pattern {
                    if !pattern.is_match(s) {
                        out.push(Violation::rule(field, "pattern", raw, format!("does not match '{}'", pattern.as_str())));
                    }
                }
                if let Some(allowed) = &r.allowed_values {
                    if !allowed.contains(s) {
                        out.push(Violation::rule(field, "allowed_values", raw, "value is not one of the allowed values"));
                    }
                }
            }
            (RuleSet::Integer(r), TypedValue::Integer(v)) => {
                if let Some(min) = r.min {
                    if *v < min {
                        out.push(Violation::rule(field, "min", raw, format!("value is below {}", min)));
                    }
                }
                if let Some(max) = r.max {
                    if *v > max {
                        out.push(Violation::rule(field, "max", raw, format!("value exceeds {}", max)));
                    }
                }
                if let Some(step) = r.multiple_of {
                    if step > 0 && v % step != 0 {
                        out.push(Violation::rule(field, "multiple_of", raw, format!("value is not a multiple of {}", step)));
                    }
                }
                if let Some(allowed) = &r.allowed_values {
                    if !allowed.contains(v) {
                        out.push(Violation::rule(field, "allowed_values", raw, "value is not one of the allowed values"));
                    }
                }
            }
            (RuleSet::Decimal(r), TypedValue::Decimal(d)) => {
                let v = d.as_f64();
                if let Some(min) = r.min {
                    if v < min {
                        out.push(Violation::rule(field, "min", raw, format!("value is below {}", min)));
                    }
                }
                if let Some(max) = r.max {
                    if v > max {
                        out.push(Violation::rule(field, "max", raw, format!("value exceeds {}", max)));
                    }
                }
                if let Some(step) = r.multiple_of {
                    let ratio = v / step;
                    if step > 0.0 && (ratio - ratio.round()).abs() > 1e-9 {
                        out.push(Violation::rule(field, "multiple_of", raw, format!("value is not a multiple of {}", step)));
                    }
                }
                if let Some(scale) = r.scale {
                    if d.scale() > scale {
                        out.push(Violation::rule(field, "scale", raw, format!("{} fractional digits exceed {}", d.scale(), scale)));
                    }
                }
                if let Some(precision) = r.precision {
                    let integer_room = precision.saturating_sub(r.scale.unwrap_or(0));
                    if d.precision() > precision || d.integer_digits() > integer_room {
                        out.push(Violation::rule(field, "precision", raw, format!("value does not fit precision {}", precision)));
                    }
                }
            }
            (RuleSet::Date(r), TypedValue::Date(v)) => {
                if let Some(min) = r.min {
                    if *v < min {
                        out.push(Violation::rule(field, "min", raw, format!("date is before {}", min)));
                    }
                }
                if let Some(max) = r.max {
                    if *v > max {
                        out.push(Violation::rule(field, "max", raw, format!("date is after {}", max)));
                    }
                }
            }
            (RuleSet::Datetime(r), TypedValue::Datetime(v)) => {
                if let Some(min) = r.min {
                    if *v < min {
                        out.push(Violation::rule(field, "min", raw, format!("instant is before {}", min.to_rfc3339())));
                    }
                }
                if let Some(max) = r.max {
                    if *v > max {
                        out.push(Violation::rule(field, "max", raw, format!("instant is after {}", max.to_rfc3339())));
                    }
                }
            }
            (RuleSet::Document(r), TypedValue::Document(doc)) => {
                if let Some(max_depth) = r.max_depth {
                    let depth = document_depth(doc);
                    if depth > max_depth {
                        out.push(Violation::rule(field, "max_depth", raw, format!("depth {} exceeds {}", depth, max_depth)));
                    }
                }
                if let Some(keys) = &r.required_keys {
                    match doc.as_object() {
                        Some(map) => {
                            for key in keys.iter().filter(|k| !map.contains_key(k.as_str())) {
                                out.push(Violation::rule(field, "required_keys", raw, format!("missing key '{}'", key)));
                            }
                        }
                        None => out.push(Violation::rule(
                            field,
                            "required_keys",
                            raw,
                            format!("expected an object, got {}", json_kind(doc)),
                        )),
                    }
                }
            }
            (RuleSet::Reference(r), TypedValue::Reference(ids)) => {
                if r.cardinality == Some(Cardinality::One) && ids.len() != 1 {
                    out.push(Violation::rule(
                        field,
                        "cardinality",
                        raw,
                        format!("expected exactly one reference, got {}", ids.len()),
                    ));
                }
            }
            // Boolean carries no rules; coercion guarantees matching variants otherwise
            _ => {}
        }
    }
}

impl PartialEq for CompiledRules {
    fn eq(&self, other: &Self) -> bool {
        self.rules == other.rules
    }
}

impl Serialize for CompiledRules {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.rules.serialize(serializer)
    }
}
