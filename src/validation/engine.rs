//! # Validation Engine
//!
//! Validates candidate attribute-value maps against a composed schema.
//!
//! Rules:
//! - A required attribute must be present or have a default
//! - A name the schema does not know is rejected, never dropped
//! - Each value gets one coercion attempt, then every rule is checked
//! - All violations are collected; nothing short-circuits
//! - `null` counts as absent
//!
//! Validation has no side effects: the same candidate against the same
//! schema always yields the same outcome.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::value::json_kind;
use super::violation::{ValidatedRecord, ValidationOutcome, Violation};
use crate::assignment::ClassId;
use crate::composer::{ComposedSchema, SchemaComposer};
use crate::context::TenantContext;
use crate::errors::EngineResult;
use crate::observability::{log_event, EngineMetrics, Event};

/// Field name used when the candidate itself is not an object
pub const CANDIDATE_ROOT: &str = "$";

pub struct ValidationEngine {
    composer: Arc<SchemaComposer>,
    metrics: Arc<EngineMetrics>,
}

impl ValidationEngine {
    pub fn new(composer: Arc<SchemaComposer>, metrics: Arc<EngineMetrics>) -> Self {
        Self { composer, metrics }
    }

    /// Validate a candidate against the current schema of `class_id`
    pub fn validate(
        &self,
        ctx: &TenantContext,
        class_id: &ClassId,
        candidate: &Map<String, Value>,
    ) -> EngineResult<ValidationOutcome> {
        let schema = self.composer.compose(ctx, class_id)?;
        let outcome = validate_against(&schema, candidate);

        match &outcome {
            ValidationOutcome::Accepted(_) => {
                self.metrics.increment_validations_accepted();
                log_event(
                    Event::ValidationAccepted,
                    &[
                        ("class_id", class_id.as_str()),
                        ("request_id", &ctx.request_id.to_string()),
                        ("tenant", ctx.tenant_id.as_str()),
                    ],
                );
            }
            ValidationOutcome::Rejected(violations) => {
                self.metrics.increment_validations_rejected();
                log_event(
                    Event::ValidationRejected,
                    &[
                        ("class_id", class_id.as_str()),
                        ("request_id", &ctx.request_id.to_string()),
                        ("tenant", ctx.tenant_id.as_str()),
                        ("violations", &violations.len().to_string()),
                    ],
                );
            }
        }
        Ok(outcome)
    }

    /// Like `validate`, for a candidate that may not be a JSON object
    pub fn validate_json(
        &self,
        ctx: &TenantContext,
        class_id: &ClassId,
        candidate: &Value,
    ) -> EngineResult<ValidationOutcome> {
        match candidate {
            Value::Object(map) => self.validate(ctx, class_id, map),
            other => {
                self.metrics.increment_validations_rejected();
                Ok(ValidationOutcome::Rejected(vec![Violation::invalid_type(
                    CANDIDATE_ROOT,
                    "object",
                    &json_kind(other),
                    other,
                )]))
            }
        }
    }
}

/// Validate a candidate against an already composed schema
pub fn validate_against(schema: &ComposedSchema, candidate: &Map<String, Value>) -> ValidationOutcome {
    let mut violations = Vec::new();
    let mut values = BTreeMap::new();
    let mut defaulted = Vec::new();

    for attribute in &schema.attributes {
        let name = attribute.name.as_str();
        match candidate.get(name).filter(|v| !v.is_null()) {
            Some(raw) => match attribute.rules.check(name, raw) {
                Ok(typed) => {
                    values.insert(name.to_string(), typed);
                }
                Err(found) => violations.extend(found),
            },
            None => match &attribute.default_value {
                // Defaults are rechecked: base rules may have moved since the default was stored
                Some(default) => match attribute.rules.check(name, default) {
                    Ok(typed) => {
                        values.insert(name.to_string(), typed);
                        defaulted.push(name.to_string());
                    }
                    Err(found) => violations.extend(found),
                },
                None if attribute.required => violations.push(Violation::missing_required(name)),
                None => {}
            },
        }
    }

    for (name, raw) in candidate {
        if schema.attribute(name).is_none() {
            violations.push(Violation::unknown_attribute(name.clone(), raw));
        }
    }

    if violations.is_empty() {
        ValidationOutcome::Accepted(ValidatedRecord {
            class_id: schema.class_id.to_string(),
            schema_hash: schema.content_hash.clone(),
            values,
            defaulted,
        })
    } else {
        ValidationOutcome::Rejected(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::{AssignmentId, ClassId};
    use crate::catalog::AttributeId;
    use crate::composer::SchemaAttribute;
    use crate::context::TenantId;
    use crate::rules::{DataType, IntegerRules, RuleSet, StringRules};
    use crate::validation::{CompiledRules, TypedValue, ViolationKind};
    use serde_json::json;

    fn attribute(name: &str, rules: RuleSet, required: bool, position: i32, default_value: Option<Value>) -> SchemaAttribute {
        SchemaAttribute {
            attribute_id: AttributeId::new(),
            assignment_id: AssignmentId::new(),
            name: name.into(),
            display_name: None,
            data_type: rules.data_type(),
            rules: CompiledRules::compile(rules).unwrap(),
            advisories: Vec::new(),
            required,
            sort_position: position,
            default_value,
            attribute_version: 1,
            assignment_version: 1,
        }
    }

    fn person_schema() -> ComposedSchema {
        ComposedSchema::new(
            TenantId::parse("acme").unwrap(),
            ClassId::parse("Person").unwrap(),
            vec![
                attribute(
                    "age",
                    RuleSet::Integer(IntegerRules { min: Some(0), ..Default::default() }),
                    true,
                    0,
                    None,
                ),
                attribute(
                    "nickname",
                    RuleSet::String(StringRules { max_length: Some(8), ..Default::default() }),
                    false,
                    1,
                    None,
                ),
                attribute(
                    "country",
                    RuleSet::unconstrained(DataType::String),
                    true,
                    2,
                    Some(json!("NZ")),
                ),
            ],
            None,
        )
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_accepts_and_types_values() {
        let outcome = validate_against(&person_schema(), &object(json!({"age": "42"})));
        let record = outcome.record().expect("accepted");
        assert_eq!(record.values["age"], TypedValue::Integer(42));
        assert_eq!(record.values["country"], TypedValue::String("NZ".into()));
        assert_eq!(record.defaulted, vec!["country".to_string()]);
        assert!(!record.values.contains_key("nickname"));
    }

    #[test]
    fn test_missing_required() {
        let outcome = validate_against(&person_schema(), &object(json!({})));
        let violations = outcome.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "age");
        assert_eq!(violations[0].rule, "required");
        assert_eq!(violations[0].kind, ViolationKind::MissingRequired);
    }

    #[test]
    fn test_null_counts_as_absent() {
        let outcome = validate_against(&person_schema(), &object(json!({"age": null})));
        assert_eq!(outcome.violations()[0].kind, ViolationKind::MissingRequired);
    }

    #[test]
    fn test_collects_every_violation() {
        let outcome = validate_against(
            &person_schema(),
            &object(json!({"age": -1, "nickname": "much too long", "shoe_size": 44})),
        );
        let rules: Vec<_> = outcome.violations().iter().map(|v| (v.field.as_str(), v.rule.as_str())).collect();
        assert_eq!(
            rules,
            vec![("age", "min"), ("nickname", "max_length"), ("shoe_size", "unknown")]
        );
    }

    #[test]
    fn test_invalid_type() {
        let outcome = validate_against(&person_schema(), &object(json!({"age": "forty"})));
        assert_eq!(outcome.violations()[0].kind, ViolationKind::InvalidType);
        assert_eq!(outcome.violations()[0].value, Some(json!("forty")));
    }

    #[test]
    fn test_stale_default_is_reported() {
        let schema = ComposedSchema::new(
            TenantId::parse("acme").unwrap(),
            ClassId::parse("Person").unwrap(),
            vec![attribute(
                "age",
                RuleSet::Integer(IntegerRules { min: Some(18), ..Default::default() }),
                true,
                0,
                Some(json!(10)),
            )],
            None,
        );
        let outcome = validate_against(&schema, &object(json!({})));
        assert_eq!(outcome.violations()[0].rule, "min");
    }

    #[test]
    fn test_empty_schema_rejects_any_field() {
        let schema = ComposedSchema::new(
            TenantId::parse("acme").unwrap(),
            ClassId::parse("Empty").unwrap(),
            Vec::new(),
            None,
        );
        assert!(validate_against(&schema, &Map::new()).is_accepted());
        let outcome = validate_against(&schema, &object(json!({"x": 1})));
        assert_eq!(outcome.violations()[0].kind, ViolationKind::UnknownAttribute);
    }

    #[test]
    fn test_repeatable() {
        let schema = person_schema();
        let candidate = object(json!({"age": 7, "nickname": "kit"}));
        assert_eq!(validate_against(&schema, &candidate), validate_against(&schema, &candidate));
    }
}
