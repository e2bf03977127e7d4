//! Validation Invariant Tests
//!
//! - Required attributes must be present or defaulted
//! - Unknown attributes are rejected, never dropped
//! - Every violation is reported in one pass
//! - Validation is deterministic and side-effect free

use std::sync::Arc;

use formwork::assignment::{ClassId, NewAssignment};
use formwork::catalog::NewAttribute;
use formwork::composer::InMemorySchemaCache;
use formwork::evolution::MemoryEvolutionLog;
use formwork::external::{InMemoryClassRegistry, InMemoryInstanceStore};
use formwork::rules::{DataType, DateRules, IntegerRules, RuleSet, StringRules};
use formwork::validation::{TypedValue, ValidationOutcome, ViolationKind};
use formwork::{SchemaService, TenantContext};
use serde_json::{json, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (SchemaService, TenantContext, ClassId) {
    let ctx = TenantContext::new("acme", "tester").unwrap();
    let person = ClassId::parse("Person").unwrap();
    let registry = Arc::new(InMemoryClassRegistry::new());
    registry.add_class(&ctx.tenant_id, person.clone()).unwrap();
    let service = SchemaService::new(
        registry,
        Arc::new(InMemoryInstanceStore::new()),
        Arc::new(InMemorySchemaCache::new(64)),
        Arc::new(MemoryEvolutionLog::new()),
    );

    let age = service
        .create_attribute(
            &ctx,
            NewAttribute::new("age", DataType::Integer).with_rules(RuleSet::Integer(IntegerRules {
                min: Some(0),
                ..Default::default()
            })),
        )
        .unwrap()
        .entity;
    service
        .create_assignment(&ctx, NewAssignment::new(person.clone(), age.id, 0).required(), false)
        .unwrap();

    (service, ctx, person)
}

fn validate(service: &SchemaService, ctx: &TenantContext, class: &ClassId, candidate: Value) -> ValidationOutcome {
    service
        .validate(ctx, class, candidate.as_object().unwrap())
        .unwrap()
}

// =============================================================================
// Person Scenario
// =============================================================================

#[test]
fn test_person_schema() {
    let (service, ctx, person) = setup();
    let schema = service.compose(&ctx, &person).unwrap();

    assert_eq!(schema.attributes.len(), 1);
    let age = &schema.attributes[0];
    assert_eq!(age.name, "age");
    assert_eq!(age.data_type, DataType::Integer);
    assert!(age.required);
    assert_eq!(
        age.rules.rules(),
        &RuleSet::Integer(IntegerRules {
            min: Some(0),
            ..Default::default()
        })
    );
}

#[test]
fn test_person_accepts_valid_age() {
    let (service, ctx, person) = setup();
    let outcome = validate(&service, &ctx, &person, json!({"age": 5}));
    assert_eq!(outcome.record().unwrap().values["age"], TypedValue::Integer(5));
}

#[test]
fn test_person_rejects_negative_age() {
    let (service, ctx, person) = setup();
    let outcome = validate(&service, &ctx, &person, json!({"age": -1}));
    let violations = outcome.violations();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].field, "age");
    assert_eq!(violations[0].rule, "min");
    assert_eq!(violations[0].value, Some(json!(-1)));
}

#[test]
fn test_person_rejects_missing_age() {
    let (service, ctx, person) = setup();
    let outcome = validate(&service, &ctx, &person, json!({}));
    let violations = outcome.violations();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].field, "age");
    assert_eq!(violations[0].rule, "required");
}

// =============================================================================
// Collection and Policy Tests
// =============================================================================

/// One round trip surfaces every problem.
#[test]
fn test_all_violations_reported() {
    let (service, ctx, person) = setup();
    let code = service
        .create_attribute(
            &ctx,
            NewAttribute::new("code", DataType::String).with_rules(RuleSet::String(StringRules {
                max_length: Some(3),
                pattern: Some("^[A-Z]+$".into()),
                ..Default::default()
            })),
        )
        .unwrap()
        .entity;
    service
        .create_assignment(&ctx, NewAssignment::new(person.clone(), code.id, 1), false)
        .unwrap();

    let outcome = validate(&service, &ctx, &person, json!({"age": "old", "code": "abcd", "extra": true}));
    let found: Vec<_> = outcome
        .violations()
        .iter()
        .map(|v| (v.field.as_str(), v.kind))
        .collect();

    assert!(found.contains(&("age", ViolationKind::InvalidType)));
    assert!(found.contains(&("extra", ViolationKind::UnknownAttribute)));
    let code_rules: Vec<_> = outcome
        .violations()
        .iter()
        .filter(|v| v.field == "code")
        .map(|v| v.rule.as_str())
        .collect();
    assert_eq!(code_rules.len(), 2);
    assert!(code_rules.contains(&"max_length"));
    assert!(code_rules.contains(&"pattern"));
}

#[test]
fn test_default_fills_missing_optional() {
    let (service, ctx, person) = setup();
    let joined = service
        .create_attribute(
            &ctx,
            NewAttribute::new("joined", DataType::Date).with_rules(RuleSet::Date(DateRules::default())),
        )
        .unwrap()
        .entity;
    service
        .create_assignment(
            &ctx,
            NewAssignment::new(person.clone(), joined.id, 1).with_default(json!("2024-01-31")),
            false,
        )
        .unwrap();

    let outcome = validate(&service, &ctx, &person, json!({"age": 30}));
    let record = outcome.record().unwrap();
    assert_eq!(record.defaulted, vec!["joined".to_string()]);
    assert!(matches!(record.values["joined"], TypedValue::Date(_)));
}

#[test]
fn test_non_object_candidate() {
    let (service, ctx, person) = setup();
    let outcome = service.validate_json(&ctx, &person, &json!([1, 2])).unwrap();
    assert_eq!(outcome.violations()[0].kind, ViolationKind::InvalidType);
}

#[test]
fn test_class_without_assignments_accepts_only_empty() {
    let (service, ctx, _) = setup();
    let empty = ClassId::parse("Empty").unwrap();
    assert!(validate(&service, &ctx, &empty, json!({})).is_accepted());
    assert!(!validate(&service, &ctx, &empty, json!({"age": 1})).is_accepted());
}

// =============================================================================
// Determinism Tests
// =============================================================================

/// Same candidate validates the same way every time.
#[test]
fn test_validation_is_deterministic() {
    let (service, ctx, person) = setup();
    let candidate = json!({"age": -4, "nickname": "x"});
    let first = validate(&service, &ctx, &person, candidate.clone());

    for _ in 0..100 {
        assert_eq!(validate(&service, &ctx, &person, candidate.clone()), first);
    }
}

/// Validation never changes the schema it reads.
#[test]
fn test_validation_has_no_side_effects() {
    let (service, ctx, person) = setup();
    let before = service.compose(&ctx, &person).unwrap();
    for age in [-1, 0, 1] {
        validate(&service, &ctx, &person, json!({"age": age}));
    }
    let after = service.compose(&ctx, &person).unwrap();
    assert_eq!(before.content_hash, after.content_hash);
    assert!(service.tenant_history(&ctx).unwrap().len() == 2);
}
