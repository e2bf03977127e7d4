//! Evolution Invariant Tests
//!
//! - A change that invalidates stored instances is breaking
//! - Breaking changes are refused unless forced
//! - A base change never leaves a stored default invalid
//! - Every applied change leaves an evolution record
//! - Rollback is a new version-checked change, never a rewrite

use std::sync::Arc;

use formwork::assignment::{AssignmentPatch, ClassId, NewAssignment};
use formwork::catalog::{AttributeDefinition, AttributePatch, NewAttribute};
use formwork::composer::InMemorySchemaCache;
use formwork::config::EngineConfig;
use formwork::evolution::{
    AssignmentChange, EvolutionAction, EvolutionLog, FileEvolutionLog, MemoryEvolutionLog, SafetyLevel,
};
use formwork::external::{InMemoryClassRegistry, InMemoryInstanceStore, InstanceValues};
use formwork::rules::{DataType, DecimalRules, IntegerRules, RuleSet};
use formwork::{EngineError, SchemaEntity, SchemaService, TenantContext};
use serde_json::json;

// =============================================================================
// Helper Functions
// =============================================================================

struct Fixture {
    service: SchemaService,
    store: Arc<InMemoryInstanceStore>,
    ctx: TenantContext,
    person: ClassId,
    age: AttributeDefinition,
}

fn age_rules(min: Option<i64>, max: Option<i64>) -> RuleSet {
    RuleSet::Integer(IntegerRules {
        min,
        max,
        ..Default::default()
    })
}

fn build(service: SchemaService, registry: Arc<InMemoryClassRegistry>, store: Arc<InMemoryInstanceStore>) -> Fixture {
    let ctx = TenantContext::new("acme", "tester").unwrap();
    let person = ClassId::parse("Person").unwrap();
    registry.add_class(&ctx.tenant_id, person.clone()).unwrap();

    let age = service
        .create_attribute(
            &ctx,
            NewAttribute::new("age", DataType::Integer).with_rules(age_rules(Some(0), None)),
        )
        .unwrap()
        .entity;
    service
        .create_assignment(&ctx, NewAssignment::new(person.clone(), age.id, 0).required(), false)
        .unwrap();

    Fixture {
        service,
        store,
        ctx,
        person,
        age,
    }
}

fn fixture() -> Fixture {
    let registry = Arc::new(InMemoryClassRegistry::new());
    let store = Arc::new(InMemoryInstanceStore::new());
    let service = SchemaService::new(
        registry.clone(),
        store.clone(),
        Arc::new(InMemorySchemaCache::new(64)),
        Arc::new(MemoryEvolutionLog::new()),
    );
    build(service, registry, store)
}

fn add_people(f: &Fixture, ages: &[i64]) {
    for age in ages {
        let mut values = InstanceValues::new();
        values.insert(f.age.id, json!(age));
        f.store.add_instance(&f.ctx.tenant_id, &f.person, values).unwrap();
    }
}

// =============================================================================
// Breaking Change Detection
// =============================================================================

/// Three stored ages above the new maximum make the change breaking.
#[test]
fn test_narrowing_with_violations_is_breaking() {
    let f = fixture();
    add_people(&f, &[30, 121, 150, 200]);

    let report = f
        .service
        .analyze_attribute_change(&f.ctx, f.age.id, &AttributePatch::rules(age_rules(Some(0), Some(120))))
        .unwrap();

    assert_eq!(report.safety_level, SafetyLevel::Breaking);
    assert_eq!(report.affected_instance_count, 3);
    assert_eq!(report.affected_assignment_count, 1);
    assert!(!report.recommended_actions.is_empty());
}

#[test]
fn test_narrowing_without_violations_is_warning() {
    let f = fixture();
    add_people(&f, &[30, 40]);

    let report = f
        .service
        .analyze_attribute_change(&f.ctx, f.age.id, &AttributePatch::rules(age_rules(Some(0), Some(120))))
        .unwrap();
    assert_eq!(report.safety_level, SafetyLevel::Warning);
}

#[test]
fn test_relaxing_is_safe() {
    let f = fixture();
    add_people(&f, &[30]);

    let report = f
        .service
        .analyze_attribute_change(&f.ctx, f.age.id, &AttributePatch::rules(age_rules(None, None)))
        .unwrap();
    assert_eq!(report.safety_level, SafetyLevel::Safe);
    assert_eq!(report.affected_instance_count, 0);
}

#[test]
fn test_new_required_assignment_on_populated_class() {
    let f = fixture();
    add_people(&f, &[30, 31]);
    let nickname = f
        .service
        .create_attribute(&f.ctx, NewAttribute::new("nickname", DataType::String))
        .unwrap()
        .entity;

    let input = NewAssignment::new(f.person.clone(), nickname.id, 1).required();
    let report = f
        .service
        .analyze_assignment_change(&f.ctx, &AssignmentChange::Create(input.clone()))
        .unwrap();
    assert_eq!(report.safety_level, SafetyLevel::Breaking);
    assert_eq!(report.affected_instance_count, 2);

    let defaulted = input.with_default(json!("anon"));
    let report = f
        .service
        .analyze_assignment_change(&f.ctx, &AssignmentChange::Create(defaulted))
        .unwrap();
    assert_eq!(report.safety_level, SafetyLevel::Warning);
}

/// Analysis never writes.
/// Same precision, larger scale: fewer integer digits, so 123.45 no longer fits.
#[test]
fn test_scale_increase_at_fixed_precision_is_breaking() {
    let f = fixture();
    let decimal = |precision, scale| {
        RuleSet::Decimal(DecimalRules {
            precision: Some(precision),
            scale: Some(scale),
            ..Default::default()
        })
    };
    let price = f
        .service
        .create_attribute(&f.ctx, NewAttribute::new("price", DataType::Decimal).with_rules(decimal(5, 2)))
        .unwrap()
        .entity;
    f.service
        .create_assignment(&f.ctx, NewAssignment::new(f.person.clone(), price.id, 1), false)
        .unwrap();
    let mut values = InstanceValues::new();
    values.insert(price.id, json!("123.45"));
    f.store.add_instance(&f.ctx.tenant_id, &f.person, values).unwrap();

    let patch = AttributePatch::rules(decimal(5, 4));
    let report = f.service.analyze_attribute_change(&f.ctx, price.id, &patch).unwrap();
    assert_eq!(report.safety_level, SafetyLevel::Breaking);
    assert_eq!(report.affected_instance_count, 1);

    let err = f
        .service
        .update_attribute(&f.ctx, price.id, patch, price.version, false)
        .unwrap_err();
    assert!(matches!(err, EngineError::BreakingChangeNotForced { .. }));
    assert_eq!(f.service.get_attribute(&f.ctx, price.id).unwrap().version, price.version);
}

#[test]
fn test_analysis_is_read_only() {
    let f = fixture();
    add_people(&f, &[150]);
    f.service
        .analyze_attribute_change(&f.ctx, f.age.id, &AttributePatch::rules(age_rules(Some(0), Some(120))))
        .unwrap();

    assert_eq!(f.service.get_attribute(&f.ctx, f.age.id).unwrap().version, 1);
    assert_eq!(f.service.tenant_history(&f.ctx).unwrap().len(), 2);
}

// =============================================================================
// Gating Tests
// =============================================================================

#[test]
fn test_breaking_change_refused_without_force() {
    let f = fixture();
    add_people(&f, &[150]);

    let err = f
        .service
        .update_attribute(&f.ctx, f.age.id, AttributePatch::rules(age_rules(Some(0), Some(120))), 1, false)
        .unwrap_err();
    match err {
        EngineError::BreakingChangeNotForced { report } => {
            assert_eq!(report.affected_instance_count, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(f.service.get_attribute(&f.ctx, f.age.id).unwrap().version, 1);
    assert_eq!(f.service.metrics().breaking_changes_blocked, 1);
}

#[test]
fn test_forced_breaking_change_is_recorded() {
    let f = fixture();
    add_people(&f, &[150]);

    let outcome = f
        .service
        .update_attribute(&f.ctx, f.age.id, AttributePatch::rules(age_rules(Some(0), Some(120))), 1, true)
        .unwrap();
    assert_eq!(outcome.entity.version, 2);
    assert!(outcome.report.is_breaking());

    let history = f.service.history(&f.ctx, f.age.id.as_uuid()).unwrap();
    let last = history.last().unwrap();
    assert_eq!(Some(last.id), outcome.record_id);
    assert_eq!(last.action, EvolutionAction::AttributeUpdated);
    assert_eq!(last.safety_level, SafetyLevel::Breaking);
    assert!(last.forced);
    assert_eq!(last.resulting_version, 2);
}

#[test]
fn test_required_flip_refused_then_allowed_with_default() {
    let f = fixture();
    let nickname = f
        .service
        .create_attribute(&f.ctx, NewAttribute::new("nickname", DataType::String))
        .unwrap()
        .entity;
    let assignment = f
        .service
        .create_assignment(&f.ctx, NewAssignment::new(f.person.clone(), nickname.id, 1), false)
        .unwrap()
        .entity;
    add_people(&f, &[30]);

    let flip = AssignmentPatch {
        required: Some(true),
        ..Default::default()
    };
    let err = f
        .service
        .update_assignment(&f.ctx, assignment.id, flip.clone(), assignment.version, false)
        .unwrap_err();
    assert!(matches!(err, EngineError::BreakingChangeNotForced { .. }));

    let with_default = AssignmentPatch {
        default_value: Some(Some(json!("anon"))),
        ..flip
    };
    let updated = f
        .service
        .update_assignment(&f.ctx, assignment.id, with_default, assignment.version, false)
        .unwrap();
    assert!(updated.entity.required);
    assert_eq!(updated.report.safety_level, SafetyLevel::Warning);
}

/// Forcing does not help: the default would fail every validation that uses it.
#[test]
fn test_base_change_rejecting_stored_default_is_refused() {
    let f = fixture();
    let level = f
        .service
        .create_attribute(
            &f.ctx,
            NewAttribute::new("level", DataType::Integer).with_rules(age_rules(Some(0), None)),
        )
        .unwrap()
        .entity;
    f.service
        .create_assignment(
            &f.ctx,
            NewAssignment::new(f.person.clone(), level.id, 1).with_default(json!(5)),
            false,
        )
        .unwrap();

    for force in [false, true] {
        let err = f
            .service
            .update_attribute(&f.ctx, level.id, AttributePatch::rules(age_rules(Some(18), None)), level.version, force)
            .unwrap_err();
        match err {
            EngineError::DefaultValueInvalid { violations } => {
                assert_eq!(violations[0].field, "level");
                assert_eq!(violations[0].rule, "min");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(f.service.get_attribute(&f.ctx, level.id).unwrap().version, level.version);
    let outcome = f
        .service
        .validate(&f.ctx, &f.person, json!({"age": 30}).as_object().unwrap())
        .unwrap();
    assert!(outcome.is_accepted());
}

// =============================================================================
// History and Rollback Tests
// =============================================================================

#[test]
fn test_rollback_restores_previous_rules() {
    let f = fixture();
    let updated = f
        .service
        .update_attribute(&f.ctx, f.age.id, AttributePatch::rules(age_rules(Some(0), Some(120))), 1, false)
        .unwrap();
    let record_id = updated.record_id.unwrap();

    let outcome = f.service.rollback(&f.ctx, record_id, false).unwrap();
    match &outcome.entity {
        SchemaEntity::Attribute(attr) => {
            assert_eq!(attr.base_rules, age_rules(Some(0), None));
            assert_eq!(attr.version, 3);
        }
        other => panic!("unexpected entity: {other:?}"),
    }

    let history = f.service.history(&f.ctx, f.age.id.as_uuid()).unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].rolled_back_from, Some(record_id));

    let schema = f.service.compose(&f.ctx, &f.person).unwrap();
    assert_eq!(schema.attributes[0].rules.rules(), &age_rules(Some(0), None));
}

/// A record can only be rolled back while its entity is unchanged.
#[test]
fn test_rollback_of_stale_record_conflicts() {
    let f = fixture();
    let first = f
        .service
        .update_attribute(&f.ctx, f.age.id, AttributePatch::rules(age_rules(Some(0), Some(120))), 1, false)
        .unwrap();
    f.service
        .update_attribute(&f.ctx, f.age.id, AttributePatch::rules(age_rules(Some(0), Some(130))), 2, false)
        .unwrap();

    let err = f.service.rollback(&f.ctx, first.record_id.unwrap(), false).unwrap_err();
    assert!(matches!(err, EngineError::VersionConflict { expected: 2, actual: 3, .. }));
}

#[test]
fn test_rollback_of_assignment_create_deletes_it() {
    let f = fixture();
    let created = f
        .service
        .tenant_history(&f.ctx)
        .unwrap()
        .into_iter()
        .find(|r| r.action == EvolutionAction::AssignmentCreated)
        .unwrap();

    let outcome = f.service.rollback(&f.ctx, created.id, false).unwrap();
    assert!(matches!(outcome.entity, SchemaEntity::Assignment(ref a) if !a.is_active()));
    assert!(f.service.compose(&f.ctx, &f.person).unwrap().is_empty());

    let delete_record = outcome.record_id.unwrap();
    let err = f.service.rollback(&f.ctx, delete_record, false).unwrap_err();
    assert!(matches!(err, EngineError::RollbackUnsupported(_)));
}

#[test]
fn test_unknown_record() {
    let f = fixture();
    let err = f.service.rollback(&f.ctx, uuid::Uuid::new_v4(), false).unwrap_err();
    assert!(matches!(err, EngineError::EvolutionRecordNotFound(_)));
}

/// Records written through a file log survive reopening it.
#[test]
fn test_file_evolution_log_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evolution.jsonl");
    let config = EngineConfig {
        evolution_log_path: Some(path.clone()),
        ..Default::default()
    };

    let registry = Arc::new(InMemoryClassRegistry::new());
    let store = Arc::new(InMemoryInstanceStore::new());
    let service = SchemaService::from_config(&config, registry.clone(), store.clone()).unwrap();
    let f = build(service, registry, store);
    f.service
        .update_attribute(&f.ctx, f.age.id, AttributePatch::rules(age_rules(Some(0), Some(120))), 1, false)
        .unwrap();
    drop(f);

    let reopened = FileEvolutionLog::open(&path).unwrap();
    let tenant = formwork::TenantId::parse("acme").unwrap();
    let records = reopened.for_tenant(&tenant).unwrap();
    let actions: Vec<_> = records.iter().map(|r| r.action).collect();
    assert_eq!(
        actions,
        vec![
            EvolutionAction::AttributeCreated,
            EvolutionAction::AssignmentCreated,
            EvolutionAction::AttributeUpdated,
        ]
    );
    assert!(records.iter().all(|r| r.actor == "tester"));
}
