//! Composition and Concurrency Invariant Tests
//!
//! - Composed schemas are ordered by sort position
//! - The content hash depends on content, not on assembly order
//! - Cached schemas never outlive a write
//! - Concurrent writers at the same version: exactly one wins
//! - Tenants never see each other's definitions

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use formwork::assignment::{AssignmentPatch, AssignmentRecord, ClassId, NewAssignment};
use formwork::catalog::{AttributePatch, NewAttribute};
use formwork::composer::{content_hash, InMemorySchemaCache};
use formwork::evolution::MemoryEvolutionLog;
use formwork::external::{InMemoryClassRegistry, InMemoryInstanceStore};
use formwork::rules::{DataType, IntegerRules, RuleSet, StringRules};
use formwork::{EngineError, SchemaService, TenantContext};

// =============================================================================
// Helper Functions
// =============================================================================

fn service_with_classes(tenants: &[&str], classes: &[&str]) -> SchemaService {
    let registry = Arc::new(InMemoryClassRegistry::new());
    for tenant in tenants {
        let ctx = TenantContext::new(*tenant, "tester").unwrap();
        for class in classes {
            registry
                .add_class(&ctx.tenant_id, ClassId::parse(*class).unwrap())
                .unwrap();
        }
    }
    SchemaService::new(
        registry,
        Arc::new(InMemoryInstanceStore::new()),
        Arc::new(InMemorySchemaCache::new(64)),
        Arc::new(MemoryEvolutionLog::new()),
    )
}

fn ctx(tenant: &str) -> TenantContext {
    TenantContext::new(tenant, "tester").unwrap()
}

fn assign(service: &SchemaService, ctx: &TenantContext, class: &ClassId, name: &str, position: i32) -> AssignmentRecord {
    let attr = service
        .create_attribute(ctx, NewAttribute::new(name, DataType::String))
        .unwrap()
        .entity;
    service
        .create_assignment(ctx, NewAssignment::new(class.clone(), attr.id, position), false)
        .unwrap()
        .entity
}

// =============================================================================
// Ordering and Hash Tests
// =============================================================================

#[test]
fn test_attributes_ordered_by_sort_position() {
    let service = service_with_classes(&["acme"], &["Person"]);
    let ctx = ctx("acme");
    let person = ClassId::parse("Person").unwrap();
    assign(&service, &ctx, &person, "zeta", 0);
    assign(&service, &ctx, &person, "alpha", 20);
    assign(&service, &ctx, &person, "mid", 10);

    let schema = service.compose(&ctx, &person).unwrap();
    let names: Vec<_> = schema.attributes.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["zeta", "mid", "alpha"]);
}

/// Hashing the same attributes in any order gives the same hash.
#[test]
fn test_hash_is_order_independent() {
    let service = service_with_classes(&["acme"], &["Person"]);
    let ctx = ctx("acme");
    let person = ClassId::parse("Person").unwrap();
    for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
        assign(&service, &ctx, &person, name, i as i32);
    }

    let schema = service.compose(&ctx, &person).unwrap();
    let mut reversed = schema.attributes.clone();
    reversed.reverse();
    assert_eq!(content_hash(&reversed), schema.content_hash);
    assert_eq!(content_hash(&schema.attributes), schema.content_hash);
}

#[test]
fn test_hash_tracks_content() {
    let service = service_with_classes(&["acme"], &["Person"]);
    let ctx = ctx("acme");
    let person = ClassId::parse("Person").unwrap();
    let record = assign(&service, &ctx, &person, "name", 0);
    let before = service.compose(&ctx, &person).unwrap().content_hash.clone();

    // Recomposition without a change is stable
    assert_eq!(service.compose_fresh(&ctx, &person).unwrap().content_hash, before);

    let patch = AssignmentPatch {
        sort_position: Some(5),
        ..Default::default()
    };
    service
        .update_assignment(&ctx, record.id, patch, record.version, false)
        .unwrap();
    assert_ne!(service.compose(&ctx, &person).unwrap().content_hash, before);
}

// =============================================================================
// Cache Tests
// =============================================================================

#[test]
fn test_cache_hit_then_invalidated_by_write() {
    let service = service_with_classes(&["acme"], &["Person"]);
    let ctx = ctx("acme");
    let person = ClassId::parse("Person").unwrap();
    let attr = service
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
        .create_assignment(&ctx, NewAssignment::new(person.clone(), attr.id, 0), false)
        .unwrap();

    let first = service.compose(&ctx, &person).unwrap();
    let second = service.compose(&ctx, &person).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(service.cache_stats().hits >= 1);

    let relaxed = RuleSet::Integer(IntegerRules::default());
    service
        .update_attribute(&ctx, attr.id, AttributePatch::rules(relaxed.clone()), 1, false)
        .unwrap();

    let third = service.compose(&ctx, &person).unwrap();
    assert_ne!(third.content_hash, first.content_hash);
    assert_eq!(third.attributes[0].rules.rules(), &relaxed);
    assert!(service.cache_stats().invalidations >= 1);
}

/// A rule change on an attribute shared by two classes reaches both.
#[test]
fn test_shared_attribute_change_reaches_every_class() {
    let service = service_with_classes(&["acme"], &["Person", "Company"]);
    let ctx = ctx("acme");
    let person = ClassId::parse("Person").unwrap();
    let company = ClassId::parse("Company").unwrap();
    let name = service
        .create_attribute(&ctx, NewAttribute::new("name", DataType::String))
        .unwrap()
        .entity;
    for class in [&person, &company] {
        service
            .create_assignment(&ctx, NewAssignment::new(class.clone(), name.id, 0), false)
            .unwrap();
    }
    service.compose(&ctx, &person).unwrap();
    service.compose(&ctx, &company).unwrap();

    let rules = RuleSet::String(StringRules {
        max_length: Some(40),
        ..Default::default()
    });
    service
        .update_attribute(&ctx, name.id, AttributePatch::rules(rules.clone()), 1, false)
        .unwrap();

    for class in [&person, &company] {
        let schema = service.compose(&ctx, class).unwrap();
        assert_eq!(schema.attributes[0].rules.rules(), &rules);
    }
}

// =============================================================================
// Concurrency Tests
// =============================================================================

/// Two writers holding the same version race; one wins, one conflicts.
#[test]
fn test_concurrent_updates_exactly_one_wins() {
    let service = Arc::new(service_with_classes(&["acme"], &["Person"]));
    let ctx = ctx("acme");
    let person = ClassId::parse("Person").unwrap();
    let record = assign(&service, &ctx, &person, "name", 0);
    let (id, version) = (record.id, record.version);

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["First", "Second"]
        .into_iter()
        .map(|label| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            let ctx = ctx.clone();
            thread::spawn(move || {
                let patch = AssignmentPatch {
                    display_name: Some(Some(label.to_string())),
                    ..Default::default()
                };
                barrier.wait();
                service.update_assignment(&ctx, id, patch, version, false)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(EngineError::VersionConflict { .. })))
        .count();
    assert_eq!(wins, 1);
    assert_eq!(conflicts, 1);

    let stored = service.get_assignment(&ctx, record.id).unwrap();
    assert_eq!(stored.version, record.version + 1);
    assert_eq!(service.metrics().version_conflicts, 1);
}

#[test]
fn test_concurrent_creates_of_same_name() {
    let service = Arc::new(service_with_classes(&["acme"], &[]));
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                service.create_attribute(&ctx("acme"), NewAttribute::new("email", DataType::String))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, EngineError::NameConflict(_))));
}

#[test]
fn test_expired_deadline_aborts_write() {
    let service = service_with_classes(&["acme"], &["Person"]);
    let ctx = ctx("acme");
    let attr = service
        .create_attribute(&ctx, NewAttribute::new("name", DataType::String))
        .unwrap()
        .entity;

    let expired = ctx.clone().with_timeout(Duration::ZERO);
    let err = service
        .create_assignment(
            &expired,
            NewAssignment::new(ClassId::parse("Person").unwrap(), attr.id, 0),
            false,
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::DeadlineExceeded(_)));
    assert!(service
        .assignments_for_class(&ctx, &ClassId::parse("Person").unwrap())
        .unwrap()
        .is_empty());
}

// =============================================================================
// Tenant Isolation Tests
// =============================================================================

#[test]
fn test_tenants_are_isolated() {
    let service = service_with_classes(&["acme", "globex"], &["Person"]);
    let acme = ctx("acme");
    let globex = ctx("globex");
    let person = ClassId::parse("Person").unwrap();
    let record = assign(&service, &acme, &person, "name", 0);

    assert!(matches!(
        service.get_attribute(&globex, record.attribute_id),
        Err(EngineError::AttributeNotFound(_))
    ));
    assert!(service.find_attribute(&globex, "name").unwrap().is_none());
    assert!(service.compose(&globex, &person).unwrap().is_empty());
    assert!(service.tenant_history(&globex).unwrap().is_empty());

    // Same name is free in the other tenant
    assign(&service, &globex, &person, "name", 0);
    assert_eq!(service.list_attributes(&globex, false).unwrap().len(), 1);
}
