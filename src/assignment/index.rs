//! # Assignment Index
//!
//! Tenant-partitioned store of assignment records.
//!
//! Invariants:
//! - At most one active assignment per (class, attribute)
//! - Sort positions are unique among the active assignments of a class
//! - Default values satisfy the effective rules at write time
//! - Every write bumps the class revision and invalidates the class schema
//!
//! "Active assignments of class X ordered by sort position" is a range
//! scan over a `BTreeMap` keyed by (class, position): O(log n + k).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::Utc;

use super::types::{
    normalize_default, AssignmentId, AssignmentPatch, AssignmentRecord, ClassId, NewAssignment,
};
use crate::catalog::{AttributeCatalog, AttributeDefinition, AttributeId, AttributeReferences, EntityState};
use crate::context::{TenantContext, TenantId};
use crate::errors::{EngineError, EngineResult, EntityKind};
use crate::external::ClassRegistry;
use crate::guard::ConcurrencyGuard;
use crate::observability::{log_event, Event};
use crate::rules::{check_structure, RuleMerger, RuleSet};
use crate::validation::CompiledRules;

#[derive(Debug, Default)]
struct TenantAssignments {
    by_id: HashMap<AssignmentId, AssignmentRecord>,
    active_pairs: HashMap<(ClassId, AttributeId), AssignmentId>,
    by_position: BTreeMap<(ClassId, i32), AssignmentId>,
    class_revisions: HashMap<ClassId, u64>,
}

impl TenantAssignments {
    fn bump_revision(&mut self, class_id: &ClassId) {
        *self.class_revisions.entry(class_id.clone()).or_insert(0) += 1;
    }

    fn active_in_class(&self, class_id: &ClassId) -> Vec<AssignmentRecord> {
        let start = (class_id.clone(), i32::MIN);
        let end = (class_id.clone(), i32::MAX);
        self.by_position
            .range(start..=end)
            .filter_map(|(_, id)| self.by_id.get(id))
            .cloned()
            .collect()
    }
}

/// Assignment registry
pub struct AssignmentIndex {
    tenants: RwLock<HashMap<TenantId, TenantAssignments>>,
    catalog: Arc<AttributeCatalog>,
    classes: Arc<dyn ClassRegistry>,
    guard: Arc<ConcurrencyGuard>,
}

impl AssignmentIndex {
    pub fn new(
        catalog: Arc<AttributeCatalog>,
        classes: Arc<dyn ClassRegistry>,
        guard: Arc<ConcurrencyGuard>,
    ) -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            catalog,
            classes,
            guard,
        }
    }

    /// Bind an attribute to a class
    pub fn create(&self, ctx: &TenantContext, input: NewAssignment) -> EngineResult<AssignmentRecord> {
        ctx.check_deadline("class lookup")?;
        if !self.classes.class_exists(ctx, &input.class_id)? {
            return Err(EngineError::ClassNotFound(input.class_id.to_string()));
        }
        let attribute = self.catalog.get_active(ctx, input.attribute_id)?;
        let default_value = normalize_default(input.default_value);
        check_assignment_rules(&attribute, input.override_rules.as_ref(), default_value.as_ref())?;

        let mut tenants = self
            .tenants
            .write()
            .map_err(|_| EngineError::lock_poisoned("assignment index"))?;
        let tenant = tenants.entry(ctx.tenant_id.clone()).or_default();

        let pair = (input.class_id.clone(), input.attribute_id);
        if tenant.active_pairs.contains_key(&pair) {
            return Err(EngineError::DuplicateAssignment {
                class_id: input.class_id.to_string(),
                attribute: attribute.name,
            });
        }
        let slot = (input.class_id.clone(), input.sort_position);
        if tenant.by_position.contains_key(&slot) {
            return Err(EngineError::SortPositionConflict {
                class_id: input.class_id.to_string(),
                position: input.sort_position,
            });
        }

        let now = Utc::now();
        let record = AssignmentRecord {
            id: AssignmentId::new(),
            tenant_id: ctx.tenant_id.clone(),
            class_id: input.class_id,
            attribute_id: input.attribute_id,
            required: input.required,
            sort_position: input.sort_position,
            display_name: input.display_name,
            override_rules: input.override_rules,
            default_value,
            version: 1,
            state: EntityState::Active,
            created_by: ctx.actor.clone(),
            created_at: now,
            updated_at: now,
        };

        tenant.active_pairs.insert(pair, record.id);
        tenant.by_position.insert(slot, record.id);
        tenant.by_id.insert(record.id, record.clone());
        tenant.bump_revision(&record.class_id);
        drop(tenants);

        self.guard.invalidate_class(ctx, &record.class_id)?;
        log_event(
            Event::AssignmentCreated,
            &[
                ("assignment_id", &record.id.to_string()),
                ("attribute_id", &record.attribute_id.to_string()),
                ("class_id", record.class_id.as_str()),
                ("request_id", &ctx.request_id.to_string()),
                ("tenant", ctx.tenant_id.as_str()),
            ],
        );
        Ok(record)
    }

    /// Apply a patch to an active assignment
    pub fn update(
        &self,
        ctx: &TenantContext,
        id: AssignmentId,
        patch: AssignmentPatch,
        expected_version: u64,
    ) -> EngineResult<AssignmentRecord> {
        let current = self.get_active(ctx, id)?;
        self.guard.check_version(
            ctx,
            EntityKind::Assignment,
            id.as_uuid(),
            expected_version,
            current.version,
        )?;

        let mut next = apply_patch(&current, patch);
        if next == current {
            return Ok(current);
        }
        if next.override_rules != current.override_rules || next.default_value != current.default_value {
            let attribute = self.catalog.get(ctx, current.attribute_id)?;
            check_assignment_rules(&attribute, next.override_rules.as_ref(), next.default_value.as_ref())?;
        }

        let mut tenants = self
            .tenants
            .write()
            .map_err(|_| EngineError::lock_poisoned("assignment index"))?;
        let tenant = tenants
            .get_mut(&ctx.tenant_id)
            .ok_or_else(|| EngineError::AssignmentNotFound(id.as_uuid()))?;
        let stored_version = tenant
            .by_id
            .get(&id)
            .filter(|r| r.is_active())
            .map(|r| r.version)
            .ok_or_else(|| EngineError::AssignmentNotFound(id.as_uuid()))?;
        // The record was read outside the lock; equal versions mean equal content
        self.guard.check_version(
            ctx,
            EntityKind::Assignment,
            id.as_uuid(),
            expected_version,
            stored_version,
        )?;

        if next.sort_position != current.sort_position {
            let slot = (current.class_id.clone(), next.sort_position);
            if tenant.by_position.contains_key(&slot) {
                return Err(EngineError::SortPositionConflict {
                    class_id: current.class_id.to_string(),
                    position: next.sort_position,
                });
            }
            tenant
                .by_position
                .remove(&(current.class_id.clone(), current.sort_position));
            tenant.by_position.insert(slot, id);
        }

        next.version = current.version + 1;
        next.updated_at = Utc::now();
        tenant.by_id.insert(id, next.clone());
        tenant.bump_revision(&next.class_id);
        drop(tenants);

        self.guard.invalidate_class(ctx, &next.class_id)?;
        log_event(
            Event::AssignmentUpdated,
            &[
                ("assignment_id", &id.to_string()),
                ("class_id", next.class_id.as_str()),
                ("request_id", &ctx.request_id.to_string()),
                ("tenant", ctx.tenant_id.as_str()),
                ("version", &next.version.to_string()),
            ],
        );
        Ok(next)
    }

    /// Soft-delete an assignment; its class schema is invalidated
    pub fn delete(&self, ctx: &TenantContext, id: AssignmentId, expected_version: u64) -> EngineResult<AssignmentRecord> {
        let mut tenants = self
            .tenants
            .write()
            .map_err(|_| EngineError::lock_poisoned("assignment index"))?;
        let tenant = tenants
            .get_mut(&ctx.tenant_id)
            .ok_or_else(|| EngineError::AssignmentNotFound(id.as_uuid()))?;
        let record = tenant
            .by_id
            .get_mut(&id)
            .filter(|r| r.state.can_transition_to(EntityState::Deactivated))
            .ok_or_else(|| EngineError::AssignmentNotFound(id.as_uuid()))?;

        self.guard.check_version(
            ctx,
            EntityKind::Assignment,
            id.as_uuid(),
            expected_version,
            record.version,
        )?;

        record.state = EntityState::Deactivated;
        record.version += 1;
        record.updated_at = Utc::now();
        let deleted = record.clone();

        tenant
            .active_pairs
            .remove(&(deleted.class_id.clone(), deleted.attribute_id));
        tenant
            .by_position
            .remove(&(deleted.class_id.clone(), deleted.sort_position));
        tenant.bump_revision(&deleted.class_id);
        drop(tenants);

        self.guard.invalidate_class(ctx, &deleted.class_id)?;
        log_event(
            Event::AssignmentDeleted,
            &[
                ("assignment_id", &id.to_string()),
                ("class_id", deleted.class_id.as_str()),
                ("request_id", &ctx.request_id.to_string()),
                ("tenant", ctx.tenant_id.as_str()),
            ],
        );
        Ok(deleted)
    }

    /// Fetch an assignment in any state
    pub fn get(&self, ctx: &TenantContext, id: AssignmentId) -> EngineResult<AssignmentRecord> {
        let tenants = self
            .tenants
            .read()
            .map_err(|_| EngineError::lock_poisoned("assignment index"))?;
        tenants
            .get(&ctx.tenant_id)
            .and_then(|t| t.by_id.get(&id))
            .cloned()
            .ok_or_else(|| EngineError::AssignmentNotFound(id.as_uuid()))
    }

    /// Fetch an active assignment; deleted ones read as not found
    pub fn get_active(&self, ctx: &TenantContext, id: AssignmentId) -> EngineResult<AssignmentRecord> {
        let record = self.get(ctx, id)?;
        if !record.is_active() {
            return Err(EngineError::AssignmentNotFound(id.as_uuid()));
        }
        Ok(record)
    }

    /// Active assignments of a class, ordered by sort position
    pub fn active_for_class(&self, ctx: &TenantContext, class_id: &ClassId) -> EngineResult<Vec<AssignmentRecord>> {
        let tenants = self
            .tenants
            .read()
            .map_err(|_| EngineError::lock_poisoned("assignment index"))?;
        Ok(tenants
            .get(&ctx.tenant_id)
            .map(|t| t.active_in_class(class_id))
            .unwrap_or_default())
    }

    /// Active assignments of an attribute across all classes, ordered by class
    pub fn active_for_attribute(&self, ctx: &TenantContext, attribute_id: AttributeId) -> EngineResult<Vec<AssignmentRecord>> {
        let tenants = self
            .tenants
            .read()
            .map_err(|_| EngineError::lock_poisoned("assignment index"))?;
        let mut records: Vec<_> = tenants
            .get(&ctx.tenant_id)
            .map(|t| {
                t.active_pairs
                    .iter()
                    .filter(|((_, attr), _)| *attr == attribute_id)
                    .filter_map(|(_, id)| t.by_id.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by(|a, b| a.class_id.cmp(&b.class_id));
        Ok(records)
    }

    /// The active assignment binding `attribute_id` to `class_id`, if any
    pub fn find_active(
        &self,
        ctx: &TenantContext,
        class_id: &ClassId,
        attribute_id: AttributeId,
    ) -> EngineResult<Option<AssignmentRecord>> {
        let tenants = self
            .tenants
            .read()
            .map_err(|_| EngineError::lock_poisoned("assignment index"))?;
        Ok(tenants.get(&ctx.tenant_id).and_then(|t| {
            t.active_pairs
                .get(&(class_id.clone(), attribute_id))
                .and_then(|id| t.by_id.get(id))
                .cloned()
        }))
    }

    /// Classes with an active assignment to `attribute_id`
    pub fn classes_referencing(&self, ctx: &TenantContext, attribute_id: AttributeId) -> EngineResult<Vec<ClassId>> {
        let mut classes: Vec<_> = self
            .active_for_attribute(ctx, attribute_id)?
            .into_iter()
            .map(|r| r.class_id)
            .collect();
        classes.dedup();
        Ok(classes)
    }

    /// Monotonic counter bumped by every write touching the class
    pub fn class_revision(&self, ctx: &TenantContext, class_id: &ClassId) -> EngineResult<u64> {
        let tenants = self
            .tenants
            .read()
            .map_err(|_| EngineError::lock_poisoned("assignment index"))?;
        Ok(tenants
            .get(&ctx.tenant_id)
            .and_then(|t| t.class_revisions.get(class_id))
            .copied()
            .unwrap_or(0))
    }
}

impl AttributeReferences for AssignmentIndex {
    fn active_references(&self, ctx: &TenantContext, attribute_id: AttributeId) -> EngineResult<usize> {
        let tenants = self
            .tenants
            .read()
            .map_err(|_| EngineError::lock_poisoned("assignment index"))?;
        Ok(tenants
            .get(&ctx.tenant_id)
            .map(|t| t.active_pairs.keys().filter(|(_, attr)| *attr == attribute_id).count())
            .unwrap_or(0))
    }
}

fn apply_patch(current: &AssignmentRecord, patch: AssignmentPatch) -> AssignmentRecord {
    let mut next = current.clone();
    if let Some(required) = patch.required {
        next.required = required;
    }
    if let Some(position) = patch.sort_position {
        next.sort_position = position;
    }
    if let Some(display_name) = patch.display_name {
        next.display_name = display_name;
    }
    if let Some(rules) = patch.override_rules {
        next.override_rules = rules;
    }
    if let Some(default_value) = patch.default_value {
        next.default_value = normalize_default(default_value);
    }
    next
}

/// Overrides must fit the attribute's data type, the merged rules must be
/// structurally sound, and a default must pass the merged rules.
fn check_assignment_rules(
    attribute: &AttributeDefinition,
    override_rules: Option<&RuleSet>,
    default_value: Option<&serde_json::Value>,
) -> EngineResult<()> {
    if let Some(rules) = override_rules {
        check_structure(attribute.data_type, rules)?;
    }
    let effective = RuleMerger::merge_optional(&attribute.base_rules, override_rules);
    check_structure(attribute.data_type, &effective.rules)?;

    if let Some(value) = default_value {
        let compiled = CompiledRules::compile(effective.rules)?;
        compiled
            .check(&attribute.name, value)
            .map_err(|violations| EngineError::DefaultValueInvalid { violations })?;
    }
    Ok(())
}
