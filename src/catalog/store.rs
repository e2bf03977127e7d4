//! # Attribute Catalog
//!
//! Tenant-partitioned store of attribute definitions.
//!
//! - Active names are unique per tenant
//! - Name and data type never change after creation
//! - Every mutation carries an expected version, checked under the write lock
//! - Deactivation is refused while any active assignment references the attribute

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use super::types::{
    validate_name, AttributeDefinition, AttributeId, AttributePatch, EntityState, NewAttribute,
};
use crate::context::{TenantContext, TenantId};
use crate::errors::{EngineError, EngineResult, EntityKind};
use crate::guard::ConcurrencyGuard;
use crate::observability::{log_event, Event};
use crate::rules::{check_structure, RuleSet};

/// Reverse lookup from an attribute to the assignments using it.
///
/// Implemented by the assignment index; consulted on deactivation.
pub trait AttributeReferences: Send + Sync {
    /// Number of active assignments referencing `attribute_id`
    fn active_references(&self, ctx: &TenantContext, attribute_id: AttributeId) -> EngineResult<usize>;
}

#[derive(Debug, Default)]
struct TenantAttributes {
    by_id: HashMap<AttributeId, AttributeDefinition>,
    active_names: HashMap<String, AttributeId>,
}

/// Attribute definition registry
pub struct AttributeCatalog {
    tenants: RwLock<HashMap<TenantId, TenantAttributes>>,
    guard: Arc<ConcurrencyGuard>,
}

impl AttributeCatalog {
    pub fn new(guard: Arc<ConcurrencyGuard>) -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            guard,
        }
    }

    /// Create an attribute definition
    pub fn create(&self, ctx: &TenantContext, input: NewAttribute) -> EngineResult<AttributeDefinition> {
        validate_name(&input.name)?;
        let base_rules = input
            .base_rules
            .unwrap_or_else(|| RuleSet::unconstrained(input.data_type));
        check_structure(input.data_type, &base_rules)?;

        let mut tenants = self
            .tenants
            .write()
            .map_err(|_| EngineError::lock_poisoned("attribute catalog"))?;
        let tenant = tenants.entry(ctx.tenant_id.clone()).or_default();

        if tenant.active_names.contains_key(&input.name) {
            return Err(EngineError::NameConflict(input.name));
        }

        let now = Utc::now();
        let definition = AttributeDefinition {
            id: AttributeId::new(),
            tenant_id: ctx.tenant_id.clone(),
            name: input.name,
            data_type: input.data_type,
            base_rules,
            description: input.description,
            version: 1,
            state: EntityState::Active,
            created_by: ctx.actor.clone(),
            created_at: now,
            updated_at: now,
        };

        tenant
            .active_names
            .insert(definition.name.clone(), definition.id);
        tenant.by_id.insert(definition.id, definition.clone());
        drop(tenants);

        log_event(
            Event::AttributeCreated,
            &[
                ("attribute_id", &definition.id.to_string()),
                ("data_type", definition.data_type.type_name()),
                ("name", &definition.name),
                ("request_id", &ctx.request_id.to_string()),
                ("tenant", ctx.tenant_id.as_str()),
            ],
        );
        Ok(definition)
    }

    /// Fetch a definition in any state
    pub fn get(&self, ctx: &TenantContext, id: AttributeId) -> EngineResult<AttributeDefinition> {
        let tenants = self
            .tenants
            .read()
            .map_err(|_| EngineError::lock_poisoned("attribute catalog"))?;
        tenants
            .get(&ctx.tenant_id)
            .and_then(|t| t.by_id.get(&id))
            .cloned()
            .ok_or_else(|| EngineError::AttributeNotFound(id.to_string()))
    }

    /// Fetch an active definition; deactivated ones read as not found
    pub fn get_active(&self, ctx: &TenantContext, id: AttributeId) -> EngineResult<AttributeDefinition> {
        let definition = self.get(ctx, id)?;
        if !definition.is_active() {
            return Err(EngineError::AttributeNotFound(id.to_string()));
        }
        Ok(definition)
    }

    /// Look up the active definition holding `name`
    pub fn find_by_name(&self, ctx: &TenantContext, name: &str) -> EngineResult<Option<AttributeDefinition>> {
        let tenants = self
            .tenants
            .read()
            .map_err(|_| EngineError::lock_poisoned("attribute catalog"))?;
        Ok(tenants.get(&ctx.tenant_id).and_then(|t| {
            t.active_names
                .get(name)
                .and_then(|id| t.by_id.get(id))
                .cloned()
        }))
    }

    /// All definitions of the tenant, ordered by name
    pub fn list(&self, ctx: &TenantContext, include_inactive: bool) -> EngineResult<Vec<AttributeDefinition>> {
        let tenants = self
            .tenants
            .read()
            .map_err(|_| EngineError::lock_poisoned("attribute catalog"))?;
        let mut definitions: Vec<_> = tenants
            .get(&ctx.tenant_id)
            .map(|t| {
                t.by_id
                    .values()
                    .filter(|d| include_inactive || d.is_active())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        definitions.sort_by(|a, b| a.name.cmp(&b.name).then(a.created_at.cmp(&b.created_at)));
        Ok(definitions)
    }

    /// Current version of a definition, `None` if unknown to the tenant
    pub fn version_of(&self, ctx: &TenantContext, id: AttributeId) -> EngineResult<Option<u64>> {
        let tenants = self
            .tenants
            .read()
            .map_err(|_| EngineError::lock_poisoned("attribute catalog"))?;
        Ok(tenants
            .get(&ctx.tenant_id)
            .and_then(|t| t.by_id.get(&id))
            .map(|d| d.version))
    }

    /// Apply a patch to an active definition.
    ///
    /// Supplying the current name or data type is accepted; a different
    /// value fails with `ImmutableField`. A patch that changes nothing
    /// returns the definition without bumping its version.
    pub fn update(
        &self,
        ctx: &TenantContext,
        id: AttributeId,
        patch: AttributePatch,
        expected_version: u64,
    ) -> EngineResult<AttributeDefinition> {
        let mut tenants = self
            .tenants
            .write()
            .map_err(|_| EngineError::lock_poisoned("attribute catalog"))?;
        let current = tenants
            .get_mut(&ctx.tenant_id)
            .and_then(|t| t.by_id.get_mut(&id))
            .filter(|d| d.is_active())
            .ok_or_else(|| EngineError::AttributeNotFound(id.to_string()))?;

        self.guard.check_version(
            ctx,
            EntityKind::Attribute,
            id.as_uuid(),
            expected_version,
            current.version,
        )?;

        if patch.name.as_ref().is_some_and(|name| *name != current.name) {
            return Err(EngineError::ImmutableField("name"));
        }
        if patch.data_type.is_some_and(|dt| dt != current.data_type) {
            return Err(EngineError::ImmutableField("data_type"));
        }
        if let Some(rules) = &patch.base_rules {
            check_structure(current.data_type, rules)?;
        }

        let mut changed = false;
        if let Some(rules) = patch.base_rules {
            if rules != current.base_rules {
                current.base_rules = rules;
                changed = true;
            }
        }
        if let Some(description) = patch.description {
            if description != current.description {
                current.description = description;
                changed = true;
            }
        }
        if !changed {
            return Ok(current.clone());
        }

        current.version += 1;
        current.updated_at = Utc::now();
        let updated = current.clone();
        drop(tenants);

        log_event(
            Event::AttributeUpdated,
            &[
                ("attribute_id", &updated.id.to_string()),
                ("request_id", &ctx.request_id.to_string()),
                ("tenant", ctx.tenant_id.as_str()),
                ("version", &updated.version.to_string()),
            ],
        );
        Ok(updated)
    }

    /// Move an active definition to `Deactivated`.
    ///
    /// The reference count is taken while the catalog write lock is held,
    /// so no assignment to this attribute can be created through the
    /// catalog in between.
    pub fn deactivate(
        &self,
        ctx: &TenantContext,
        id: AttributeId,
        expected_version: u64,
        references: &dyn AttributeReferences,
    ) -> EngineResult<AttributeDefinition> {
        let mut tenants = self
            .tenants
            .write()
            .map_err(|_| EngineError::lock_poisoned("attribute catalog"))?;
        let tenant = tenants
            .get_mut(&ctx.tenant_id)
            .ok_or_else(|| EngineError::AttributeNotFound(id.to_string()))?;
        let current = tenant
            .by_id
            .get_mut(&id)
            .filter(|d| d.state.can_transition_to(EntityState::Deactivated))
            .ok_or_else(|| EngineError::AttributeNotFound(id.to_string()))?;

        self.guard.check_version(
            ctx,
            EntityKind::Attribute,
            id.as_uuid(),
            expected_version,
            current.version,
        )?;

        let assignments = references.active_references(ctx, id)?;
        if assignments > 0 {
            return Err(EngineError::InUse {
                attribute: current.name.clone(),
                assignments,
            });
        }

        current.state = EntityState::Deactivated;
        current.version += 1;
        current.updated_at = Utc::now();
        let deactivated = current.clone();
        tenant.active_names.remove(&deactivated.name);
        drop(tenants);

        log_event(
            Event::AttributeDeactivated,
            &[
                ("attribute_id", &deactivated.id.to_string()),
                ("request_id", &ctx.request_id.to_string()),
                ("tenant", ctx.tenant_id.as_str()),
            ],
        );
        Ok(deactivated)
    }
}
