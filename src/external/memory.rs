//! In-memory collaborators for tests, the CLI and embedded use

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use serde_json::Value;

use super::{ClassRegistry, InstanceStore};
use crate::assignment::ClassId;
use crate::catalog::AttributeId;
use crate::context::{TenantContext, TenantId};
use crate::errors::{EngineError, EngineResult};
use crate::validation::CompiledRules;

/// Class registry backed by a set per tenant
#[derive(Debug, Default)]
pub struct InMemoryClassRegistry {
    classes: RwLock<HashMap<TenantId, HashSet<ClassId>>>,
}

impl InMemoryClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_class(&self, tenant: &TenantId, class_id: ClassId) -> EngineResult<()> {
        let mut classes = self
            .classes
            .write()
            .map_err(|_| EngineError::lock_poisoned("class registry"))?;
        classes.entry(tenant.clone()).or_default().insert(class_id);
        Ok(())
    }

    /// Returns whether the class was present
    pub fn remove_class(&self, tenant: &TenantId, class_id: &ClassId) -> EngineResult<bool> {
        let mut classes = self
            .classes
            .write()
            .map_err(|_| EngineError::lock_poisoned("class registry"))?;
        Ok(classes
            .get_mut(tenant)
            .map(|set| set.remove(class_id))
            .unwrap_or(false))
    }
}

impl ClassRegistry for InMemoryClassRegistry {
    fn class_exists(&self, ctx: &TenantContext, class_id: &ClassId) -> EngineResult<bool> {
        let classes = self
            .classes
            .read()
            .map_err(|_| EngineError::lock_poisoned("class registry"))?;
        Ok(classes
            .get(&ctx.tenant_id)
            .is_some_and(|set| set.contains(class_id)))
    }
}

/// Stored values of one instance, keyed by attribute
pub type InstanceValues = HashMap<AttributeId, Value>;

/// Instance store holding raw instance values per tenant and class.
///
/// Answers all three count queries, including exact violation counts.
#[derive(Debug, Default)]
pub struct InMemoryInstanceStore {
    instances: RwLock<HashMap<(TenantId, ClassId), Vec<InstanceValues>>>,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instance(&self, tenant: &TenantId, class_id: &ClassId, values: InstanceValues) -> EngineResult<()> {
        let mut instances = self
            .instances
            .write()
            .map_err(|_| EngineError::lock_poisoned("instance store"))?;
        instances
            .entry((tenant.clone(), class_id.clone()))
            .or_default()
            .push(values);
        Ok(())
    }

    fn with_instances<T>(
        &self,
        ctx: &TenantContext,
        class_id: &ClassId,
        f: impl FnOnce(&[InstanceValues]) -> T,
    ) -> EngineResult<T> {
        let instances = self
            .instances
            .read()
            .map_err(|_| EngineError::lock_poisoned("instance store"))?;
        let key = (ctx.tenant_id.clone(), class_id.clone());
        Ok(f(instances.get(&key).map(Vec::as_slice).unwrap_or(&[])))
    }
}

fn stored_value(instance: &InstanceValues, attribute_id: AttributeId) -> Option<&Value> {
    instance.get(&attribute_id).filter(|v| !v.is_null())
}

impl InstanceStore for InMemoryInstanceStore {
    fn count_instances_of_class(&self, ctx: &TenantContext, class_id: &ClassId) -> EngineResult<u64> {
        self.with_instances(ctx, class_id, |all| all.len() as u64)
    }

    fn count_instances_using_attribute(
        &self,
        ctx: &TenantContext,
        class_id: &ClassId,
        attribute_id: AttributeId,
    ) -> EngineResult<u64> {
        self.with_instances(ctx, class_id, |all| {
            all.iter()
                .filter(|instance| stored_value(instance, attribute_id).is_some())
                .count() as u64
        })
    }

    fn count_instances_violating(
        &self,
        ctx: &TenantContext,
        class_id: &ClassId,
        attribute_id: AttributeId,
        rules: &CompiledRules,
    ) -> EngineResult<Option<u64>> {
        self.with_instances(ctx, class_id, |all| {
            let violating = all
                .iter()
                .filter_map(|instance| stored_value(instance, attribute_id))
                .filter(|value| rules.check("", value).is_err())
                .count();
            Some(violating as u64)
        })
    }
}
