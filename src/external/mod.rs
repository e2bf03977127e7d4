//! External collaborators
//!
//! The engine does not own class templates or entity instances. It asks
//! two collaborators about them:
//!
//! - `ClassRegistry`: whether a class exists
//! - `InstanceStore`: how many persisted instances a change would touch
//!
//! Callers check the context deadline before each call; implementations
//! must not retry internally.

mod memory;

pub use memory::{InMemoryClassRegistry, InMemoryInstanceStore, InstanceValues};

use crate::assignment::ClassId;
use crate::catalog::AttributeId;
use crate::context::TenantContext;
use crate::errors::EngineResult;
use crate::validation::CompiledRules;

/// Owner of class templates
pub trait ClassRegistry: Send + Sync {
    /// Whether an active class with this id exists in the caller's tenant
    fn class_exists(&self, ctx: &TenantContext, class_id: &ClassId) -> EngineResult<bool>;
}

/// Owner of persisted entity instances.
///
/// Counts need only come from a recent, consistent snapshot.
pub trait InstanceStore: Send + Sync {
    fn count_instances_of_class(&self, ctx: &TenantContext, class_id: &ClassId) -> EngineResult<u64>;

    /// Instances of the class holding a non-null value for the attribute
    fn count_instances_using_attribute(
        &self,
        ctx: &TenantContext,
        class_id: &ClassId,
        attribute_id: AttributeId,
    ) -> EngineResult<u64>;

    /// Instances whose stored value breaks `rules`.
    ///
    /// Optional; `None` makes the analyzer fall back to the using-attribute count.
    fn count_instances_violating(
        &self,
        _ctx: &TenantContext,
        _class_id: &ClassId,
        _attribute_id: AttributeId,
        _rules: &CompiledRules,
    ) -> EngineResult<Option<u64>> {
        Ok(None)
    }
}
