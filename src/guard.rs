//! # Concurrency Guard
//!
//! Optimistic concurrency for catalog and index writes.
//!
//! - Version checks run inside the owning store's write lock, so the
//!   comparison is against the version stored at write time
//! - A mismatch fails fast; nothing is queued or retried
//! - Successful writes invalidate the composed schemas they affect
//!   before the write call returns

use std::sync::Arc;

use uuid::Uuid;

use crate::assignment::ClassId;
use crate::composer::{SchemaCache, SchemaCacheKey};
use crate::context::TenantContext;
use crate::errors::{EngineError, EngineResult, EntityKind};
use crate::observability::{log_event, EngineMetrics, Event};

pub struct ConcurrencyGuard {
    cache: Arc<dyn SchemaCache>,
    metrics: Arc<EngineMetrics>,
}

impl ConcurrencyGuard {
    pub fn new(cache: Arc<dyn SchemaCache>, metrics: Arc<EngineMetrics>) -> Self {
        Self { cache, metrics }
    }

    pub fn cache(&self) -> &Arc<dyn SchemaCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// Fails with `VersionConflict` iff `expected` differs from `actual`
    pub fn check_version(
        &self,
        ctx: &TenantContext,
        entity: EntityKind,
        id: Uuid,
        expected: u64,
        actual: u64,
    ) -> EngineResult<()> {
        if expected == actual {
            return Ok(());
        }

        self.metrics.increment_version_conflicts();
        log_event(
            Event::VersionConflict,
            &[
                ("actual", &actual.to_string()),
                ("entity", entity.as_str()),
                ("expected", &expected.to_string()),
                ("id", &id.to_string()),
                ("request_id", &ctx.request_id.to_string()),
                ("tenant", ctx.tenant_id.as_str()),
            ],
        );
        Err(EngineError::VersionConflict {
            entity,
            id,
            expected,
            actual,
        })
    }

    /// Drop the cached schema of one class
    pub fn invalidate_class(&self, ctx: &TenantContext, class_id: &ClassId) -> EngineResult<()> {
        let key = SchemaCacheKey::new(ctx.tenant_id.clone(), class_id.clone());
        if self.cache.invalidate(&key)? {
            self.metrics.increment_cache_invalidations();
            log_event(
                Event::SchemaInvalidated,
                &[
                    ("class_id", class_id.as_str()),
                    ("request_id", &ctx.request_id.to_string()),
                    ("tenant", ctx.tenant_id.as_str()),
                ],
            );
        }
        Ok(())
    }

    /// Drop the cached schemas of every listed class
    pub fn invalidate_classes<'a>(
        &self,
        ctx: &TenantContext,
        classes: impl IntoIterator<Item = &'a ClassId>,
    ) -> EngineResult<()> {
        for class_id in classes {
            self.invalidate_class(ctx, class_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::InMemorySchemaCache;

    fn guard() -> (ConcurrencyGuard, Arc<EngineMetrics>) {
        let metrics = Arc::new(EngineMetrics::new());
        let cache = Arc::new(InMemorySchemaCache::new(16));
        (ConcurrencyGuard::new(cache, metrics.clone()), metrics)
    }

    #[test]
    fn test_matching_version_passes() {
        let (guard, metrics) = guard();
        let ctx = TenantContext::new("acme", "alice").unwrap();
        assert!(guard
            .check_version(&ctx, EntityKind::Attribute, Uuid::new_v4(), 3, 3)
            .is_ok());
        assert_eq!(metrics.snapshot().version_conflicts, 0);
    }

    #[test]
    fn test_mismatch_is_counted() {
        let (guard, metrics) = guard();
        let ctx = TenantContext::new("acme", "alice").unwrap();
        let id = Uuid::new_v4();
        let err = guard
            .check_version(&ctx, EntityKind::Assignment, id, 1, 2)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::VersionConflict { entity: EntityKind::Assignment, expected: 1, actual: 2, .. }
        ));
        assert_eq!(metrics.snapshot().version_conflicts, 1);
    }

    #[test]
    fn test_invalidating_absent_entry_is_not_counted() {
        let (guard, metrics) = guard();
        let ctx = TenantContext::new("acme", "alice").unwrap();
        let class = ClassId::parse("Person").unwrap();
        guard.invalidate_class(&ctx, &class).unwrap();
        assert_eq!(metrics.snapshot().cache_invalidations, 0);
    }
}
