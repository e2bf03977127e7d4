//! # Schema Composer
//!
//! Builds the composed schema of a class:
//!
//! 1. Read the class revision (the probe starts before any data is loaded)
//! 2. Load the active assignments, ordered by sort position
//! 3. Load each attribute and merge base and override rules
//! 4. Hash the result
//!
//! Cached entries are served only while the class revision and every
//! touched attribute version still match what was observed at build time.

use std::sync::Arc;

use super::cache::{CachedSchema, SchemaCache, SchemaCacheKey, VersionProbe};
use super::schema::{ComposedSchema, SchemaAttribute};
use crate::assignment::{AssignmentIndex, ClassId};
use crate::catalog::AttributeCatalog;
use crate::context::TenantContext;
use crate::errors::EngineResult;
use crate::observability::{log_event, EngineMetrics, Event};
use crate::rules::RuleMerger;
use crate::validation::CompiledRules;

pub struct SchemaComposer {
    catalog: Arc<AttributeCatalog>,
    index: Arc<AssignmentIndex>,
    cache: Arc<dyn SchemaCache>,
    metrics: Arc<EngineMetrics>,
}

impl SchemaComposer {
    pub fn new(
        catalog: Arc<AttributeCatalog>,
        index: Arc<AssignmentIndex>,
        cache: Arc<dyn SchemaCache>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            catalog,
            index,
            cache,
            metrics,
        }
    }

    /// Cached or freshly built schema for `class_id`.
    ///
    /// A class without assignments yields an empty schema.
    pub fn compose(&self, ctx: &TenantContext, class_id: &ClassId) -> EngineResult<Arc<ComposedSchema>> {
        let key = SchemaCacheKey::new(ctx.tenant_id.clone(), class_id.clone());

        if let Some(cached) = self.cache.get(&key)? {
            if self.probe_matches(ctx, class_id, &cached.probe)? {
                self.metrics.increment_cache_hits();
                log_event(
                    Event::SchemaCacheHit,
                    &[
                        ("class_id", class_id.as_str()),
                        ("content_hash", &cached.schema.content_hash),
                        ("tenant", ctx.tenant_id.as_str()),
                    ],
                );
                return Ok(cached.schema);
            }
        }
        self.metrics.increment_cache_misses();

        let (schema, probe) = self.build(ctx, class_id)?;
        self.cache.set(
            key,
            CachedSchema {
                schema: schema.clone(),
                probe,
            },
        )?;
        Ok(schema)
    }

    /// Always rebuilds, never reads or fills the cache
    pub fn compose_fresh(&self, ctx: &TenantContext, class_id: &ClassId) -> EngineResult<Arc<ComposedSchema>> {
        self.build(ctx, class_id).map(|(schema, _)| schema)
    }

    fn probe_matches(&self, ctx: &TenantContext, class_id: &ClassId, probe: &VersionProbe) -> EngineResult<bool> {
        if self.index.class_revision(ctx, class_id)? != probe.class_revision {
            return Ok(false);
        }
        for (attribute_id, version) in &probe.attribute_versions {
            if self.catalog.version_of(ctx, *attribute_id)? != Some(*version) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn build(&self, ctx: &TenantContext, class_id: &ClassId) -> EngineResult<(Arc<ComposedSchema>, VersionProbe)> {
        let mut probe = VersionProbe {
            class_revision: self.index.class_revision(ctx, class_id)?,
            ..Default::default()
        };

        let assignments = self.index.active_for_class(ctx, class_id)?;
        let mut attributes = Vec::with_capacity(assignments.len());
        let mut last_modified = None;

        for assignment in assignments {
            let attribute = self.catalog.get(ctx, assignment.attribute_id)?;
            let effective = RuleMerger::merge_optional(&attribute.base_rules, assignment.override_rules.as_ref());
            let rules = CompiledRules::compile(effective.rules)?;

            probe.attribute_versions.insert(attribute.id, attribute.version);
            last_modified = last_modified
                .max(Some(assignment.updated_at))
                .max(Some(attribute.updated_at));

            attributes.push(SchemaAttribute {
                attribute_id: attribute.id,
                assignment_id: assignment.id,
                name: attribute.name,
                display_name: assignment.display_name,
                data_type: attribute.data_type,
                rules,
                advisories: effective.narrowed,
                required: assignment.required,
                sort_position: assignment.sort_position,
                default_value: assignment.default_value,
                attribute_version: attribute.version,
                assignment_version: assignment.version,
            });
        }

        let schema = ComposedSchema::new(ctx.tenant_id.clone(), class_id.clone(), attributes, last_modified);
        self.metrics.increment_schemas_composed();
        log_event(
            Event::SchemaComposed,
            &[
                ("attributes", &schema.attributes.len().to_string()),
                ("class_id", class_id.as_str()),
                ("content_hash", &schema.content_hash),
                ("tenant", ctx.tenant_id.as_str()),
            ],
        );
        Ok((Arc::new(schema), probe))
    }
}
