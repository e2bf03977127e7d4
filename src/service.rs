//! # Schema Service
//!
//! The entry point callers use to change and read schemas.
//!
//! Write path for every mutation:
//!
//! 1. Fail fast on a stale expected version
//! 2. Analyze the change against persisted instances
//! 3. Refuse a breaking change unless `force` is set
//! 4. Apply the version-checked write
//! 5. Invalidate affected schemas before returning
//! 6. Append an evolution record
//!
//! Reads go through the composer's cache; analysis always reads fresh.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::assignment::{AssignmentId, AssignmentIndex, AssignmentPatch, AssignmentRecord, ClassId, NewAssignment};
use crate::catalog::{AttributeCatalog, AttributeDefinition, AttributeId, AttributePatch, NewAttribute};
use crate::composer::{CacheStats, ComposedSchema, InMemorySchemaCache, NoopSchemaCache, SchemaCache, SchemaComposer};
use crate::config::EngineConfig;
use crate::context::TenantContext;
use crate::errors::{EngineError, EngineResult, EntityKind};
use crate::evolution::{
    AssignmentChange, EvolutionAction, EvolutionAnalyzer, EvolutionLog, EvolutionRecord,
    FileEvolutionLog, ImpactReport, MemoryEvolutionLog, RollbackData,
};
use crate::external::{ClassRegistry, InstanceStore};
use crate::guard::ConcurrencyGuard;
use crate::observability::{log_event, EngineMetrics, Event, Logger, MetricsSnapshot};
use crate::validation::{ValidationEngine, ValidationOutcome};

/// Result of an applied change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeOutcome<T> {
    pub entity: T,
    pub report: ImpactReport,
    /// `None` when the change was a no-op and nothing was recorded
    pub record_id: Option<Uuid>,
}

/// Entity touched by a rollback
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "entity", rename_all = "snake_case")]
pub enum SchemaEntity {
    Attribute(AttributeDefinition),
    Assignment(AssignmentRecord),
}

pub struct SchemaService {
    catalog: Arc<AttributeCatalog>,
    index: Arc<AssignmentIndex>,
    composer: Arc<SchemaComposer>,
    validator: ValidationEngine,
    analyzer: EvolutionAnalyzer,
    guard: Arc<ConcurrencyGuard>,
    log: Arc<dyn EvolutionLog>,
    metrics: Arc<EngineMetrics>,
}

impl SchemaService {
    pub fn new(
        classes: Arc<dyn ClassRegistry>,
        instances: Arc<dyn InstanceStore>,
        cache: Arc<dyn SchemaCache>,
        log: Arc<dyn EvolutionLog>,
    ) -> Self {
        let metrics = Arc::new(EngineMetrics::new());
        let guard = Arc::new(ConcurrencyGuard::new(cache.clone(), metrics.clone()));
        let catalog = Arc::new(AttributeCatalog::new(guard.clone()));
        let index = Arc::new(AssignmentIndex::new(catalog.clone(), classes, guard.clone()));
        let composer = Arc::new(SchemaComposer::new(
            catalog.clone(),
            index.clone(),
            cache,
            metrics.clone(),
        ));
        let validator = ValidationEngine::new(composer.clone(), metrics.clone());
        let analyzer = EvolutionAnalyzer::new(catalog.clone(), index.clone(), instances);

        Self {
            catalog,
            index,
            composer,
            validator,
            analyzer,
            guard,
            log,
            metrics,
        }
    }

    /// Build a service with the cache and evolution log the config selects
    pub fn from_config(
        config: &EngineConfig,
        classes: Arc<dyn ClassRegistry>,
        instances: Arc<dyn InstanceStore>,
    ) -> EngineResult<Self> {
        Logger::set_min_severity(config.log.min_severity);

        let cache: Arc<dyn SchemaCache> = if config.cache.enabled {
            Arc::new(InMemorySchemaCache::new(config.cache.max_entries))
        } else {
            Arc::new(NoopSchemaCache)
        };
        let log: Arc<dyn EvolutionLog> = match &config.evolution_log_path {
            Some(path) => Arc::new(FileEvolutionLog::open(path)?),
            None => Arc::new(MemoryEvolutionLog::new()),
        };
        Ok(Self::new(classes, instances, cache, log))
    }

    // ==================
    // Attributes
    // ==================

    pub fn create_attribute(
        &self,
        ctx: &TenantContext,
        input: NewAttribute,
    ) -> EngineResult<ChangeOutcome<AttributeDefinition>> {
        let created = self.catalog.create(ctx, input)?;
        let report = ImpactReport::safe(format!("attribute '{}' created", created.name));

        let record = EvolutionRecord::new(
            ctx,
            EvolutionAction::AttributeCreated,
            created.id.as_uuid(),
            created.version,
        )
        .with_values(None, snapshot(&created))
        .with_report(&report, false)
        .with_rollback(RollbackData::DeactivateAttribute {
            attribute_id: created.id,
        });
        let record_id = self.record(ctx, record)?;

        Ok(ChangeOutcome {
            entity: created,
            report,
            record_id: Some(record_id),
        })
    }

    /// Update an attribute's base rules or description.
    ///
    /// A breaking change is refused unless `force` is set.
    pub fn update_attribute(
        &self,
        ctx: &TenantContext,
        id: AttributeId,
        patch: AttributePatch,
        expected_version: u64,
        force: bool,
    ) -> EngineResult<ChangeOutcome<AttributeDefinition>> {
        self.apply_attribute_update(ctx, id, patch, expected_version, force, None)
    }

    /// Deactivate an attribute no active assignment references
    pub fn deactivate_attribute(
        &self,
        ctx: &TenantContext,
        id: AttributeId,
        expected_version: u64,
    ) -> EngineResult<ChangeOutcome<AttributeDefinition>> {
        self.apply_attribute_deactivation(ctx, id, expected_version, None)
    }

    pub fn get_attribute(&self, ctx: &TenantContext, id: AttributeId) -> EngineResult<AttributeDefinition> {
        self.catalog.get(ctx, id)
    }

    pub fn find_attribute(&self, ctx: &TenantContext, name: &str) -> EngineResult<Option<AttributeDefinition>> {
        self.catalog.find_by_name(ctx, name)
    }

    pub fn list_attributes(&self, ctx: &TenantContext, include_inactive: bool) -> EngineResult<Vec<AttributeDefinition>> {
        self.catalog.list(ctx, include_inactive)
    }

    // ==================
    // Assignments
    // ==================

    /// Bind an attribute to a class.
    ///
    /// A new required attribute on a populated class without a default is
    /// breaking and needs `force`.
    pub fn create_assignment(
        &self,
        ctx: &TenantContext,
        input: NewAssignment,
        force: bool,
    ) -> EngineResult<ChangeOutcome<AssignmentRecord>> {
        let report = self
            .analyzer
            .analyze_assignment_change(ctx, &AssignmentChange::Create(input.clone()))?;
        self.gate(ctx, &report, force, EntityKind::Assignment)?;

        let created = self.index.create(ctx, input)?;
        let record = EvolutionRecord::new(
            ctx,
            EvolutionAction::AssignmentCreated,
            created.id.as_uuid(),
            created.version,
        )
        .with_values(None, snapshot(&created))
        .with_report(&report, force)
        .with_rollback(RollbackData::DeleteAssignment {
            assignment_id: created.id,
        });
        let record_id = self.record(ctx, record)?;

        Ok(ChangeOutcome {
            entity: created,
            report,
            record_id: Some(record_id),
        })
    }

    pub fn update_assignment(
        &self,
        ctx: &TenantContext,
        id: AssignmentId,
        patch: AssignmentPatch,
        expected_version: u64,
        force: bool,
    ) -> EngineResult<ChangeOutcome<AssignmentRecord>> {
        self.apply_assignment_update(ctx, id, patch, expected_version, force, None)
    }

    /// Soft-delete an assignment. Never breaking: stored values are orphaned, not invalidated.
    pub fn delete_assignment(
        &self,
        ctx: &TenantContext,
        id: AssignmentId,
        expected_version: u64,
    ) -> EngineResult<ChangeOutcome<AssignmentRecord>> {
        self.apply_assignment_delete(ctx, id, expected_version, None)
    }

    pub fn get_assignment(&self, ctx: &TenantContext, id: AssignmentId) -> EngineResult<AssignmentRecord> {
        self.index.get(ctx, id)
    }

    pub fn assignments_for_class(&self, ctx: &TenantContext, class_id: &ClassId) -> EngineResult<Vec<AssignmentRecord>> {
        self.index.active_for_class(ctx, class_id)
    }

    pub fn find_assignment(
        &self,
        ctx: &TenantContext,
        class_id: &ClassId,
        attribute_id: AttributeId,
    ) -> EngineResult<Option<AssignmentRecord>> {
        self.index.find_active(ctx, class_id, attribute_id)
    }

    // ==================
    // Composition, validation, analysis
    // ==================

    pub fn compose(&self, ctx: &TenantContext, class_id: &ClassId) -> EngineResult<Arc<ComposedSchema>> {
        self.composer.compose(ctx, class_id)
    }

    /// Compose bypassing the cache
    pub fn compose_fresh(&self, ctx: &TenantContext, class_id: &ClassId) -> EngineResult<Arc<ComposedSchema>> {
        self.composer.compose_fresh(ctx, class_id)
    }

    pub fn validate(
        &self,
        ctx: &TenantContext,
        class_id: &ClassId,
        candidate: &Map<String, Value>,
    ) -> EngineResult<ValidationOutcome> {
        self.validator.validate(ctx, class_id, candidate)
    }

    pub fn validate_json(&self, ctx: &TenantContext, class_id: &ClassId, candidate: &Value) -> EngineResult<ValidationOutcome> {
        self.validator.validate_json(ctx, class_id, candidate)
    }

    pub fn analyze_attribute_change(
        &self,
        ctx: &TenantContext,
        id: AttributeId,
        patch: &AttributePatch,
    ) -> EngineResult<ImpactReport> {
        self.analyzer.analyze_attribute_change(ctx, id, patch)
    }

    pub fn analyze_assignment_change(&self, ctx: &TenantContext, change: &AssignmentChange) -> EngineResult<ImpactReport> {
        self.analyzer.analyze_assignment_change(ctx, change)
    }

    // ==================
    // History and rollback
    // ==================

    /// Evolution records of one attribute or assignment, oldest first
    pub fn history(&self, ctx: &TenantContext, entity_id: Uuid) -> EngineResult<Vec<EvolutionRecord>> {
        self.log.for_entity(&ctx.tenant_id, entity_id)
    }

    pub fn tenant_history(&self, ctx: &TenantContext) -> EngineResult<Vec<EvolutionRecord>> {
        self.log.for_tenant(&ctx.tenant_id)
    }

    /// Undo a recorded change as a new, version-checked mutation.
    ///
    /// The entity must still be at the version the record left it at.
    /// Creates roll back by deactivation or deletion; deactivations and
    /// deletions cannot be rolled back.
    pub fn rollback(
        &self,
        ctx: &TenantContext,
        record_id: Uuid,
        force: bool,
    ) -> EngineResult<ChangeOutcome<SchemaEntity>> {
        let record = self
            .log
            .get(&ctx.tenant_id, record_id)?
            .ok_or(EngineError::EvolutionRecordNotFound(record_id))?;
        let rollback = record.rollback.clone().ok_or_else(|| {
            EngineError::RollbackUnsupported(format!(
                "{} records cannot be rolled back",
                record.action.as_str()
            ))
        })?;

        let expected = record.resulting_version;
        let from = Some(record.id);
        let outcome = match &rollback {
            RollbackData::RestoreAttribute {
                attribute_id,
                base_rules,
                description,
            } => {
                let patch = AttributePatch {
                    base_rules: Some(base_rules.clone()),
                    description: Some(description.clone()),
                    ..Default::default()
                };
                map_entity(
                    self.apply_attribute_update(ctx, *attribute_id, patch, expected, force, from)?,
                    SchemaEntity::Attribute,
                )
            }
            RollbackData::DeactivateAttribute { attribute_id } => map_entity(
                self.apply_attribute_deactivation(ctx, *attribute_id, expected, from)?,
                SchemaEntity::Attribute,
            ),
            RollbackData::RestoreAssignment { assignment_id, .. } => {
                let patch = rollback.assignment_patch().unwrap_or_default();
                map_entity(
                    self.apply_assignment_update(ctx, *assignment_id, patch, expected, force, from)?,
                    SchemaEntity::Assignment,
                )
            }
            RollbackData::DeleteAssignment { assignment_id } => map_entity(
                self.apply_assignment_delete(ctx, *assignment_id, expected, from)?,
                SchemaEntity::Assignment,
            ),
        };

        log_event(
            Event::ChangeRolledBack,
            &[
                ("action", record.action.as_str()),
                ("entity_id", &record.entity_id.to_string()),
                ("record_id", &record_id.to_string()),
                ("request_id", &ctx.request_id.to_string()),
                ("tenant", ctx.tenant_id.as_str()),
            ],
        );
        Ok(outcome)
    }

    // ==================
    // Accessors
    // ==================

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.guard.cache().stats()
    }

    pub fn catalog(&self) -> &Arc<AttributeCatalog> {
        &self.catalog
    }

    pub fn index(&self) -> &Arc<AssignmentIndex> {
        &self.index
    }

    // ==================
    // Write paths
    // ==================

    fn apply_attribute_update(
        &self,
        ctx: &TenantContext,
        id: AttributeId,
        patch: AttributePatch,
        expected_version: u64,
        force: bool,
        rolled_back_from: Option<Uuid>,
    ) -> EngineResult<ChangeOutcome<AttributeDefinition>> {
        let previous = self.catalog.get_active(ctx, id)?;
        self.guard.check_version(ctx, EntityKind::Attribute, id.as_uuid(), expected_version, previous.version)?;

        let report = self.analyzer.analyze_attribute_change(ctx, id, &patch)?;
        self.gate(ctx, &report, force, EntityKind::Attribute)?;

        let updated = self.catalog.update(ctx, id, patch, expected_version)?;
        if updated.version == previous.version {
            return Ok(ChangeOutcome {
                entity: updated,
                report,
                record_id: None,
            });
        }

        let classes = self.index.classes_referencing(ctx, id)?;
        self.guard.invalidate_classes(ctx, &classes)?;

        let mut record = EvolutionRecord::new(ctx, EvolutionAction::AttributeUpdated, id.as_uuid(), updated.version)
            .with_values(snapshot(&previous), snapshot(&updated))
            .with_report(&report, force)
            .with_rollback(RollbackData::restore_attribute(&previous));
        if let Some(from) = rolled_back_from {
            record = record.rolled_back_from(from);
        }
        let record_id = self.record(ctx, record)?;

        Ok(ChangeOutcome {
            entity: updated,
            report,
            record_id: Some(record_id),
        })
    }

    fn apply_attribute_deactivation(
        &self,
        ctx: &TenantContext,
        id: AttributeId,
        expected_version: u64,
        rolled_back_from: Option<Uuid>,
    ) -> EngineResult<ChangeOutcome<AttributeDefinition>> {
        let previous = self.catalog.get_active(ctx, id)?;
        let deactivated = self.catalog.deactivate(ctx, id, expected_version, self.index.as_ref())?;
        let report = ImpactReport::safe(format!("attribute '{}' deactivated", deactivated.name));

        let mut record = EvolutionRecord::new(
            ctx,
            EvolutionAction::AttributeDeactivated,
            id.as_uuid(),
            deactivated.version,
        )
        .with_values(snapshot(&previous), snapshot(&deactivated))
        .with_report(&report, false);
        if let Some(from) = rolled_back_from {
            record = record.rolled_back_from(from);
        }
        let record_id = self.record(ctx, record)?;

        Ok(ChangeOutcome {
            entity: deactivated,
            report,
            record_id: Some(record_id),
        })
    }

    fn apply_assignment_update(
        &self,
        ctx: &TenantContext,
        id: AssignmentId,
        patch: AssignmentPatch,
        expected_version: u64,
        force: bool,
        rolled_back_from: Option<Uuid>,
    ) -> EngineResult<ChangeOutcome<AssignmentRecord>> {
        let previous = self.index.get_active(ctx, id)?;
        self.guard.check_version(ctx, EntityKind::Assignment, id.as_uuid(), expected_version, previous.version)?;

        let change = AssignmentChange::Update {
            assignment_id: id,
            patch: patch.clone(),
        };
        let report = self.analyzer.analyze_assignment_change(ctx, &change)?;
        self.gate(ctx, &report, force, EntityKind::Assignment)?;

        let updated = self.index.update(ctx, id, patch, expected_version)?;
        if updated.version == previous.version {
            return Ok(ChangeOutcome {
                entity: updated,
                report,
                record_id: None,
            });
        }

        let mut record = EvolutionRecord::new(ctx, EvolutionAction::AssignmentUpdated, id.as_uuid(), updated.version)
            .with_values(snapshot(&previous), snapshot(&updated))
            .with_report(&report, force)
            .with_rollback(RollbackData::restore_assignment(&previous));
        if let Some(from) = rolled_back_from {
            record = record.rolled_back_from(from);
        }
        let record_id = self.record(ctx, record)?;

        Ok(ChangeOutcome {
            entity: updated,
            report,
            record_id: Some(record_id),
        })
    }

    fn apply_assignment_delete(
        &self,
        ctx: &TenantContext,
        id: AssignmentId,
        expected_version: u64,
        rolled_back_from: Option<Uuid>,
    ) -> EngineResult<ChangeOutcome<AssignmentRecord>> {
        let previous = self.index.get_active(ctx, id)?;
        self.guard.check_version(ctx, EntityKind::Assignment, id.as_uuid(), expected_version, previous.version)?;

        let report = self
            .analyzer
            .analyze_assignment_change(ctx, &AssignmentChange::Delete { assignment_id: id })?;
        let deleted = self.index.delete(ctx, id, expected_version)?;

        let mut record = EvolutionRecord::new(ctx, EvolutionAction::AssignmentDeleted, id.as_uuid(), deleted.version)
            .with_values(snapshot(&previous), snapshot(&deleted))
            .with_report(&report, false);
        if let Some(from) = rolled_back_from {
            record = record.rolled_back_from(from);
        }
        let record_id = self.record(ctx, record)?;

        Ok(ChangeOutcome {
            entity: deleted,
            report,
            record_id: Some(record_id),
        })
    }

    /// Refuses breaking changes without force
    fn gate(&self, ctx: &TenantContext, report: &ImpactReport, force: bool, entity: EntityKind) -> EngineResult<()> {
        if !report.is_breaking() {
            return Ok(());
        }
        let fields = [
            ("affected_instances", report.affected_instance_count.to_string()),
            ("entity", entity.as_str().to_string()),
            ("request_id", ctx.request_id.to_string()),
            ("tenant", ctx.tenant_id.as_str().to_string()),
        ];
        let fields: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();

        if force {
            log_event(Event::BreakingChangeForced, &fields);
            return Ok(());
        }
        self.metrics.increment_breaking_changes_blocked();
        log_event(Event::BreakingChangeBlocked, &fields);
        Err(EngineError::BreakingChangeNotForced {
            report: Box::new(report.clone()),
        })
    }

    fn record(&self, ctx: &TenantContext, record: EvolutionRecord) -> EngineResult<Uuid> {
        if let Err(e) = self.log.append(&record) {
            log_event(
                Event::StorageFailure,
                &[
                    ("reason", &e.to_string()),
                    ("record_id", &record.id.to_string()),
                    ("request_id", &ctx.request_id.to_string()),
                    ("tenant", ctx.tenant_id.as_str()),
                ],
            );
            return Err(e);
        }

        self.metrics.increment_evolution_records();
        log_event(
            Event::EvolutionRecorded,
            &[
                ("action", record.action.as_str()),
                ("entity_id", &record.entity_id.to_string()),
                ("forced", if record.forced { "true" } else { "false" }),
                ("record_id", &record.id.to_string()),
                ("request_id", &ctx.request_id.to_string()),
                ("safety_level", record.safety_level.as_str()),
                ("tenant", ctx.tenant_id.as_str()),
            ],
        );
        Ok(record.id)
    }
}

fn snapshot<T: Serialize>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}

fn map_entity<T>(outcome: ChangeOutcome<T>, wrap: fn(T) -> SchemaEntity) -> ChangeOutcome<SchemaEntity> {
    ChangeOutcome {
        entity: wrap(outcome.entity),
        report: outcome.report,
        record_id: outcome.record_id,
    }
}
