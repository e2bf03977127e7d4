//! Evolution records and the append-only evolution log.
//!
//! Every applied schema change produces one record: old and new JSON,
//! the impact verdict with its instance-count snapshot, whether force was
//! used, and what it takes to undo the change.
//!
//! Records are never updated or deleted. A rollback is a new record
//! pointing back at the one it undoes.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::report::{ClassImpact, ImpactReport, SafetyLevel};
use crate::assignment::{AssignmentId, AssignmentPatch, AssignmentRecord};
use crate::catalog::{AttributeDefinition, AttributeId};
use crate::context::{TenantContext, TenantId};
use crate::errors::{EngineError, EngineResult, EntityKind};
use crate::rules::RuleSet;

/// What kind of mutation a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvolutionAction {
    AttributeCreated,
    AttributeUpdated,
    AttributeDeactivated,
    AssignmentCreated,
    AssignmentUpdated,
    AssignmentDeleted,
}

impl EvolutionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvolutionAction::AttributeCreated => "ATTRIBUTE_CREATED",
            EvolutionAction::AttributeUpdated => "ATTRIBUTE_UPDATED",
            EvolutionAction::AttributeDeactivated => "ATTRIBUTE_DEACTIVATED",
            EvolutionAction::AssignmentCreated => "ASSIGNMENT_CREATED",
            EvolutionAction::AssignmentUpdated => "ASSIGNMENT_UPDATED",
            EvolutionAction::AssignmentDeleted => "ASSIGNMENT_DELETED",
        }
    }

    pub fn entity_kind(&self) -> EntityKind {
        match self {
            EvolutionAction::AttributeCreated
            | EvolutionAction::AttributeUpdated
            | EvolutionAction::AttributeDeactivated => EntityKind::Attribute,
            EvolutionAction::AssignmentCreated
            | EvolutionAction::AssignmentUpdated
            | EvolutionAction::AssignmentDeleted => EntityKind::Assignment,
        }
    }
}

/// The mutation that undoes a recorded change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RollbackData {
    /// Put back the previous base rules and description
    RestoreAttribute {
        attribute_id: AttributeId,
        base_rules: RuleSet,
        #[serde(default)]
        description: Option<String>,
    },
    /// Undo a create
    DeactivateAttribute { attribute_id: AttributeId },
    /// Put back every mutable field of the previous assignment
    RestoreAssignment {
        assignment_id: AssignmentId,
        required: bool,
        sort_position: i32,
        #[serde(default)]
        display_name: Option<String>,
        #[serde(default)]
        override_rules: Option<RuleSet>,
        #[serde(default)]
        default_value: Option<Value>,
    },
    /// Undo a create
    DeleteAssignment { assignment_id: AssignmentId },
}

impl RollbackData {
    pub fn restore_attribute(previous: &AttributeDefinition) -> Self {
        RollbackData::RestoreAttribute {
            attribute_id: previous.id,
            base_rules: previous.base_rules.clone(),
            description: previous.description.clone(),
        }
    }

    pub fn restore_assignment(previous: &AssignmentRecord) -> Self {
        RollbackData::RestoreAssignment {
            assignment_id: previous.id,
            required: previous.required,
            sort_position: previous.sort_position,
            display_name: previous.display_name.clone(),
            override_rules: previous.override_rules.clone(),
            default_value: previous.default_value.clone(),
        }
    }

    /// The assignment patch this rollback applies, if it restores an assignment
    pub fn assignment_patch(&self) -> Option<AssignmentPatch> {
        match self {
            RollbackData::RestoreAssignment {
                required,
                sort_position,
                display_name,
                override_rules,
                default_value,
                ..
            } => Some(AssignmentPatch {
                required: Some(*required),
                sort_position: Some(*sort_position),
                display_name: Some(display_name.clone()),
                override_rules: Some(override_rules.clone()),
                default_value: Some(default_value.clone()),
            }),
            _ => None,
        }
    }
}

/// One applied schema change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub actor: String,
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: EvolutionAction,
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    #[serde(default)]
    pub old_value: Option<Value>,
    #[serde(default)]
    pub new_value: Option<Value>,
    pub safety_level: SafetyLevel,
    /// Whether a breaking change was applied with force
    pub forced: bool,
    /// Instance counts the verdict was based on
    #[serde(default)]
    pub impact: Vec<ClassImpact>,
    /// Entity version after the change
    pub resulting_version: u64,
    #[serde(default)]
    pub rollback: Option<RollbackData>,
    /// Set on records produced by a rollback
    #[serde(default)]
    pub rolled_back_from: Option<Uuid>,
}

impl EvolutionRecord {
    pub fn new(ctx: &TenantContext, action: EvolutionAction, entity_id: Uuid, resulting_version: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id.clone(),
            actor: ctx.actor.clone(),
            request_id: ctx.request_id,
            timestamp: Utc::now(),
            action,
            entity_kind: action.entity_kind(),
            entity_id,
            old_value: None,
            new_value: None,
            safety_level: SafetyLevel::Safe,
            forced: false,
            impact: Vec::new(),
            resulting_version,
            rollback: None,
            rolled_back_from: None,
        }
    }

    pub fn with_values(mut self, old_value: Option<Value>, new_value: Option<Value>) -> Self {
        self.old_value = old_value;
        self.new_value = new_value;
        self
    }

    pub fn with_report(mut self, report: &ImpactReport, forced: bool) -> Self {
        self.safety_level = report.safety_level;
        self.forced = forced && report.is_breaking();
        self.impact = report.classes.clone();
        self
    }

    pub fn with_rollback(mut self, rollback: RollbackData) -> Self {
        self.rollback = Some(rollback);
        self
    }

    pub fn rolled_back_from(mut self, record_id: Uuid) -> Self {
        self.rolled_back_from = Some(record_id);
        self
    }

    pub fn to_json(&self) -> EngineResult<String> {
        serde_json::to_string(self)
            .map_err(|e| EngineError::Storage(format!("evolution record encoding failed: {}", e)))
    }
}

/// Append-only store of evolution records.
///
/// An append must be durable and visible to queries once it returns.
pub trait EvolutionLog: Send + Sync {
    fn append(&self, record: &EvolutionRecord) -> EngineResult<()>;

    fn get(&self, tenant_id: &TenantId, record_id: Uuid) -> EngineResult<Option<EvolutionRecord>>;

    /// Records of one entity, oldest first
    fn for_entity(&self, tenant_id: &TenantId, entity_id: Uuid) -> EngineResult<Vec<EvolutionRecord>>;

    /// Every record of a tenant, oldest first
    fn for_tenant(&self, tenant_id: &TenantId) -> EngineResult<Vec<EvolutionRecord>>;
}

/// JSON-lines evolution log; every append is flushed and synced.
pub struct FileEvolutionLog {
    path: PathBuf,
    writer: Arc<Mutex<BufWriter<File>>>,
}

impl FileEvolutionLog {
    /// Open or create the log file
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| storage_error(&path, e))?;

        Ok(Self {
            path,
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> EngineResult<Vec<EvolutionRecord>> {
        // Hold the writer so a concurrent append is never read half-written
        let _writer = self
            .writer
            .lock()
            .map_err(|_| EngineError::lock_poisoned("evolution log"))?;

        let file = File::open(&self.path).map_err(|e| storage_error(&self.path, e))?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| storage_error(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|e| {
                EngineError::Storage(format!("corrupt evolution log {}: {}", self.path.display(), e))
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

impl EvolutionLog for FileEvolutionLog {
    fn append(&self, record: &EvolutionRecord) -> EngineResult<()> {
        let json = record.to_json()?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| EngineError::lock_poisoned("evolution log"))?;
        writeln!(writer, "{}", json).map_err(|e| storage_error(&self.path, e))?;
        writer.flush().map_err(|e| storage_error(&self.path, e))?;
        writer.get_ref().sync_all().map_err(|e| storage_error(&self.path, e))
    }

    fn get(&self, tenant_id: &TenantId, record_id: Uuid) -> EngineResult<Option<EvolutionRecord>> {
        Ok(self
            .read_all()?
            .into_iter()
            .find(|r| r.id == record_id && &r.tenant_id == tenant_id))
    }

    fn for_entity(&self, tenant_id: &TenantId, entity_id: Uuid) -> EngineResult<Vec<EvolutionRecord>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| r.entity_id == entity_id && &r.tenant_id == tenant_id)
            .collect())
    }

    fn for_tenant(&self, tenant_id: &TenantId) -> EngineResult<Vec<EvolutionRecord>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| &r.tenant_id == tenant_id)
            .collect())
    }
}

fn storage_error(path: &Path, err: io::Error) -> EngineError {
    EngineError::Storage(format!("evolution log {}: {}", path.display(), err))
}

/// In-memory evolution log
#[derive(Debug, Default)]
pub struct MemoryEvolutionLog {
    records: Mutex<Vec<EvolutionRecord>>,
}

impl MemoryEvolutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(&self, keep: impl Fn(&EvolutionRecord) -> bool) -> EngineResult<Vec<EvolutionRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| EngineError::lock_poisoned("evolution log"))?;
        Ok(records.iter().filter(|r| keep(r)).cloned().collect())
    }
}

impl EvolutionLog for MemoryEvolutionLog {
    fn append(&self, record: &EvolutionRecord) -> EngineResult<()> {
        self.records
            .lock()
            .map_err(|_| EngineError::lock_poisoned("evolution log"))?
            .push(record.clone());
        Ok(())
    }

    fn get(&self, tenant_id: &TenantId, record_id: Uuid) -> EngineResult<Option<EvolutionRecord>> {
        Ok(self
            .select(|r| r.id == record_id && &r.tenant_id == tenant_id)?
            .into_iter()
            .next())
    }

    fn for_entity(&self, tenant_id: &TenantId, entity_id: Uuid) -> EngineResult<Vec<EvolutionRecord>> {
        self.select(|r| r.entity_id == entity_id && &r.tenant_id == tenant_id)
    }

    fn for_tenant(&self, tenant_id: &TenantId) -> EngineResult<Vec<EvolutionRecord>> {
        self.select(|r| &r.tenant_id == tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{DataType, IntegerRules};
    use serde_json::json;
    use tempfile::tempdir;

    fn ctx(tenant: &str) -> TenantContext {
        TenantContext::new(tenant, "tester").unwrap()
    }

    fn record(tenant: &str, entity_id: Uuid) -> EvolutionRecord {
        EvolutionRecord::new(&ctx(tenant), EvolutionAction::AttributeUpdated, entity_id, 2)
            .with_values(Some(json!({"max": 200})), Some(json!({"max": 120})))
            .with_rollback(RollbackData::RestoreAttribute {
                attribute_id: AttributeId::new(),
                base_rules: RuleSet::Integer(IntegerRules {
                    max: Some(200),
                    ..Default::default()
                }),
                description: None,
            })
    }

    #[test]
    fn test_action_entity_kind() {
        assert_eq!(EvolutionAction::AttributeCreated.entity_kind(), EntityKind::Attribute);
        assert_eq!(EvolutionAction::AssignmentDeleted.entity_kind(), EntityKind::Assignment);
        assert_eq!(EvolutionAction::AssignmentUpdated.as_str(), "ASSIGNMENT_UPDATED");
    }

    #[test]
    fn test_forced_only_when_breaking() {
        let mut report = ImpactReport::safe("relaxed");
        let rec = record("acme", Uuid::new_v4()).with_report(&report, true);
        assert!(!rec.forced);

        report.escalate(SafetyLevel::Breaking);
        let rec = record("acme", Uuid::new_v4()).with_report(&report, true);
        assert!(rec.forced);
        assert_eq!(rec.safety_level, SafetyLevel::Breaking);
    }

    #[test]
    fn test_memory_log_is_tenant_scoped() {
        let log = MemoryEvolutionLog::new();
        let entity = Uuid::new_v4();
        let first = record("acme", entity);
        let second = record("acme", entity);
        let foreign = record("globex", entity);
        log.append(&first).unwrap();
        log.append(&second).unwrap();
        log.append(&foreign).unwrap();

        let acme = TenantId::parse("acme").unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log.for_entity(&acme, entity).unwrap(), vec![first.clone(), second]);
        assert_eq!(log.get(&acme, first.id).unwrap(), Some(first));
        assert_eq!(log.get(&acme, foreign.id).unwrap(), None);
    }

    #[test]
    fn test_file_log_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("evolution.jsonl");
        let entity = Uuid::new_v4();
        let rec = record("acme", entity);

        {
            let log = FileEvolutionLog::open(&path).unwrap();
            log.append(&rec).unwrap();
        }

        let log = FileEvolutionLog::open(&path).unwrap();
        let acme = TenantId::parse("acme").unwrap();
        let found = log.get(&acme, rec.id).unwrap().unwrap();
        assert_eq!(found, rec);
        assert_eq!(log.for_tenant(&acme).unwrap().len(), 1);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("ATTRIBUTE_UPDATED"));
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn test_corrupt_file_is_storage_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("evolution.jsonl");
        std::fs::write(&path, "not json\n").unwrap();

        let log = FileEvolutionLog::open(&path).unwrap();
        let err = log.for_tenant(&TenantId::parse("acme").unwrap()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_assignment_patch_from_rollback() {
        let data = RollbackData::RestoreAssignment {
            assignment_id: AssignmentId::new(),
            required: true,
            sort_position: 3,
            display_name: None,
            override_rules: Some(RuleSet::unconstrained(DataType::Integer)),
            default_value: Some(json!(1)),
        };
        let patch = data.assignment_patch().unwrap();
        assert_eq!(patch.required, Some(true));
        assert_eq!(patch.sort_position, Some(3));
        assert_eq!(patch.default_value, Some(Some(json!(1))));
        assert!(RollbackData::DeleteAssignment { assignment_id: AssignmentId::new() }
            .assignment_patch()
            .is_none());
    }
}
