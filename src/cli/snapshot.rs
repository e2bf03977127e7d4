//! Catalog snapshots
//!
//! A JSON file describing one tenant's classes, attributes, assignments
//! and persisted instances. The CLI replays it through a fresh
//! `SchemaService`, so every entry goes through the same checks as a
//! live write.
//!
//! ```json
//! {
//!   "tenant": "acme",
//!   "classes": ["Person"],
//!   "attributes": [{"name": "age", "data_type": "integer", "rules": {"min": 0}}],
//!   "assignments": [{"class": "Person", "attribute": "age", "required": true, "sort_position": 0}],
//!   "instances": [{"class": "Person", "values": {"age": 42}}]
//! }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::errors::{CliError, CliResult};
use crate::assignment::{ClassId, NewAssignment};
use crate::catalog::{AttributeId, NewAttribute};
use crate::config::EngineConfig;
use crate::context::TenantContext;
use crate::external::{InMemoryClassRegistry, InMemoryInstanceStore, InstanceValues};
use crate::observability::{log_event, Event};
use crate::rules::{DataType, RuleSet};
use crate::service::SchemaService;

/// Actor recorded on everything the CLI creates
pub const CLI_ACTOR: &str = "formwork-cli";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeEntry>,
    #[serde(default)]
    pub assignments: Vec<AssignmentEntry>,
    #[serde(default)]
    pub instances: Vec<InstanceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributeEntry {
    pub name: String,
    pub data_type: DataType,
    /// Untagged rule object for `data_type`
    #[serde(default)]
    pub rules: Value,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentEntry {
    pub class: String,
    /// Attribute name
    pub attribute: String,
    #[serde(default)]
    pub required: bool,
    pub sort_position: i32,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub override_rules: Option<Value>,
    #[serde(default)]
    pub default_value: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceEntry {
    pub class: String,
    /// Stored values keyed by attribute name
    #[serde(default)]
    pub values: Map<String, Value>,
}

/// A snapshot replayed into a live service
pub struct LoadedCatalog {
    pub service: SchemaService,
    pub ctx: TenantContext,
    pub classes: Vec<ClassId>,
    /// Attribute ids and data types by name
    pub attributes: HashMap<String, (AttributeId, DataType)>,
    pub assignment_count: usize,
    pub instance_count: usize,
}

impl LoadedCatalog {
    pub fn attribute(&self, name: &str) -> CliResult<(AttributeId, DataType)> {
        lookup(&self.attributes, name)
    }
}

impl CatalogSnapshot {
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::io_error(format!("Failed to read catalog {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| CliError::catalog_error(format!("Invalid catalog JSON: {}", e)))
    }

    /// Replay the snapshot: classes, then attributes, then assignments, then instances
    pub fn replay(self, config: &EngineConfig, tenant: Option<&str>) -> CliResult<LoadedCatalog> {
        let tenant = tenant
            .map(str::to_string)
            .or(self.tenant)
            .or_else(|| config.default_tenant.clone())
            .ok_or_else(|| CliError::catalog_error("no tenant given by --tenant, the catalog or the config"))?;
        let ctx = TenantContext::new(tenant, CLI_ACTOR)?;

        let registry = Arc::new(InMemoryClassRegistry::new());
        let store = Arc::new(InMemoryInstanceStore::new());
        let service = SchemaService::from_config(config, registry.clone(), store.clone())?;

        let mut classes = Vec::with_capacity(self.classes.len());
        for raw in self.classes {
            let class_id = ClassId::parse(raw)?;
            registry.add_class(&ctx.tenant_id, class_id.clone())?;
            classes.push(class_id);
        }

        let mut attributes = HashMap::with_capacity(self.attributes.len());
        for entry in self.attributes {
            let rules = RuleSet::from_json(entry.data_type, &entry.rules)?;
            let input = NewAttribute {
                name: entry.name,
                data_type: entry.data_type,
                base_rules: Some(rules),
                description: entry.description,
            };
            let created = service.create_attribute(&ctx, input)?.entity;
            attributes.insert(created.name.clone(), (created.id, created.data_type));
        }

        let assignment_count = self.assignments.len();
        for entry in self.assignments {
            let (attribute_id, data_type) = lookup(&attributes, &entry.attribute)?;
            let override_rules = entry
                .override_rules
                .as_ref()
                .map(|raw| RuleSet::from_json(data_type, raw))
                .transpose()?;
            let input = NewAssignment {
                class_id: ClassId::parse(entry.class)?,
                attribute_id,
                required: entry.required,
                sort_position: entry.sort_position,
                display_name: entry.display_name,
                override_rules,
                default_value: entry.default_value,
            };
            // Instances are replayed last, so no create here can be breaking
            service.create_assignment(&ctx, input, false)?;
        }

        let instance_count = self.instances.len();
        for entry in self.instances {
            let class_id = ClassId::parse(entry.class)?;
            let mut values = InstanceValues::with_capacity(entry.values.len());
            for (name, value) in entry.values {
                values.insert(lookup(&attributes, &name)?.0, value);
            }
            store.add_instance(&ctx.tenant_id, &class_id, values)?;
        }

        log_event(
            Event::CatalogLoaded,
            &[
                ("assignments", &assignment_count.to_string()),
                ("attributes", &attributes.len().to_string()),
                ("classes", &classes.len().to_string()),
                ("instances", &instance_count.to_string()),
                ("tenant", ctx.tenant_id.as_str()),
            ],
        );

        Ok(LoadedCatalog {
            service,
            ctx,
            classes,
            attributes,
            assignment_count,
            instance_count,
        })
    }
}

fn lookup(attributes: &HashMap<String, (AttributeId, DataType)>, name: &str) -> CliResult<(AttributeId, DataType)> {
    attributes
        .get(name)
        .copied()
        .ok_or_else(|| CliError::catalog_error(format!("unknown attribute '{}'", name)))
}
