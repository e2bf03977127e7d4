//! Composed schema types

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::assignment::{AssignmentId, ClassId};
use crate::catalog::AttributeId;
use crate::context::TenantId;
use crate::rules::{DataType, RuleChange};
use crate::validation::CompiledRules;

/// One attribute of a composed schema, with its effective rules
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaAttribute {
    pub attribute_id: AttributeId,
    pub assignment_id: AssignmentId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub data_type: DataType,
    /// Base rules merged with the assignment overrides
    pub rules: CompiledRules,
    /// Rules the assignment narrows relative to the attribute
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub advisories: Vec<RuleChange>,
    pub required: bool,
    pub sort_position: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    pub attribute_version: u64,
    pub assignment_version: u64,
}

/// The full, ordered set of effective rules for one class.
///
/// Immutable once built; the cache hands out shared snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposedSchema {
    pub tenant_id: TenantId,
    pub class_id: ClassId,
    /// Ordered by sort position
    pub attributes: Vec<SchemaAttribute>,
    pub content_hash: String,
    pub required_count: usize,
    pub optional_count: usize,
    /// Latest update among the assignments and attributes involved
    pub last_modified: Option<DateTime<Utc>>,
    pub max_assignment_version: u64,
    pub max_attribute_version: u64,
    pub composed_at: DateTime<Utc>,
}

impl ComposedSchema {
    pub fn new(tenant_id: TenantId, class_id: ClassId, attributes: Vec<SchemaAttribute>, last_modified: Option<DateTime<Utc>>) -> Self {
        let required_count = attributes.iter().filter(|a| a.required).count();
        Self {
            content_hash: content_hash(&attributes),
            required_count,
            optional_count: attributes.len() - required_count,
            max_assignment_version: attributes.iter().map(|a| a.assignment_version).max().unwrap_or(0),
            max_attribute_version: attributes.iter().map(|a| a.attribute_version).max().unwrap_or(0),
            tenant_id,
            class_id,
            attributes,
            last_modified,
            composed_at: Utc::now(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&SchemaAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn required_attributes(&self) -> impl Iterator<Item = &SchemaAttribute> {
        self.attributes.iter().filter(|a| a.required)
    }
}

/// SHA-256 over (attribute id, required, sort position, versions),
/// sorted by attribute id, so the hash ignores load order.
pub fn content_hash(attributes: &[SchemaAttribute]) -> String {
    let mut entries: Vec<_> = attributes
        .iter()
        .map(|a| {
            (
                a.attribute_id,
                format!(
                    "{}|{}|{}|{}|{}",
                    a.attribute_id, a.required, a.sort_position, a.assignment_version, a.attribute_version
                ),
            )
        })
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (_, entry) in &entries {
        hasher.update(entry.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleSet;

    fn attribute(name: &str, position: i32, required: bool) -> SchemaAttribute {
        SchemaAttribute {
            attribute_id: AttributeId::new(),
            assignment_id: AssignmentId::new(),
            name: name.into(),
            display_name: None,
            data_type: DataType::Integer,
            rules: CompiledRules::compile(RuleSet::unconstrained(DataType::Integer)).unwrap(),
            advisories: Vec::new(),
            required,
            sort_position: position,
            default_value: None,
            attribute_version: 1,
            assignment_version: 1,
        }
    }

    #[test]
    fn test_hash_ignores_order() {
        let a = attribute("a", 0, true);
        let b = attribute("b", 1, false);
        assert_eq!(
            content_hash(&[a.clone(), b.clone()]),
            content_hash(&[b, a])
        );
    }

    #[test]
    fn test_hash_tracks_versions_and_flags() {
        let a = attribute("a", 0, true);
        let base = content_hash(&[a.clone()]);

        let mut bumped = a.clone();
        bumped.assignment_version = 2;
        assert_ne!(content_hash(&[bumped]), base);

        let mut optional = a.clone();
        optional.required = false;
        assert_ne!(content_hash(&[optional]), base);

        let mut moved = a;
        moved.sort_position = 9;
        assert_ne!(content_hash(&[moved]), base);
    }

    #[test]
    fn test_counts() {
        let schema = ComposedSchema::new(
            TenantId::parse("acme").unwrap(),
            ClassId::parse("Person").unwrap(),
            vec![attribute("a", 0, true), attribute("b", 1, false), attribute("c", 2, false)],
            None,
        );
        assert_eq!(schema.required_count, 1);
        assert_eq!(schema.optional_count, 2);
        assert_eq!(schema.required_attributes().count(), 1);
        assert!(schema.attribute("b").is_some());
        assert!(schema.attribute("z").is_none());
        assert_eq!(schema.content_hash.len(), 64);
    }

    #[test]
    fn test_empty_schema() {
        let schema = ComposedSchema::new(
            TenantId::parse("acme").unwrap(),
            ClassId::parse("Empty").unwrap(),
            Vec::new(),
            None,
        );
        assert!(schema.is_empty());
        assert_eq!(schema.max_assignment_version, 0);
        assert_eq!(schema.content_hash, content_hash(&[]));
    }
}
