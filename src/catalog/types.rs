//! Attribute definition types

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::TenantId;
use crate::errors::{EngineError, EngineResult};
use crate::rules::{DataType, RuleSet};

/// Longest attribute name accepted
pub const MAX_NAME_LENGTH: usize = 64;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").expect("static name pattern"))
}

/// Checks an attribute name against the naming rule
pub fn validate_name(name: &str) -> EngineResult<()> {
    if name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(EngineError::InvalidName(format!(
            "'{}' must start with a lowercase letter and contain only [a-z0-9_], at most {} characters",
            name, MAX_NAME_LENGTH
        )))
    }
}

/// Attribute identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeId(Uuid);

impl AttributeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AttributeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for AttributeId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a catalog entity. `Deactivated` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    Active,
    Deactivated,
}

impl EntityState {
    /// Only `Active -> Deactivated` is a legal transition
    pub fn can_transition_to(&self, next: EntityState) -> bool {
        matches!((self, next), (EntityState::Active, EntityState::Deactivated))
    }
}

/// A reusable, typed property template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub id: AttributeId,
    pub tenant_id: TenantId,
    /// Tenant-unique among active attributes; immutable
    pub name: String,
    /// Immutable after creation
    pub data_type: DataType,
    pub base_rules: RuleSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Monotonic, starts at 1
    pub version: u64,
    pub state: EntityState,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AttributeDefinition {
    pub fn is_active(&self) -> bool {
        self.state == EntityState::Active
    }
}

/// Input for creating an attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAttribute {
    pub name: String,
    pub data_type: DataType,
    /// `None` means unconstrained
    #[serde(default)]
    pub base_rules: Option<RuleSet>,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewAttribute {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            base_rules: None,
            description: None,
        }
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.base_rules = Some(rules);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Optional fields for an attribute update.
///
/// `name` and `data_type` are accepted only when unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributePatch {
    pub name: Option<String>,
    pub data_type: Option<DataType>,
    pub base_rules: Option<RuleSet>,
    /// `Some(None)` clears the description
    pub description: Option<Option<String>>,
}

impl AttributePatch {
    pub fn rules(rules: RuleSet) -> Self {
        Self {
            base_rules: Some(rules),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.data_type.is_none()
            && self.base_rules.is_none()
            && self.description.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_rule() {
        assert!(validate_name("age").is_ok());
        assert!(validate_name("birth_date_2").is_ok());
        assert!(validate_name("Age").is_err());
        assert!(validate_name("2fast").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("with-dash").is_err());
        assert!(validate_name(&"a".repeat(MAX_NAME_LENGTH)).is_ok());
        assert!(validate_name(&"a".repeat(MAX_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_state_machine() {
        assert!(EntityState::Active.can_transition_to(EntityState::Deactivated));
        assert!(!EntityState::Deactivated.can_transition_to(EntityState::Active));
        assert!(!EntityState::Deactivated.can_transition_to(EntityState::Deactivated));
    }

    #[test]
    fn test_patch_is_empty() {
        assert!(AttributePatch::default().is_empty());
        assert!(!AttributePatch::rules(RuleSet::unconstrained(DataType::String)).is_empty());
    }
}
