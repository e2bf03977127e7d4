//! Assignment types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::catalog::{AttributeId, EntityState};
use crate::context::TenantId;
use crate::errors::{EngineError, EngineResult};
use crate::rules::RuleSet;

/// Class identifier.
///
/// Opaque to the engine; existence is answered by the class registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(String);

impl ClassId {
    /// Blank identifiers can never name a class
    pub fn parse(raw: impl Into<String>) -> EngineResult<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() || raw.chars().any(char::is_control) {
            return Err(EngineError::ClassNotFound(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Assignment identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssignmentId(Uuid);

impl AssignmentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AssignmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for AssignmentId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Binding of one attribute to one class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub id: AssignmentId,
    pub tenant_id: TenantId,
    pub class_id: ClassId,
    pub attribute_id: AttributeId,
    pub required: bool,
    /// Unique among the active assignments of the class
    pub sort_position: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Per-class rule overrides, merged over the attribute's base rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_rules: Option<RuleSet>,
    /// Satisfies the effective rules at write time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    pub version: u64,
    pub state: EntityState,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AssignmentRecord {
    pub fn is_active(&self) -> bool {
        self.state == EntityState::Active
    }
}

/// Input for creating an assignment
#[derive(Debug, Clone, PartialEq)]
pub struct NewAssignment {
    pub class_id: ClassId,
    pub attribute_id: AttributeId,
    pub required: bool,
    pub sort_position: i32,
    pub display_name: Option<String>,
    pub override_rules: Option<RuleSet>,
    pub default_value: Option<Value>,
}

impl NewAssignment {
    pub fn new(class_id: ClassId, attribute_id: AttributeId, sort_position: i32) -> Self {
        Self {
            class_id,
            attribute_id,
            required: false,
            sort_position,
            display_name: None,
            override_rules: None,
            default_value: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_overrides(mut self, rules: RuleSet) -> Self {
        self.override_rules = Some(rules);
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// Optional fields for an assignment update.
///
/// For clearable fields the outer `Option` says whether the field is
/// touched, the inner one carries the new value (`None` clears it).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentPatch {
    pub required: Option<bool>,
    pub sort_position: Option<i32>,
    pub display_name: Option<Option<String>>,
    pub override_rules: Option<Option<RuleSet>>,
    pub default_value: Option<Option<Value>>,
}

impl AssignmentPatch {
    pub fn is_empty(&self) -> bool {
        self.required.is_none()
            && self.sort_position.is_none()
            && self.display_name.is_none()
            && self.override_rules.is_none()
            && self.default_value.is_none()
    }
}

/// Treats JSON `null` like an absent default
pub(crate) fn normalize_default(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !v.is_null())
}
