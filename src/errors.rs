//! # Engine Errors
//!
//! Error taxonomy shared by every formwork subsystem.
//!
//! Categories:
//! - NotFound: referenced attribute/assignment/class absent or inactive
//! - Conflict: name, assignment, sort position or version collisions
//! - Invalid: malformed rules, names, defaults or tenant scopes
//! - Blocked: the change is well-formed but policy refuses it
//! - Fatal: loss of the underlying storage medium, propagated unmodified

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::evolution::ImpactReport;
use crate::validation::Violation;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Coarse error category, used by callers to pick a recovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    Invalid,
    Blocked,
    Fatal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NotFound => "NOT_FOUND",
            ErrorCategory::Conflict => "CONFLICT",
            ErrorCategory::Invalid => "INVALID",
            ErrorCategory::Blocked => "BLOCKED",
            ErrorCategory::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Versioned entity kinds, used in conflict and not-found reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Attribute,
    Assignment,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Attribute => "attribute",
            EntityKind::Assignment => "assignment",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised by the schema engine
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    // ==================
    // NotFound
    // ==================
    #[error("Attribute not found: {0}")]
    AttributeNotFound(String),

    #[error("Assignment not found: {0}")]
    AssignmentNotFound(Uuid),

    #[error("Class not found: {0}")]
    ClassNotFound(String),

    #[error("Evolution record not found: {0}")]
    EvolutionRecordNotFound(Uuid),

    // ==================
    // Conflict
    // ==================
    #[error("Attribute name already in use: {0}")]
    NameConflict(String),

    #[error("Attribute {attribute} is already assigned to class {class_id}")]
    DuplicateAssignment { class_id: String, attribute: String },

    #[error("Sort position {position} is already taken in class {class_id}")]
    SortPositionConflict { class_id: String, position: i32 },

    #[error("Version conflict on {entity} {id}: expected {expected}, found {actual}")]
    VersionConflict {
        entity: EntityKind,
        id: Uuid,
        expected: u64,
        actual: u64,
    },

    // ==================
    // Invalid
    // ==================
    #[error("Invalid rule set: {0}")]
    InvalidRuleSet(String),

    #[error("Invalid attribute name: {0}")]
    InvalidName(String),

    #[error("Field is immutable: {0}")]
    ImmutableField(&'static str),

    #[error("Default value violates effective rules ({} violation(s))", violations.len())]
    DefaultValueInvalid { violations: Vec<Violation> },

    #[error("Invalid tenant: {0}")]
    InvalidTenant(String),

    #[error("Rollback not supported: {0}")]
    RollbackUnsupported(String),

    // ==================
    // Blocked
    // ==================
    #[error("Attribute {attribute} is referenced by {assignments} active assignment(s)")]
    InUse { attribute: String, assignments: usize },

    #[error("Breaking change rejected; {} instance(s) affected, force required", report.affected_instance_count)]
    BreakingChangeNotForced { report: Box<ImpactReport> },

    // ==================
    // Fatal / transport
    // ==================
    #[error("Deadline exceeded before {0}")]
    DeadlineExceeded(&'static str),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Returns the category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::AttributeNotFound(_)
            | EngineError::AssignmentNotFound(_)
            | EngineError::ClassNotFound(_)
            | EngineError::EvolutionRecordNotFound(_) => ErrorCategory::NotFound,

            EngineError::NameConflict(_)
            | EngineError::DuplicateAssignment { .. }
            | EngineError::SortPositionConflict { .. }
            | EngineError::VersionConflict { .. } => ErrorCategory::Conflict,

            EngineError::InvalidRuleSet(_)
            | EngineError::InvalidName(_)
            | EngineError::ImmutableField(_)
            | EngineError::DefaultValueInvalid { .. }
            | EngineError::InvalidTenant(_)
            | EngineError::RollbackUnsupported(_) => ErrorCategory::Invalid,

            EngineError::InUse { .. } | EngineError::BreakingChangeNotForced { .. } => {
                ErrorCategory::Blocked
            }

            // Deadlines are enforced by the transport; surfaced as fatal for this call only
            EngineError::DeadlineExceeded(_) | EngineError::Storage(_) => ErrorCategory::Fatal,
        }
    }

    /// Returns the stable error code string
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::AttributeNotFound(_) => "FORMWORK_ATTRIBUTE_NOT_FOUND",
            EngineError::AssignmentNotFound(_) => "FORMWORK_ASSIGNMENT_NOT_FOUND",
            EngineError::ClassNotFound(_) => "FORMWORK_CLASS_NOT_FOUND",
            EngineError::EvolutionRecordNotFound(_) => "FORMWORK_EVOLUTION_RECORD_NOT_FOUND",
            EngineError::NameConflict(_) => "FORMWORK_NAME_CONFLICT",
            EngineError::DuplicateAssignment { .. } => "FORMWORK_DUPLICATE_ASSIGNMENT",
            EngineError::SortPositionConflict { .. } => "FORMWORK_SORT_POSITION_CONFLICT",
            EngineError::VersionConflict { .. } => "FORMWORK_VERSION_CONFLICT",
            EngineError::InvalidRuleSet(_) => "FORMWORK_INVALID_RULE_SET",
            EngineError::InvalidName(_) => "FORMWORK_INVALID_NAME",
            EngineError::ImmutableField(_) => "FORMWORK_IMMUTABLE_FIELD",
            EngineError::DefaultValueInvalid { .. } => "FORMWORK_DEFAULT_VALUE_INVALID",
            EngineError::InvalidTenant(_) => "FORMWORK_INVALID_TENANT",
            EngineError::RollbackUnsupported(_) => "FORMWORK_ROLLBACK_UNSUPPORTED",
            EngineError::InUse { .. } => "FORMWORK_IN_USE",
            EngineError::BreakingChangeNotForced { .. } => "FORMWORK_BREAKING_CHANGE_NOT_FORCED",
            EngineError::DeadlineExceeded(_) => "FORMWORK_DEADLINE_EXCEEDED",
            EngineError::Storage(_) => "FORMWORK_STORAGE_FAILURE",
        }
    }

    /// Whether the caller may retry: version conflicts after a re-read,
    /// storage failures with backoff at a higher layer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::VersionConflict { .. } | EngineError::Storage(_)
        )
    }

    /// Whether this error originates from the storage medium
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Fatal
    }

    pub(crate) fn lock_poisoned(what: &str) -> Self {
        EngineError::Storage(format!("{} lock poisoned", what))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            EngineError::AttributeNotFound("age".into()).category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            EngineError::NameConflict("age".into()).category(),
            ErrorCategory::Conflict
        );
        assert_eq!(
            EngineError::InvalidRuleSet("min > max".into()).category(),
            ErrorCategory::Invalid
        );
        assert_eq!(
            EngineError::InUse {
                attribute: "age".into(),
                assignments: 2
            }
            .category(),
            ErrorCategory::Blocked
        );
        assert_eq!(
            EngineError::Storage("disk gone".into()).category(),
            ErrorCategory::Fatal
        );
    }

    #[test]
    fn test_version_conflict_is_retryable() {
        let err = EngineError::VersionConflict {
            entity: EntityKind::Assignment,
            id: Uuid::new_v4(),
            expected: 1,
            actual: 2,
        };
        assert!(err.is_retryable());
        assert_eq!(err.code(), "FORMWORK_VERSION_CONFLICT");
        assert!(err.to_string().contains("expected 1, found 2"));
    }

    #[test]
    fn test_invalid_is_not_retryable() {
        let err = EngineError::ImmutableField("data_type");
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("data_type"));
    }
}
