//! Observable engine events
//!
//! Events are explicit and typed; each maps to one stable log event name.

use std::fmt;

use super::logger::Severity;

/// Observable events in formwork
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    // Lifecycle
    /// Configuration loaded
    ConfigLoaded,
    /// Catalog snapshot replayed into the engine
    CatalogLoaded,

    // Attribute catalog
    AttributeCreated,
    AttributeUpdated,
    AttributeDeactivated,

    // Assignment index
    AssignmentCreated,
    AssignmentUpdated,
    AssignmentDeleted,

    // Composition
    /// Schema recomputed from the catalog and index
    SchemaComposed,
    /// Cached schema confirmed current by the version probe
    SchemaCacheHit,
    /// Cached schema discarded after a write
    SchemaInvalidated,

    // Validation
    ValidationAccepted,
    ValidationRejected,

    // Concurrency and evolution
    /// Optimistic version check failed
    VersionConflict,
    /// Impact analysis finished
    ChangeAnalyzed,
    /// Breaking change refused without force
    BreakingChangeBlocked,
    /// Breaking change applied because force was supplied
    BreakingChangeForced,
    /// Evolution record appended
    EvolutionRecorded,
    /// Change rolled back from an evolution record
    ChangeRolledBack,

    /// Storage or log medium failed
    StorageFailure,
}

impl Event {
    /// Returns the event name as it appears in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::CatalogLoaded => "CATALOG_LOADED",
            Event::AttributeCreated => "ATTRIBUTE_CREATED",
            Event::AttributeUpdated => "ATTRIBUTE_UPDATED",
            Event::AttributeDeactivated => "ATTRIBUTE_DEACTIVATED",
            Event::AssignmentCreated => "ASSIGNMENT_CREATED",
            Event::AssignmentUpdated => "ASSIGNMENT_UPDATED",
            Event::AssignmentDeleted => "ASSIGNMENT_DELETED",
            Event::SchemaComposed => "SCHEMA_COMPOSED",
            Event::SchemaCacheHit => "SCHEMA_CACHE_HIT",
            Event::SchemaInvalidated => "SCHEMA_INVALIDATED",
            Event::ValidationAccepted => "VALIDATION_ACCEPTED",
            Event::ValidationRejected => "VALIDATION_REJECTED",
            Event::VersionConflict => "VERSION_CONFLICT",
            Event::ChangeAnalyzed => "CHANGE_ANALYZED",
            Event::BreakingChangeBlocked => "BREAKING_CHANGE_BLOCKED",
            Event::BreakingChangeForced => "BREAKING_CHANGE_FORCED",
            Event::EvolutionRecorded => "EVOLUTION_RECORDED",
            Event::ChangeRolledBack => "CHANGE_ROLLED_BACK",
            Event::StorageFailure => "STORAGE_FAILURE",
        }
    }

    /// Default severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::SchemaCacheHit | Event::ValidationAccepted | Event::SchemaComposed => {
                Severity::Trace
            }
            Event::ValidationRejected
            | Event::VersionConflict
            | Event::BreakingChangeBlocked
            | Event::BreakingChangeForced => Severity::Warn,
            Event::StorageFailure => Severity::Fatal,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
