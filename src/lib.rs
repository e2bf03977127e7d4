//! formwork - multi-tenant schema composition and validation
//!
//! Reusable typed attributes are bound to classes through assignments.
//! The engine composes the effective schema of a class, validates
//! candidate data against it, and classifies proposed schema changes
//! against persisted instances before they are applied.
//!
//! Subsystems:
//! - `catalog`: attribute definitions
//! - `assignment`: attribute-to-class bindings
//! - `rules`: rule sets, merging and diffing
//! - `composer`: composed schemas and their cache
//! - `validation`: candidate validation and typed output
//! - `evolution`: impact analysis and the evolution log
//! - `guard`: optimistic concurrency and cache invalidation
//! - `service`: the write path tying them together

pub mod assignment;
pub mod catalog;
pub mod cli;
pub mod composer;
pub mod config;
pub mod context;
pub mod errors;
pub mod evolution;
pub mod external;
pub mod guard;
pub mod observability;
pub mod rules;
pub mod service;
pub mod validation;

pub use context::{TenantContext, TenantId};
pub use errors::{EngineError, EngineResult, ErrorCategory};
pub use service::{ChangeOutcome, SchemaEntity, SchemaService};
