//! Validation
//!
//! Converts candidate JSON into typed values and checks them against a
//! class's composed schema, reporting every violation in one pass.

mod checks;
mod engine;
mod value;
mod violation;

pub use checks::CompiledRules;
pub use engine::{validate_against, ValidationEngine, CANDIDATE_ROOT};
pub use value::{coerce, document_depth, json_kind, record_to_json, DecimalValue, TypedValue};
pub use violation::{ValidatedRecord, ValidationOutcome, Violation, ViolationKind};
