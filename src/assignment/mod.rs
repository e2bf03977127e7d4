//! Assignment index
//!
//! Bindings of attributes to classes, with per-class requirements,
//! ordering, defaults and rule overrides.

mod index;
mod types;

pub use index::AssignmentIndex;
pub use types::{AssignmentId, AssignmentPatch, AssignmentRecord, ClassId, NewAssignment};
pub(crate) use types::normalize_default;
