//! Attribute catalog
//!
//! Reusable, typed attribute definitions, partitioned by tenant.

mod store;
mod types;

pub use store::{AttributeCatalog, AttributeReferences};
pub use types::{
    validate_name, AttributeDefinition, AttributeId, AttributePatch, EntityState, NewAttribute,
    MAX_NAME_LENGTH,
};
