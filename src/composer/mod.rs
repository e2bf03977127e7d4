//! Schema composition
//!
//! Merges a class's active assignments with their attribute definitions
//! into a hash-identified, cacheable schema.

mod cache;
mod compose;
mod schema;

pub use cache::{
    CacheStats, CachedSchema, InMemorySchemaCache, NoopSchemaCache, SchemaCache, SchemaCacheKey,
    VersionProbe,
};
pub use compose::SchemaComposer;
pub use schema::{content_hash, ComposedSchema, SchemaAttribute};
