//! Schema cache
//!
//! An injected cache of composed schemas, keyed by (tenant, class).
//!
//! - Entries are immutable snapshots, replaced whole; readers never see a
//!   partial schema
//! - Every entry carries the version probe it was built at; the composer
//!   serves it only while the probe still matches
//! - `staleness_bound` documents how long another process may keep
//!   serving an entry after an invalidation (zero in-process)

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;

use super::schema::ComposedSchema;
use crate::assignment::ClassId;
use crate::catalog::AttributeId;
use crate::context::TenantId;
use crate::errors::{EngineError, EngineResult};

/// Cache key: one entry per class per tenant
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaCacheKey {
    pub tenant_id: TenantId,
    pub class_id: ClassId,
}

impl SchemaCacheKey {
    pub fn new(tenant_id: TenantId, class_id: ClassId) -> Self {
        Self { tenant_id, class_id }
    }
}

/// Versions observed while composing
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionProbe {
    /// Assignment index revision of the class
    pub class_revision: u64,
    /// Version of every attribute the schema touches
    pub attribute_versions: BTreeMap<AttributeId, u64>,
}

/// A cached schema with the probe it was built at
#[derive(Debug, Clone)]
pub struct CachedSchema {
    pub schema: Arc<ComposedSchema>,
    pub probe: VersionProbe,
}

/// Cache statistics, passive only
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped to make room
    pub evictions: u64,
    pub invalidations: u64,
    pub entries: usize,
}

/// Cache of composed schemas.
///
/// Errors are reserved for loss of the cache medium and are fatal.
pub trait SchemaCache: Send + Sync {
    fn get(&self, key: &SchemaCacheKey) -> EngineResult<Option<CachedSchema>>;

    fn set(&self, key: SchemaCacheKey, entry: CachedSchema) -> EngineResult<()>;

    /// Returns whether an entry was removed
    fn invalidate(&self, key: &SchemaCacheKey) -> EngineResult<bool>;

    /// Longest time a reader may observe an invalidated entry
    fn staleness_bound(&self) -> Duration;

    fn stats(&self) -> CacheStats;
}

/// Bounded in-process cache.
///
/// When full, the entry composed longest ago is evicted.
#[derive(Debug)]
pub struct InMemorySchemaCache {
    entries: RwLock<HashMap<SchemaCacheKey, CachedSchema>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl InMemorySchemaCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(max_entries.min(1024))),
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SchemaCache for InMemorySchemaCache {
    fn get(&self, key: &SchemaCacheKey) -> EngineResult<Option<CachedSchema>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| EngineError::lock_poisoned("schema cache"))?;
        let found = entries.get(key).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(found)
    }

    fn set(&self, key: SchemaCacheKey, entry: CachedSchema) -> EngineResult<()> {
        if self.max_entries == 0 {
            return Ok(());
        }
        let mut entries = self
            .entries
            .write()
            .map_err(|_| EngineError::lock_poisoned("schema cache"))?;
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, cached)| cached.schema.composed_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        entries.insert(key, entry);
        Ok(())
    }

    fn invalidate(&self, key: &SchemaCacheKey) -> EngineResult<bool> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| EngineError::lock_poisoned("schema cache"))?;
        let removed = entries.remove(key).is_some();
        if removed {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    fn staleness_bound(&self) -> Duration {
        Duration::ZERO
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

/// Cache that stores nothing; every compose recomputes
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSchemaCache;

impl SchemaCache for NoopSchemaCache {
    fn get(&self, _key: &SchemaCacheKey) -> EngineResult<Option<CachedSchema>> {
        Ok(None)
    }

    fn set(&self, _key: SchemaCacheKey, _entry: CachedSchema) -> EngineResult<()> {
        Ok(())
    }

    fn invalidate(&self, _key: &SchemaCacheKey) -> EngineResult<bool> {
        Ok(false)
    }

    fn staleness_bound(&self) -> Duration {
        Duration::ZERO
    }

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}
