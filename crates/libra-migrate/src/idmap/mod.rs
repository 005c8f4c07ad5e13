//! Identifier mapping service
//!
//! Translates `(source type, source id)` into stable target identifiers.
//! Resolution checks a per-type [`IdCache`], then performs one atomic
//! find-or-create against the [`MappingStore`] and caches the winning pair.
//! The store is the only authority: any cache can be cleared or resized
//! without changing results.

pub mod cache;
pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{MigrateError, MigrateResult};
use crate::library::models::EntityKind;

pub use cache::{CacheStats, IdCache};
pub use store::{MappingKey, MappingStore};

/// Default maximum cached entries per entity type
pub const DEFAULT_ID_CACHE_MAX: usize = 500_000;

/// Cache sizing per entity type. A size of zero disables caching for that type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdCacheConfig {
    pub maximum_size: usize,
    pub per_type: HashMap<EntityKind, usize>,
}

impl Default for IdCacheConfig {
    fn default() -> Self {
        Self {
            maximum_size: DEFAULT_ID_CACHE_MAX,
            per_type: HashMap::new(),
        }
    }
}

impl IdCacheConfig {
    pub fn size_for(&self, kind: EntityKind) -> usize {
        self.per_type.get(&kind).copied().unwrap_or(self.maximum_size)
    }

    /// Parse overrides such as `author=1000,book=0`
    pub fn parse_overrides(raw: &str) -> MigrateResult<HashMap<EntityKind, usize>> {
        let mut overrides = HashMap::new();
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (kind, size) = pair.split_once('=').ok_or_else(|| {
                MigrateError::Config(format!("Invalid id cache override '{}', expected type=size", pair))
            })?;
            let size = size.trim().parse::<usize>().map_err(|_| {
                MigrateError::Config(format!("Invalid id cache size in '{}'", pair))
            })?;
            overrides.insert(kind.parse::<EntityKind>()?, size);
        }
        Ok(overrides)
    }
}

/// Resolves source keys to target ids
pub struct IdMapper {
    store: Arc<dyn MappingStore>,
    caches: HashMap<EntityKind, IdCache>,
}

impl IdMapper {
    pub fn new(store: Arc<dyn MappingStore>, config: IdCacheConfig) -> Self {
        let caches = EntityKind::ALL
            .into_iter()
            .filter_map(|kind| {
                let size = config.size_for(kind);
                (size > 0).then(|| (kind, IdCache::new(size)))
            })
            .collect();
        Self { store, caches }
    }

    /// Target id for the key, creating the mapping on first resolution.
    ///
    /// Store failures propagate unchanged so transient ones can be retried.
    pub async fn resolve(&self, kind: EntityKind, source_id: i64) -> MigrateResult<Uuid> {
        let cache = self.caches.get(&kind);
        if let Some(target_id) = cache.and_then(|c| c.get(source_id)) {
            return Ok(target_id);
        }

        let key = MappingKey::new(kind, source_id);
        let target_id = self.store.find_or_create(key, Uuid::new_v4()).await?;
        debug!(kind = %kind, source_id, target_id = %target_id, "Resolved id mapping");

        if let Some(cache) = cache {
            cache.insert(source_id, target_id);
        }
        Ok(target_id)
    }

    /// Existing target id, never creating one
    pub async fn lookup(&self, kind: EntityKind, source_id: i64) -> MigrateResult<Option<Uuid>> {
        let cache = self.caches.get(&kind);
        if let Some(target_id) = cache.and_then(|c| c.get(source_id)) {
            return Ok(Some(target_id));
        }

        let found = self.store.find(MappingKey::new(kind, source_id)).await?;
        if let (Some(cache), Some(target_id)) = (cache, found) {
            cache.insert(source_id, target_id);
        }
        Ok(found)
    }

    /// Like [`lookup`](Self::lookup) but a missing mapping is an error
    pub async fn require(&self, kind: EntityKind, source_id: i64) -> MigrateResult<Uuid> {
        self.lookup(kind, source_id)
            .await?
            .ok_or_else(|| MigrateError::UnresolvedReference {
                kind: kind.to_string(),
                source_id,
            })
    }

    /// Drop a cached entry; the next resolve goes to the store
    pub fn evict(&self, kind: EntityKind, source_id: i64) -> bool {
        self.caches
            .get(&kind)
            .map(|c| c.evict(source_id))
            .unwrap_or(false)
    }

    /// `None` when caching is disabled for the type
    pub fn cache_stats(&self, kind: EntityKind) -> Option<CacheStats> {
        self.caches.get(&kind).map(IdCache::stats)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryMappingStore;

    fn mapper(config: IdCacheConfig) -> (Arc<InMemoryMappingStore>, IdMapper) {
        let store = Arc::new(InMemoryMappingStore::new());
        (store.clone(), IdMapper::new(store, config))
    }

    #[tokio::test]
    async fn test_resolve_is_stable() {
        let (store, ids) = mapper(IdCacheConfig::default());
        let first = ids.resolve(EntityKind::Author, 1).await.unwrap();
        let again = ids.resolve(EntityKind::Author, 1).await.unwrap();
        let other = ids.resolve(EntityKind::Genre, 1).await.unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(ids.cache_stats(EntityKind::Author).unwrap().hits, 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_still_resolves() {
        let config = IdCacheConfig {
            per_type: IdCacheConfig::parse_overrides("book=0").unwrap(),
            ..Default::default()
        };
        let (_, ids) = mapper(config);

        let first = ids.resolve(EntityKind::Book, 9).await.unwrap();
        assert_eq!(ids.resolve(EntityKind::Book, 9).await.unwrap(), first);
        assert!(ids.cache_stats(EntityKind::Book).is_none());
        assert!(!ids.evict(EntityKind::Book, 9));
    }

    #[tokio::test]
    async fn test_lookup_does_not_create() {
        let (store, ids) = mapper(IdCacheConfig::default());
        assert!(ids.lookup(EntityKind::Genre, 3).await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);

        let err = ids.require(EntityKind::Genre, 3).await.unwrap_err();
        assert!(matches!(err, MigrateError::UnresolvedReference { source_id: 3, .. }));

        let created = ids.resolve(EntityKind::Genre, 3).await.unwrap();
        assert_eq!(ids.require(EntityKind::Genre, 3).await.unwrap(), created);
    }

    #[test]
    fn test_parse_overrides() {
        let overrides = IdCacheConfig::parse_overrides("author=1000, book=0").unwrap();
        assert_eq!(overrides[&EntityKind::Author], 1000);
        assert_eq!(overrides[&EntityKind::Book], 0);
        assert!(IdCacheConfig::parse_overrides("author").is_err());
        assert!(IdCacheConfig::parse_overrides("author=lots").is_err());
        assert!(IdCacheConfig::parse_overrides("shelf=3").is_err());
    }
}
