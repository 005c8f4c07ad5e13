//! Durable identifier mapping store

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MigrateResult;
use crate::library::models::EntityKind;

/// `(source type, source id)` mapping key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MappingKey {
    pub kind: EntityKind,
    pub source_id: i64,
}

impl MappingKey {
    pub fn new(kind: EntityKind, source_id: i64) -> Self {
        Self { kind, source_id }
    }
}

/// Authoritative mapping table, unique on `(source type, source id)`
///
/// Mappings are created once and never updated or deleted during a run.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Atomically insert `candidate` unless a mapping exists, then return the
    /// stored target id. Concurrent callers for one key all get the winner.
    async fn find_or_create(&self, key: MappingKey, candidate: Uuid) -> MigrateResult<Uuid>;

    /// Lookup without creating
    async fn find(&self, key: MappingKey) -> MigrateResult<Option<Uuid>>;

    async fn count(&self) -> MigrateResult<u64>;

    /// Delete every mapping; returns the number removed
    async fn clear(&self) -> MigrateResult<u64>;
}
