//! Write side of a chunked step
//!
//! Documents are upserted by target identifier: replaced when present,
//! inserted otherwise. One bulk call per chunk; order within a batch carries
//! no meaning.

use async_trait::async_trait;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::MigrateResult;

/// A target document with a mapping-assigned identifier
pub trait Document: Serialize + Send + Sync + 'static {
    const COLLECTION: &'static str;

    fn id(&self) -> Uuid;
}

/// Serialized document ready for the store
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRow {
    pub id: Uuid,
    pub body: serde_json::Value,
}

/// Outcome of one bulk upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: u64,
    pub replaced: u64,
}

impl UpsertSummary {
    pub fn total(&self) -> u64 {
        self.inserted + self.replaced
    }
}

/// Document collections keyed by target id
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Upsert every row into `collection` as one unordered bulk operation
    async fn bulk_upsert(&self, collection: &str, rows: Vec<DocumentRow>) -> MigrateResult<UpsertSummary>;

    /// Documents whose top-level `field` equals `value`, ordered by id
    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> MigrateResult<Vec<serde_json::Value>>;

    async fn get(&self, collection: &str, id: Uuid) -> MigrateResult<Option<serde_json::Value>>;

    async fn count(&self, collection: &str) -> MigrateResult<u64>;

    /// All document ids in `collection`, ascending
    async fn ids(&self, collection: &str) -> MigrateResult<Vec<Uuid>>;

    /// Remove a collection; returns the number of documents deleted
    async fn drop_collection(&self, collection: &str) -> MigrateResult<u64>;
}

/// Typed bulk writer for one document collection
pub struct BulkWriter<D> {
    store: Arc<dyn DocumentStore>,
    _document: PhantomData<fn(D)>,
}

impl<D> Clone for BulkWriter<D> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _document: PhantomData,
        }
    }
}

impl<D: Document> BulkWriter<D> {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            _document: PhantomData,
        }
    }

    pub fn collection(&self) -> &'static str {
        D::COLLECTION
    }

    /// Upsert a chunk. Rewriting the same batch converges to the same documents.
    pub async fn write(&self, batch: &[D]) -> MigrateResult<UpsertSummary> {
        if batch.is_empty() {
            return Ok(UpsertSummary::default());
        }

        let rows = batch
            .iter()
            .map(|doc| -> MigrateResult<DocumentRow> {
                Ok(DocumentRow {
                    id: doc.id(),
                    body: serde_json::to_value(doc)?,
                })
            })
            .collect::<MigrateResult<Vec<_>>>()?;

        let summary = self.store.bulk_upsert(D::COLLECTION, rows).await?;
        tracing::debug!(
            collection = D::COLLECTION,
            inserted = summary.inserted,
            replaced = summary.replaced,
            "Bulk upsert complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryDocumentStore;

    #[derive(Serialize)]
    struct Note {
        id: Uuid,
        text: String,
    }

    impl Document for Note {
        const COLLECTION: &'static str = "notes";

        fn id(&self) -> Uuid {
            self.id
        }
    }

    #[tokio::test]
    async fn test_rewrite_replaces_without_duplicates() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let writer: BulkWriter<Note> = BulkWriter::new(store.clone());
        let id = Uuid::new_v4();

        let first = writer
            .write(&[Note { id, text: "draft".into() }])
            .await
            .unwrap();
        assert_eq!(first, UpsertSummary { inserted: 1, replaced: 0 });

        let second = writer
            .write(&[Note { id, text: "final".into() }])
            .await
            .unwrap();
        assert_eq!(second, UpsertSummary { inserted: 0, replaced: 1 });

        assert_eq!(store.count("notes").await.unwrap(), 1);
        let doc = store.get("notes", id).await.unwrap().unwrap();
        assert_eq!(doc["text"], "final");
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let writer: BulkWriter<Note> = BulkWriter::new(store.clone());
        assert_eq!(writer.write(&[]).await.unwrap().total(), 0);
        assert_eq!(store.count("notes").await.unwrap(), 0);
    }
}
