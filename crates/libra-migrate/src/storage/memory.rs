//! In-memory stores
//!
//! Used by tests and dry runs. Semantics match the PostgreSQL stores:
//! keyset pages ordered by key, upsert by id, atomic insert-if-absent mappings.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::MigrateResult;
use crate::framework::runs::{RunRecord, RunRepository};
use crate::framework::source::{PageQuery, SourceReader, SourceRecord};
use crate::framework::types::{JobExecution, JobParameters};
use crate::framework::writer::{DocumentRow, DocumentStore, UpsertSummary};
use crate::idmap::store::{MappingKey, MappingStore};
use crate::library::models::{AuthorRecord, BookRecord, CommentRecord, GenreRecord};

fn page<R: SourceRecord + Clone>(records: &[R], query: &PageQuery) -> Vec<R> {
    records
        .iter()
        .filter(|r| query.admits(r.key()))
        .take(query.limit)
        .cloned()
        .collect()
}

fn sorted<R: SourceRecord>(mut records: Vec<R>) -> Vec<R> {
    records.sort_by_key(SourceRecord::key);
    records
}

/// Immutable in-memory library catalogue
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    authors: Vec<AuthorRecord>,
    genres: Vec<GenreRecord>,
    books: Vec<BookRecord>,
    comments: Vec<CommentRecord>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_authors(mut self, authors: Vec<AuthorRecord>) -> Self {
        self.authors = sorted(authors);
        self
    }

    pub fn with_genres(mut self, genres: Vec<GenreRecord>) -> Self {
        self.genres = sorted(genres);
        self
    }

    pub fn with_books(mut self, books: Vec<BookRecord>) -> Self {
        self.books = sorted(books);
        self
    }

    pub fn with_comments(mut self, comments: Vec<CommentRecord>) -> Self {
        self.comments = sorted(comments);
        self
    }
}

#[async_trait]
impl SourceReader<AuthorRecord> for InMemorySource {
    async fn read_page(&self, query: &PageQuery) -> MigrateResult<Vec<AuthorRecord>> {
        Ok(page(&self.authors, query))
    }
}

#[async_trait]
impl SourceReader<GenreRecord> for InMemorySource {
    async fn read_page(&self, query: &PageQuery) -> MigrateResult<Vec<GenreRecord>> {
        Ok(page(&self.genres, query))
    }
}

#[async_trait]
impl SourceReader<BookRecord> for InMemorySource {
    async fn read_page(&self, query: &PageQuery) -> MigrateResult<Vec<BookRecord>> {
        Ok(page(&self.books, query))
    }
}

#[async_trait]
impl SourceReader<CommentRecord> for InMemorySource {
    async fn read_page(&self, query: &PageQuery) -> MigrateResult<Vec<CommentRecord>> {
        Ok(page(&self.comments, query))
    }
}

/// Text form of a top-level JSON field, as `body ->> field` yields it
fn field_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Collections of JSON documents keyed by id
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<Uuid, serde_json::Value>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn bulk_upsert(&self, collection: &str, rows: Vec<DocumentRow>) -> MigrateResult<UpsertSummary> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();

        let mut summary = UpsertSummary::default();
        for row in rows {
            match docs.insert(row.id, row.body) {
                Some(_) => summary.replaced += 1,
                None => summary.inserted += 1,
            }
        }
        Ok(summary)
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> MigrateResult<Vec<serde_json::Value>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| {
                        doc.get(field).and_then(field_text).as_deref() == Some(value)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, collection: &str, id: Uuid) -> MigrateResult<Option<serde_json::Value>> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|docs| docs.get(&id).cloned()))
    }

    async fn count(&self, collection: &str) -> MigrateResult<u64> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).map_or(0, |docs| docs.len() as u64))
    }

    async fn ids(&self, collection: &str) -> MigrateResult<Vec<Uuid>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| docs.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn drop_collection(&self, collection: &str) -> MigrateResult<u64> {
        let mut collections = self.collections.write().await;
        Ok(collections.remove(collection).map_or(0, |docs| docs.len() as u64))
    }
}

/// Sharded mapping table; resolves for different keys do not contend
#[derive(Debug, Default)]
pub struct InMemoryMappingStore {
    mappings: DashMap<MappingKey, Uuid>,
}

impl InMemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MappingStore for InMemoryMappingStore {
    async fn find_or_create(&self, key: MappingKey, candidate: Uuid) -> MigrateResult<Uuid> {
        Ok(*self.mappings.entry(key).or_insert(candidate))
    }

    async fn find(&self, key: MappingKey) -> MigrateResult<Option<Uuid>> {
        Ok(self.mappings.get(&key).map(|entry| *entry))
    }

    async fn count(&self) -> MigrateResult<u64> {
        Ok(self.mappings.len() as u64)
    }

    async fn clear(&self) -> MigrateResult<u64> {
        let removed = self.mappings.len() as u64;
        self.mappings.clear();
        Ok(removed)
    }
}

/// Run history kept for the life of the process
#[derive(Debug, Default)]
pub struct InMemoryRunRepository {
    runs: Mutex<Vec<RunRecord>>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn finish(&self, execution: &JobExecution) -> MigrateResult<()> {
        let mut runs = self.runs.lock().await;
        match runs.iter_mut().find(|r| r.run_id == execution.run_id) {
            Some(record) => record.finish(execution),
            None => {
                let mut record =
                    RunRecord::started(execution.run_id, &execution.job_name, &execution.parameters);
                record.started_at = execution.started_at;
                record.finish(execution)?;
                runs.push(record);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn create_run(&self, run_id: Uuid, job_name: &str, parameters: &JobParameters) -> MigrateResult<()> {
        self.runs
            .lock()
            .await
            .push(RunRecord::started(run_id, job_name, parameters));
        Ok(())
    }

    async fn complete_run(&self, execution: &JobExecution) -> MigrateResult<()> {
        self.finish(execution).await
    }

    async fn fail_run(&self, execution: &JobExecution) -> MigrateResult<()> {
        self.finish(execution).await
    }

    async fn last_failed(&self, job_name: &str) -> MigrateResult<Option<RunRecord>> {
        let runs = self.runs.lock().await;
        Ok(runs
            .iter()
            .rev()
            .find(|r| r.job_name == job_name && r.is_failed())
            .cloned())
    }

    async fn recent(&self, job_name: &str, limit: usize) -> MigrateResult<Vec<RunRecord>> {
        let runs = self.runs.lock().await;
        Ok(runs
            .iter()
            .rev()
            .filter(|r| r.job_name == job_name)
            .take(limit)
            .cloned()
            .collect())
    }
}
