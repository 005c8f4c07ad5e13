//! Shared fixtures for libra-migrate integration tests
//!
//! - The reference catalogue (3 authors, 6 genres, 3 books, 3 comments)
//! - A harness wiring in-memory stores into the library job
//! - Store wrappers that fail on demand

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use libra_migrate::config::MigrationConfig;
use libra_migrate::framework::{
    DocumentRow, DocumentStore, JobExecution, JobParameters, UpsertSummary,
};
use libra_migrate::idmap::{IdCacheConfig, IdMapper, MappingKey, MappingStore};
use libra_migrate::library::{
    build_job, AuthorRecord, BookRecord, CommentRecord, GenreRecord,
};
use libra_migrate::storage::memory::{InMemoryDocumentStore, InMemoryMappingStore, InMemorySource};
use libra_migrate::{MigrateError, MigrateResult};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

/// Initialize tracing for tests
pub fn init_tracing() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,libra_migrate=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn author(id: i64, full_name: &str) -> AuthorRecord {
    AuthorRecord {
        id,
        full_name: full_name.to_string(),
    }
}

pub fn genre(id: i64, name: &str) -> GenreRecord {
    GenreRecord {
        id,
        name: name.to_string(),
    }
}

pub fn comment(id: i64, book_id: i64, text: &str) -> CommentRecord {
    CommentRecord {
        id,
        text: text.to_string(),
        book_id,
        created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single().unwrap_or_else(Utc::now)
            + chrono::Duration::minutes(id),
    }
}

/// 3 authors, 6 genres (2 per book), 3 books, 2 comments on book 1 and 1 on book 2
pub fn library_catalogue() -> InMemorySource {
    let authors = vec![
        author(1, "Leo Tolstoy"),
        author(2, "Mary Shelley"),
        author(3, "Isaac Asimov"),
    ];
    let genres = vec![
        genre(1, "Historical Novel"),
        genre(2, "Philosophy"),
        genre(3, "Gothic"),
        genre(4, "Horror"),
        genre(5, "Science Fiction"),
        genre(6, "Mystery"),
    ];
    let books = vec![
        BookRecord {
            id: 1,
            title: "War and Peace".into(),
            author: authors[0].clone(),
            genres: vec![genres[0].clone(), genres[1].clone()],
        },
        BookRecord {
            id: 2,
            title: "Frankenstein".into(),
            author: authors[1].clone(),
            genres: vec![genres[2].clone(), genres[3].clone()],
        },
        BookRecord {
            id: 3,
            title: "The Caves of Steel".into(),
            author: authors[2].clone(),
            genres: vec![genres[4].clone(), genres[5].clone()],
        },
    ];
    let comments = vec![
        comment(1, 1, "Long but worth it"),
        comment(2, 1, "The battle chapters drag"),
        comment(3, 2, "Still unsettling"),
    ];

    InMemorySource::new()
        .with_authors(authors)
        .with_genres(genres)
        .with_books(books)
        .with_comments(comments)
}

/// `authors` authors with one book each and `comments_per_book` comments per book
pub fn generated_catalogue(authors: i64, comments_per_book: i64) -> InMemorySource {
    let genres = vec![genre(1, "Essay"), genre(2, "Poetry")];
    let author_rows: Vec<_> = (1..=authors).map(|id| author(id, &format!("Author {}", id))).collect();
    let books: Vec<_> = author_rows
        .iter()
        .map(|a| BookRecord {
            id: a.id,
            title: format!("Book {}", a.id),
            author: a.clone(),
            genres: genres.clone(),
        })
        .collect();
    let comments: Vec<_> = (1..=authors * comments_per_book)
        .map(|id| comment(id, (id - 1) / comments_per_book + 1, &format!("Comment {}", id)))
        .collect();

    InMemorySource::new()
        .with_authors(author_rows)
        .with_genres(genres)
        .with_books(books)
        .with_comments(comments)
}

/// Small chunks and no real backoff so every path is exercised quickly
pub fn test_config() -> MigrationConfig {
    let mut config = MigrationConfig::default();
    config.chunk_sizes.authors = 2;
    config.chunk_sizes.genres = 4;
    config.chunk_sizes.books = 2;
    config.chunk_sizes.comments = 2;
    config.progress_strides.authors = 2;
    config.progress_strides.comments = 2;
    config.pool.core_pool_size = 3;
    config.pool.max_pool_size = 4;
    config.retry.backoff_ms = 1;
    config
}

/// In-memory stores wired into the library job
pub struct Harness {
    pub source: Arc<InMemorySource>,
    pub documents: Arc<dyn DocumentStore>,
    pub mappings: Arc<InMemoryMappingStore>,
    pub config: MigrationConfig,
}

impl Harness {
    pub fn new(source: InMemorySource) -> Self {
        Self::with_documents(source, Arc::new(InMemoryDocumentStore::new()))
    }

    pub fn with_documents(source: InMemorySource, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            source: Arc::new(source),
            documents,
            mappings: Arc::new(InMemoryMappingStore::new()),
            config: test_config(),
        }
    }

    /// Fresh mapper (and caches) over the shared mapping store
    pub fn id_mapper(&self) -> Arc<IdMapper> {
        Arc::new(IdMapper::new(self.mappings.clone(), self.config.id_cache.clone()))
    }

    pub async fn run(&self) -> JobExecution {
        let job = build_job(
            self.source.clone(),
            self.documents.clone(),
            self.id_mapper(),
            &self.config,
        );
        job.run(JobParameters::started_now())
            .await
            .unwrap_or_else(|e| panic!("job could not start: {}", e))
    }

    pub async fn count(&self, collection: &str) -> u64 {
        self.documents
            .count(collection)
            .await
            .unwrap_or_else(|e| panic!("count {}: {}", collection, e))
    }

    pub async fn mappings_count(&self) -> u64 {
        self.mappings
            .count()
            .await
            .unwrap_or_else(|e| panic!("mapping count: {}", e))
    }

    pub async fn ids(&self, collection: &str) -> Vec<Uuid> {
        self.documents
            .ids(collection)
            .await
            .unwrap_or_else(|e| panic!("ids {}: {}", collection, e))
    }
}

/// Document store that fails the first `failures` writes to one collection
pub struct FlakyDocumentStore {
    pub inner: Arc<InMemoryDocumentStore>,
    collection: String,
    failures: AtomicU32,
    permanent: bool,
    pub attempts: AtomicU32,
}

impl FlakyDocumentStore {
    /// Transient failures that a retry can absorb
    pub fn transient(collection: &str, failures: u32) -> Self {
        Self::build(collection, failures, false)
    }

    /// Failures no retry can absorb
    pub fn permanent(collection: &str, failures: u32) -> Self {
        Self::build(collection, failures, true)
    }

    fn build(collection: &str, failures: u32, permanent: bool) -> Self {
        Self {
            inner: Arc::new(InMemoryDocumentStore::new()),
            collection: collection.to_string(),
            failures: AtomicU32::new(failures),
            permanent,
            attempts: AtomicU32::new(0),
        }
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DocumentStore for FlakyDocumentStore {
    async fn bulk_upsert(&self, collection: &str, rows: Vec<DocumentRow>) -> MigrateResult<UpsertSummary> {
        if collection == self.collection {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.take_failure() {
                return Err(if self.permanent {
                    MigrateError::Database(sqlx::Error::Protocol("document rejected".into()))
                } else {
                    MigrateError::StoreUnavailable("connection reset by peer".into())
                });
            }
        }
        self.inner.bulk_upsert(collection, rows).await
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> MigrateResult<Vec<serde_json::Value>> {
        self.inner.find_by_field(collection, field, value).await
    }

    async fn get(&self, collection: &str, id: Uuid) -> MigrateResult<Option<serde_json::Value>> {
        self.inner.get(collection, id).await
    }

    async fn count(&self, collection: &str) -> MigrateResult<u64> {
        self.inner.count(collection).await
    }

    async fn ids(&self, collection: &str) -> MigrateResult<Vec<Uuid>> {
        self.inner.ids(collection).await
    }

    async fn drop_collection(&self, collection: &str) -> MigrateResult<u64> {
        self.inner.drop_collection(collection).await
    }
}

/// Mapping store whose `find_or_create` fails `failures` times, then delegates
pub struct FlakyMappingStore {
    pub inner: InMemoryMappingStore,
    failures: AtomicU32,
}

impl FlakyMappingStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: InMemoryMappingStore::new(),
            failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl MappingStore for FlakyMappingStore {
    async fn find_or_create(&self, key: MappingKey, candidate: Uuid) -> MigrateResult<Uuid> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(MigrateError::StoreUnavailable("mapping store timed out".into()));
        }
        self.inner.find_or_create(key, candidate).await
    }

    async fn find(&self, key: MappingKey) -> MigrateResult<Option<Uuid>> {
        self.inner.find(key).await
    }

    async fn count(&self) -> MigrateResult<u64> {
        self.inner.count().await
    }

    async fn clear(&self) -> MigrateResult<u64> {
        self.inner.clear().await
    }
}

/// Mapper with caching disabled for every type
pub fn uncached(store: Arc<dyn MappingStore>) -> IdMapper {
    let per_type = IdCacheConfig::parse_overrides("author=0,genre=0,book=0,comment=0")
        .unwrap_or_else(|e| panic!("{}", e));
    IdMapper::new(
        store,
        IdCacheConfig {
            per_type,
            ..Default::default()
        },
    )
}
