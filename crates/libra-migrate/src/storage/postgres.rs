//! PostgreSQL stores
//!
//! The relational catalogue is read with keyset pagination. Documents live in
//! one `documents` table keyed by `(collection, id)` with a JSONB body.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::{MigrateError, MigrateResult};
use crate::framework::runs::{RunRecord, RunRepository, STATUS_STARTED};
use crate::framework::source::{PageQuery, SourceReader};
use crate::framework::types::{JobExecution, JobParameters};
use crate::framework::writer::{Document, DocumentRow, DocumentStore, UpsertSummary};
use crate::idmap::store::{MappingKey, MappingStore};
use crate::library::models::{AuthorRecord, BookRecord, CommentDocument, CommentRecord, GenreRecord};

/// Matches the expression and predicate of `idx_documents_comments_book_id`
const COMMENTS_BY_BOOK_SQL: &str = r#"
    SELECT body
    FROM documents
    WHERE collection = 'comments' AND body ->> 'book_id' = $1
    ORDER BY id
"#;

const DOCUMENTS_BY_FIELD_SQL: &str = r#"
    SELECT body
    FROM documents
    WHERE collection = $1 AND body ->> $2 = $3
    ORDER BY id
"#;

fn is_comments_by_book(collection: &str, field: &str) -> bool {
    collection == CommentDocument::COLLECTION && field == "book_id"
}

/// Open a connection pool for `url`
pub async fn create_pool(url: &str, config: &DatabaseConfig) -> MigrateResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        "Database connection pool created"
    );
    Ok(pool)
}

/// Apply the target schema (documents, id_mappings, migration_runs)
pub async fn run_target_migrations(pool: &PgPool) -> MigrateResult<()> {
    let mut migrator = sqlx::migrate!("../../migrations/target");
    migrator.set_ignore_missing(true);
    migrator
        .run(pool)
        .await
        .map_err(|e| MigrateError::Database(e.into()))
}

/// Partition filter binds: `(modulus, remainder)`, both unused when unpartitioned
fn partition_binds(query: &PageQuery) -> (Option<i64>, i64) {
    match query.partition {
        Some(p) => (Some(i64::from(p.modulus.max(1))), i64::from(p.remainder)),
        None => (None, 0),
    }
}

fn limit(query: &PageQuery) -> i64 {
    i64::try_from(query.limit).unwrap_or(i64::MAX)
}

// ============================================================================
// Source
// ============================================================================

/// Read-only access to the relational catalogue
#[derive(Clone)]
pub struct PgSource {
    pool: PgPool,
}

impl PgSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BookRow {
    id: i64,
    title: String,
    author_id: i64,
    author_full_name: String,
}

#[derive(sqlx::FromRow)]
struct BookGenreRow {
    book_id: i64,
    id: i64,
    name: String,
}

#[async_trait]
impl SourceReader<AuthorRecord> for PgSource {
    async fn read_page(&self, query: &PageQuery) -> MigrateResult<Vec<AuthorRecord>> {
        let (modulus, remainder) = partition_binds(query);
        let rows = sqlx::query_as::<_, AuthorRecord>(
            r#"
            SELECT id, full_name
            FROM authors
            WHERE ($1::BIGINT IS NULL OR id > $1)
              AND ($2::BIGINT IS NULL OR ((id % $2) + $2) % $2 = $3)
            ORDER BY id
            LIMIT $4
            "#,
        )
        .bind(query.after)
        .bind(modulus)
        .bind(remainder)
        .bind(limit(query))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl SourceReader<GenreRecord> for PgSource {
    async fn read_page(&self, query: &PageQuery) -> MigrateResult<Vec<GenreRecord>> {
        let (modulus, remainder) = partition_binds(query);
        let rows = sqlx::query_as::<_, GenreRecord>(
            r#"
            SELECT id, name
            FROM genres
            WHERE ($1::BIGINT IS NULL OR id > $1)
              AND ($2::BIGINT IS NULL OR ((id % $2) + $2) % $2 = $3)
            ORDER BY id
            LIMIT $4
            "#,
        )
        .bind(query.after)
        .bind(modulus)
        .bind(remainder)
        .bind(limit(query))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl SourceReader<BookRecord> for PgSource {
    async fn read_page(&self, query: &PageQuery) -> MigrateResult<Vec<BookRecord>> {
        let (modulus, remainder) = partition_binds(query);
        let books = sqlx::query_as::<_, BookRow>(
            r#"
            SELECT b.id, b.title, a.id AS author_id, a.full_name AS author_full_name
            FROM books b
            JOIN authors a ON a.id = b.author_id
            WHERE ($1::BIGINT IS NULL OR b.id > $1)
              AND ($2::BIGINT IS NULL OR ((b.id % $2) + $2) % $2 = $3)
            ORDER BY b.id
            LIMIT $4
            "#,
        )
        .bind(query.after)
        .bind(modulus)
        .bind(remainder)
        .bind(limit(query))
        .fetch_all(&self.pool)
        .await?;

        if books.is_empty() {
            return Ok(Vec::new());
        }

        let book_ids: Vec<i64> = books.iter().map(|b| b.id).collect();
        let genre_rows = sqlx::query_as::<_, BookGenreRow>(
            r#"
            SELECT bg.book_id, g.id, g.name
            FROM books_genres bg
            JOIN genres g ON g.id = bg.genre_id
            WHERE bg.book_id = ANY($1)
            ORDER BY bg.book_id, g.id
            "#,
        )
        .bind(&book_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut genres: HashMap<i64, Vec<GenreRecord>> = HashMap::new();
        for row in genre_rows {
            genres.entry(row.book_id).or_default().push(GenreRecord {
                id: row.id,
                name: row.name,
            });
        }

        Ok(books
            .into_iter()
            .map(|b| BookRecord {
                genres: genres.remove(&b.id).unwrap_or_default(),
                id: b.id,
                title: b.title,
                author: AuthorRecord {
                    id: b.author_id,
                    full_name: b.author_full_name,
                },
            })
            .collect())
    }
}

#[async_trait]
impl SourceReader<CommentRecord> for PgSource {
    async fn read_page(&self, query: &PageQuery) -> MigrateResult<Vec<CommentRecord>> {
        let (modulus, remainder) = partition_binds(query);
        let rows = sqlx::query_as::<_, CommentRecord>(
            r#"
            SELECT id, text, book_id, created_at
            FROM comments
            WHERE ($1::BIGINT IS NULL OR id > $1)
              AND ($2::BIGINT IS NULL OR ((id % $2) + $2) % $2 = $3)
            ORDER BY id
            LIMIT $4
            "#,
        )
        .bind(query.after)
        .bind(modulus)
        .bind(remainder)
        .bind(limit(query))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

// ============================================================================
// Documents
// ============================================================================

/// JSONB document collections
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn bulk_upsert(&self, collection: &str, rows: Vec<DocumentRow>) -> MigrateResult<UpsertSummary> {
        if rows.is_empty() {
            return Ok(UpsertSummary::default());
        }

        let (ids, bodies): (Vec<Uuid>, Vec<serde_json::Value>) =
            rows.into_iter().map(|r| (r.id, r.body)).unzip();

        // xmax = 0 only for freshly inserted tuples
        let inserted_flags = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO documents (collection, id, body)
            SELECT $1, u.id, u.body
            FROM UNNEST($2::UUID[], $3::JSONB[]) AS u(id, body)
            ON CONFLICT (collection, id)
            DO UPDATE SET body = EXCLUDED.body, updated_at = NOW()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(collection)
        .bind(&ids)
        .bind(&bodies)
        .fetch_all(&self.pool)
        .await?;

        let inserted = inserted_flags.iter().filter(|&&f| f).count() as u64;
        Ok(UpsertSummary {
            inserted,
            replaced: inserted_flags.len() as u64 - inserted,
        })
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> MigrateResult<Vec<serde_json::Value>> {
        let query = if is_comments_by_book(collection, field) {
            sqlx::query_scalar::<_, serde_json::Value>(COMMENTS_BY_BOOK_SQL).bind(value)
        } else {
            sqlx::query_scalar::<_, serde_json::Value>(DOCUMENTS_BY_FIELD_SQL)
                .bind(collection)
                .bind(field)
                .bind(value)
        };
        Ok(query.fetch_all(&self.pool).await?)
    }

    async fn get(&self, collection: &str, id: Uuid) -> MigrateResult<Option<serde_json::Value>> {
        let doc = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT body FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(doc)
    }

    async fn count(&self, collection: &str) -> MigrateResult<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM documents WHERE collection = $1")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn ids(&self, collection: &str) -> MigrateResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>("SELECT id FROM documents WHERE collection = $1 ORDER BY id")
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn drop_collection(&self, collection: &str) -> MigrateResult<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1")
            .bind(collection)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ============================================================================
// Id mappings
// ============================================================================

/// `id_mappings` table
#[derive(Clone)]
pub struct PgMappingStore {
    pool: PgPool,
}

impl PgMappingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MappingStore for PgMappingStore {
    async fn find_or_create(&self, key: MappingKey, candidate: Uuid) -> MigrateResult<Uuid> {
        // The no-op update makes RETURNING yield the existing row on conflict
        let target_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO id_mappings (source_type, source_id, target_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (source_type, source_id)
            DO UPDATE SET source_type = EXCLUDED.source_type
            RETURNING target_id
            "#,
        )
        .bind(key.kind.as_str())
        .bind(key.source_id)
        .bind(candidate)
        .fetch_one(&self.pool)
        .await?;
        Ok(target_id)
    }

    async fn find(&self, key: MappingKey) -> MigrateResult<Option<Uuid>> {
        let target_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT target_id FROM id_mappings WHERE source_type = $1 AND source_id = $2",
        )
        .bind(key.kind.as_str())
        .bind(key.source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(target_id)
    }

    async fn count(&self) -> MigrateResult<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM id_mappings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn clear(&self) -> MigrateResult<u64> {
        let result = sqlx::query("DELETE FROM id_mappings")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ============================================================================
// Run history
// ============================================================================

/// `migration_runs` table
#[derive(Clone)]
pub struct PgRunRepository {
    pool: PgPool,
}

impl PgRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn finish(&self, execution: &JobExecution) -> MigrateResult<()> {
        let summary = serde_json::to_value(execution)?;
        sqlx::query(
            r#"
            UPDATE migration_runs
            SET status = $2, exit_code = $3, summary = $4, ended_at = $5
            WHERE run_id = $1
            "#,
        )
        .bind(execution.run_id)
        .bind(execution.status.as_str())
        .bind(&execution.exit_code)
        .bind(summary)
        .bind(execution.ended_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    run_id: Uuid,
    job_name: String,
    parameters: Json<JobParameters>,
    status: String,
    exit_code: Option<String>,
    summary: Option<serde_json::Value>,
    started_at: chrono::DateTime<chrono::Utc>,
    ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<RunRow> for RunRecord {
    fn from(row: RunRow) -> Self {
        Self {
            run_id: row.run_id,
            job_name: row.job_name,
            parameters: row.parameters.0,
            status: row.status,
            exit_code: row.exit_code,
            summary: row.summary,
            started_at: row.started_at,
            ended_at: row.ended_at,
        }
    }
}

#[async_trait]
impl RunRepository for PgRunRepository {
    async fn create_run(&self, run_id: Uuid, job_name: &str, parameters: &JobParameters) -> MigrateResult<()> {
        sqlx::query(
            r#"
            INSERT INTO migration_runs (run_id, job_name, parameters, status)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(run_id)
        .bind(job_name)
        .bind(Json(parameters))
        .bind(STATUS_STARTED)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_run(&self, execution: &JobExecution) -> MigrateResult<()> {
        self.finish(execution).await
    }

    async fn fail_run(&self, execution: &JobExecution) -> MigrateResult<()> {
        self.finish(execution).await
    }

    async fn last_failed(&self, job_name: &str) -> MigrateResult<Option<RunRecord>> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT run_id, job_name, parameters, status, exit_code, summary, started_at, ended_at
            FROM migration_runs
            WHERE job_name = $1 AND status = 'FAILED'
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(RunRecord::from))
    }

    async fn recent(&self, job_name: &str, limit: usize) -> MigrateResult<Vec<RunRecord>> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT run_id, job_name, parameters, status, exit_code, summary, started_at, ended_at
            FROM migration_runs
            WHERE job_name = $1
            ORDER BY started_at DESC
            LIMIT $2
            "#,
        )
        .bind(job_name)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RunRecord::from).collect())
    }
}
