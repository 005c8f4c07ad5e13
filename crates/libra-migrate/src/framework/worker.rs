//! Chunked extract-transform-load step
//!
//! A step reads keyset pages of at most `chunk_size` records, transforms them
//! in cursor order and upserts the resulting documents as one chunk. The
//! cursor advances only after a chunk commits, so a failed chunk is retried
//! from the same records.

use async_trait::async_trait;
use std::sync::Arc;

use super::listener::{self, ProgressListener};
use super::partition::Partition;
use super::retry::RetryPolicy;
use super::source::{PageQuery, SourceReader, SourceRecord};
use super::types::{StepCounters, StepExecution};
use super::writer::{BulkWriter, Document};
use crate::error::{MigrateError, MigrateResult};

/// Default records per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default progress stride in records
pub const DEFAULT_PROGRESS_STRIDE: u64 = 5_000;

/// Maps one source record to its document
///
/// `Ok(None)` filters the record out.
#[async_trait]
pub trait Transformer<R, D>: Send + Sync {
    async fn transform(&self, record: &R) -> MigrateResult<Option<D>>;
}

/// A runnable unit of a stage, optionally restricted to one partition
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Run to completion. Failures are reported in the returned execution.
    async fn execute(&self, partition: Option<(String, Partition)>) -> StepExecution;
}

/// Tuning for a single step
#[derive(Debug, Clone, Copy)]
pub struct StepSettings {
    pub chunk_size: usize,
    pub progress_stride: u64,
    pub retry: RetryPolicy,
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_stride: DEFAULT_PROGRESS_STRIDE,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Default)]
struct ChunkOutcome {
    written: u64,
    filtered: u64,
}

/// Reader, transformer and writer wired into one step
pub struct ChunkStep<R, D> {
    name: String,
    reader: Arc<dyn SourceReader<R>>,
    transformer: Arc<dyn Transformer<R, D>>,
    writer: BulkWriter<D>,
    settings: StepSettings,
}

impl<R: SourceRecord, D: Document> ChunkStep<R, D> {
    pub fn new(
        name: impl Into<String>,
        reader: Arc<dyn SourceReader<R>>,
        transformer: Arc<dyn Transformer<R, D>>,
        writer: BulkWriter<D>,
        settings: StepSettings,
    ) -> Self {
        Self {
            name: name.into(),
            reader,
            transformer,
            writer,
            settings,
        }
    }

    fn failure(&self, err: MigrateError) -> String {
        MigrateError::StepFailed {
            step: self.name.clone(),
            reason: err.to_string(),
        }
        .to_string()
    }

    async fn read_page(&self, query: &PageQuery, counters: &mut StepCounters) -> MigrateResult<Vec<R>> {
        let retry = self.settings.retry;
        retry
            .run(
                |_| self.reader.read_page(query),
                |attempt, err, will_retry| {
                    if will_retry {
                        counters.retries += 1;
                        listener::chunk_retry(&self.name, attempt, retry.max_attempts, err);
                    }
                },
            )
            .await
    }

    async fn process_chunk(&self, records: &[R]) -> MigrateResult<ChunkOutcome> {
        let mut outcome = ChunkOutcome::default();
        let mut documents = Vec::with_capacity(records.len());

        for record in records {
            match self.transformer.transform(record).await? {
                Some(doc) => documents.push(doc),
                None => outcome.filtered += 1,
            }
        }

        self.writer.write(&documents).await?;
        outcome.written = documents.len() as u64;
        Ok(outcome)
    }

    async fn commit_chunk(&self, records: &[R], counters: &mut StepCounters) -> MigrateResult<ChunkOutcome> {
        let retry = self.settings.retry;
        retry
            .run(
                |_| self.process_chunk(records),
                |attempt, err, will_retry| {
                    counters.rollbacks += 1;
                    if will_retry {
                        counters.retries += 1;
                        listener::chunk_retry(&self.name, attempt, retry.max_attempts, err);
                    }
                },
            )
            .await
    }
}

#[async_trait]
impl<R: SourceRecord, D: Document> Step for ChunkStep<R, D> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, partition: Option<(String, Partition)>) -> StepExecution {
        let mut execution = StepExecution::start(&self.name, partition);
        listener::step_started(&self.name, &execution);

        let mut progress = ProgressListener::new(&self.name, self.settings.progress_stride);
        let chunk_size = self.settings.chunk_size.max(1);
        let mut query = PageQuery::first(chunk_size, execution.partition);

        loop {
            let records = match self.read_page(&query, &mut execution.counters).await {
                Ok(records) => records,
                Err(err) => {
                    progress.on_chunk_error(&execution.counters, &err);
                    execution.fail(self.failure(err));
                    break;
                }
            };

            let Some(last_key) = records.last().map(SourceRecord::key) else {
                break;
            };
            execution.counters.read += records.len() as u64;

            match self.commit_chunk(&records, &mut execution.counters).await {
                Ok(outcome) => {
                    execution.counters.written += outcome.written;
                    execution.counters.filtered += outcome.filtered;
                    execution.counters.commits += 1;
                    query = query.after(last_key);
                    progress.after_chunk(&execution.counters);
                }
                Err(err) => {
                    progress.on_chunk_error(&execution.counters, &err);
                    execution.fail(self.failure(err));
                    break;
                }
            }

            if records.len() < chunk_size {
                break;
            }
        }

        let execution = execution.finish();
        listener::step_finished(&self.name, &execution);
        execution
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::framework::types::StepStatus;
    use crate::framework::writer::DocumentStore;
    use crate::storage::memory::InMemoryDocumentStore;
    use serde::Serialize;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Debug, Clone)]
    struct Row(i64);

    impl SourceRecord for Row {
        fn key(&self) -> i64 {
            self.0
        }
    }

    struct Rows(Vec<Row>);

    #[async_trait]
    impl SourceReader<Row> for Rows {
        async fn read_page(&self, query: &PageQuery) -> MigrateResult<Vec<Row>> {
            Ok(self
                .0
                .iter()
                .filter(|r| query.admits(r.0))
                .take(query.limit)
                .cloned()
                .collect())
        }
    }

    #[derive(Serialize)]
    struct RowDoc {
        id: Uuid,
        key: i64,
    }

    impl Document for RowDoc {
        const COLLECTION: &'static str = "rows";

        fn id(&self) -> Uuid {
            self.id
        }
    }

    /// Drops odd keys; fails the first `failures` calls on key 4
    struct OddFilter {
        failures: AtomicU32,
        permanent: bool,
    }

    #[async_trait]
    impl Transformer<Row, RowDoc> for OddFilter {
        async fn transform(&self, record: &Row) -> MigrateResult<Option<RowDoc>> {
            if record.0 == 4 && self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(if self.permanent {
                    MigrateError::UnresolvedReference {
                        kind: "row".into(),
                        source_id: 4,
                    }
                } else {
                    MigrateError::StoreUnavailable("blip".into())
                });
            }
            if record.0 % 2 == 1 {
                return Ok(None);
            }
            Ok(Some(RowDoc {
                id: Uuid::from_u128(record.0 as u128),
                key: record.0,
            }))
        }
    }

    fn step(
        store: Arc<InMemoryDocumentStore>,
        failures: u32,
        permanent: bool,
        max_attempts: u32,
    ) -> ChunkStep<Row, RowDoc> {
        ChunkStep::new(
            "rows",
            Arc::new(Rows((1..=10).map(Row).collect())),
            Arc::new(OddFilter {
                failures: AtomicU32::new(failures),
                permanent,
            }),
            BulkWriter::new(store),
            StepSettings {
                chunk_size: 3,
                progress_stride: 5,
                retry: RetryPolicy::new(max_attempts, Duration::from_millis(1)),
            },
        )
    }

    #[tokio::test]
    async fn test_chunks_cover_all_records() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let exec = step(store.clone(), 0, false, 3).execute(None).await;

        assert_eq!(exec.status, StepStatus::Completed);
        assert_eq!(exec.counters.read, 10);
        assert_eq!(exec.counters.written, 5);
        assert_eq!(exec.counters.filtered, 5);
        // pages 1-3, 4-6, 7-9, 10
        assert_eq!(exec.counters.commits, 4);
        assert_eq!(store.count("rows").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_transient_chunk_failure_is_retried() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let exec = step(store.clone(), 1, false, 3).execute(None).await;

        assert_eq!(exec.status, StepStatus::Completed);
        assert_eq!(exec.counters.read, 10);
        assert_eq!(exec.counters.written, 5);
        assert_eq!(exec.counters.rollbacks, 1);
        assert_eq!(exec.counters.retries, 1);
        assert_eq!(store.count("rows").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_permanent_failure_stops_at_chunk() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let exec = step(store.clone(), 1, true, 3).execute(None).await;

        assert_eq!(exec.status, StepStatus::Failed);
        let failure = exec.failure.unwrap();
        assert!(failure.starts_with("Step 'rows' failed"));
        assert!(failure.contains("Unresolved row reference"));
        assert_eq!(exec.counters.commits, 1);
        assert_eq!(exec.counters.rollbacks, 1);
        assert_eq!(exec.counters.retries, 0);
        // only the first chunk (key 2) was written
        assert_eq!(store.count("rows").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let exec = step(store, 5, false, 2).execute(None).await;

        assert_eq!(exec.status, StepStatus::Failed);
        assert_eq!(exec.counters.rollbacks, 2);
        assert_eq!(exec.counters.retries, 1);
    }

    #[tokio::test]
    async fn test_partition_reads_only_its_keys() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let exec = step(store.clone(), 0, false, 1)
            .execute(Some(("p0".into(), Partition::new(2, 0))))
            .await;

        assert_eq!(exec.partition_label.as_deref(), Some("p0"));
        assert_eq!(exec.counters.read, 5);
        assert_eq!(exec.counters.filtered, 0);
        assert_eq!(store.count("rows").await.unwrap(), 5);
    }
}
