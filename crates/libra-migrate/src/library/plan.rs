//! Job assembly
//!
//! Stage 1 runs authors and genres. Stage 2 runs books and comments, with
//! comments split into modulus partitions.

use std::sync::Arc;

use super::models::{
    AuthorDocument, AuthorRecord, BookDocument, BookRecord, CommentDocument, CommentRecord,
    EntityKind, GenreDocument, GenreRecord,
};
use super::transform::EntityTransformer;
use crate::config::MigrationConfig;
use crate::framework::coordinator::{MigrationJob, MigrationJobBuilder, Stage};
use crate::framework::partition::ModulusPartitioner;
use crate::framework::source::{SourceReader, SourceRecord};
use crate::framework::worker::{ChunkStep, Step, Transformer};
use crate::framework::writer::{BulkWriter, Document, DocumentStore};
use crate::idmap::IdMapper;

pub const JOB_NAME: &str = "rdbmsToDocumentJob";

/// A source able to read every library table
pub trait LibrarySource:
    SourceReader<AuthorRecord>
    + SourceReader<GenreRecord>
    + SourceReader<BookRecord>
    + SourceReader<CommentRecord>
{
}

impl<T> LibrarySource for T where
    T: SourceReader<AuthorRecord>
        + SourceReader<GenreRecord>
        + SourceReader<BookRecord>
        + SourceReader<CommentRecord>
{
}

fn step<R, D>(
    kind: EntityKind,
    reader: Arc<dyn SourceReader<R>>,
    transformer: &Arc<EntityTransformer>,
    documents: &Arc<dyn DocumentStore>,
    config: &MigrationConfig,
) -> Arc<dyn Step>
where
    R: SourceRecord,
    D: Document,
    EntityTransformer: Transformer<R, D>,
{
    let transformer: Arc<dyn Transformer<R, D>> = transformer.clone();
    Arc::new(ChunkStep::new(
        kind.collection(),
        reader,
        transformer,
        BulkWriter::<D>::new(Arc::clone(documents)),
        config.step_settings(kind),
    ))
}

/// Job builder with both stages in place; add a run repository before building if needed
pub fn job_builder<S>(
    source: Arc<S>,
    documents: Arc<dyn DocumentStore>,
    ids: Arc<IdMapper>,
    config: &MigrationConfig,
) -> MigrationJobBuilder
where
    S: LibrarySource + 'static,
{
    let transformer = Arc::new(EntityTransformer::new(ids));

    let authors: Arc<dyn SourceReader<AuthorRecord>> = source.clone();
    let genres: Arc<dyn SourceReader<GenreRecord>> = source.clone();
    let books: Arc<dyn SourceReader<BookRecord>> = source.clone();
    let comments: Arc<dyn SourceReader<CommentRecord>> = source;

    let stage_one = Stage::new("authors+genres")
        .step(step::<_, AuthorDocument>(EntityKind::Author, authors, &transformer, &documents, config))
        .step(step::<_, GenreDocument>(EntityKind::Genre, genres, &transformer, &documents, config));

    let stage_two = Stage::new("books+comments")
        .step(step::<_, BookDocument>(EntityKind::Book, books, &transformer, &documents, config))
        .partitioned_step(
            step::<_, CommentDocument>(EntityKind::Comment, comments, &transformer, &documents, config),
            ModulusPartitioner::new(config.partitions()),
        );

    MigrationJob::builder(JOB_NAME)
        .max_concurrency(config.pool.max_pool_size)
        .stage(stage_one)
        .stage(stage_two)
}

/// The complete library migration job
pub fn build_job<S>(
    source: Arc<S>,
    documents: Arc<dyn DocumentStore>,
    ids: Arc<IdMapper>,
    config: &MigrationConfig,
) -> MigrationJob
where
    S: LibrarySource + 'static,
{
    job_builder(source, documents, ids, config).build()
}
