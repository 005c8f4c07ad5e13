//! The library catalogue migration
//!
//! Authors and genres migrate first. Books (embedding their author and
//! genres) and comments (referencing their book) follow once both are done.

pub mod models;
pub mod plan;
pub mod transform;

pub use models::{
    AuthorDocument, AuthorRecord, BookDocument, BookRecord, CommentDocument, CommentRecord,
    EntityKind, GenreDocument, GenreRecord,
};
pub use plan::{build_job, job_builder, LibrarySource, JOB_NAME};
pub use transform::EntityTransformer;
