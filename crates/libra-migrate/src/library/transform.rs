//! Source record to document mapping
//!
//! Own identifiers are resolved with find-or-create. Book parents (author,
//! genres) must already be mapped: a missing mapping fails the chunk instead
//! of minting an id nobody else will reference. A comment's book is resolved
//! with find-or-create since books and comments migrate side by side.

use async_trait::async_trait;
use std::sync::Arc;

use super::models::{
    AuthorDocument, AuthorRecord, BookDocument, BookRecord, CommentDocument, CommentRecord,
    EntityKind, GenreDocument, GenreRecord,
};
use crate::error::MigrateResult;
use crate::framework::worker::Transformer;
use crate::idmap::IdMapper;

/// Transformer for every library entity type
#[derive(Clone)]
pub struct EntityTransformer {
    ids: Arc<IdMapper>,
}

impl EntityTransformer {
    pub fn new(ids: Arc<IdMapper>) -> Self {
        Self { ids }
    }
}

#[async_trait]
impl Transformer<AuthorRecord, AuthorDocument> for EntityTransformer {
    async fn transform(&self, record: &AuthorRecord) -> MigrateResult<Option<AuthorDocument>> {
        Ok(Some(AuthorDocument {
            id: self.ids.resolve(EntityKind::Author, record.id).await?,
            full_name: record.full_name.clone(),
        }))
    }
}

#[async_trait]
impl Transformer<GenreRecord, GenreDocument> for EntityTransformer {
    async fn transform(&self, record: &GenreRecord) -> MigrateResult<Option<GenreDocument>> {
        Ok(Some(GenreDocument {
            id: self.ids.resolve(EntityKind::Genre, record.id).await?,
            name: record.name.clone(),
        }))
    }
}

#[async_trait]
impl Transformer<BookRecord, BookDocument> for EntityTransformer {
    async fn transform(&self, record: &BookRecord) -> MigrateResult<Option<BookDocument>> {
        let author = AuthorDocument {
            id: self.ids.require(EntityKind::Author, record.author.id).await?,
            full_name: record.author.full_name.clone(),
        };

        let mut genres = Vec::with_capacity(record.genres.len());
        for genre in &record.genres {
            genres.push(GenreDocument {
                id: self.ids.require(EntityKind::Genre, genre.id).await?,
                name: genre.name.clone(),
            });
        }

        Ok(Some(BookDocument {
            id: self.ids.resolve(EntityKind::Book, record.id).await?,
            title: record.title.clone(),
            author,
            genres,
        }))
    }
}

#[async_trait]
impl Transformer<CommentRecord, CommentDocument> for EntityTransformer {
    async fn transform(&self, record: &CommentRecord) -> MigrateResult<Option<CommentDocument>> {
        Ok(Some(CommentDocument {
            id: self.ids.resolve(EntityKind::Comment, record.id).await?,
            text: record.text.clone(),
            book_id: self.ids.resolve(EntityKind::Book, record.book_id).await?,
            created_at: record.created_at,
        }))
    }
}
