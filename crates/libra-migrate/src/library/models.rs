//! Library catalogue records and their document counterparts
//!
//! Source records are immutable snapshots of relational rows keyed by the
//! relational `BIGINT` id. Documents carry only identifiers obtained from the
//! [`IdMapper`](crate::idmap::IdMapper).

use chrono::{DateTime, Utc};
use libra_common::LibraError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::MigrateError;
use crate::framework::source::SourceRecord;
use crate::framework::writer::Document;

/// The four migrated entity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Author,
    Genre,
    Book,
    Comment,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Author,
        EntityKind::Genre,
        EntityKind::Book,
        EntityKind::Comment,
    ];

    /// Mapping source type, e.g. `author`
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Author => "author",
            EntityKind::Genre => "genre",
            EntityKind::Book => "book",
            EntityKind::Comment => "comment",
        }
    }

    /// Target collection name, e.g. `authors`
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Author => "authors",
            EntityKind::Genre => "genres",
            EntityKind::Book => "books",
            EntityKind::Comment => "comments",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "author" | "authors" => Ok(EntityKind::Author),
            "genre" | "genres" => Ok(EntityKind::Genre),
            "book" | "books" => Ok(EntityKind::Book),
            "comment" | "comments" => Ok(EntityKind::Comment),
            other => Err(LibraError::Parse(format!("Unknown entity type: {}", other)).into()),
        }
    }
}

// ============================================================================
// Source records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AuthorRecord {
    pub id: i64,
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct GenreRecord {
    pub id: i64,
    pub name: String,
}

/// Book row with its author joined and genres in source order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookRecord {
    pub id: i64,
    pub title: String,
    pub author: AuthorRecord,
    pub genres: Vec<GenreRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CommentRecord {
    pub id: i64,
    pub text: String,
    pub book_id: i64,
    pub created_at: DateTime<Utc>,
}

impl SourceRecord for AuthorRecord {
    fn key(&self) -> i64 {
        self.id
    }
}

impl SourceRecord for GenreRecord {
    fn key(&self) -> i64 {
        self.id
    }
}

impl SourceRecord for BookRecord {
    fn key(&self) -> i64 {
        self.id
    }
}

impl SourceRecord for CommentRecord {
    fn key(&self) -> i64 {
        self.id
    }
}

// ============================================================================
// Target documents
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorDocument {
    pub id: Uuid,
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenreDocument {
    pub id: Uuid,
    pub name: String,
}

/// Book with a denormalized author and ordered genre sub-documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookDocument {
    pub id: Uuid,
    pub title: String,
    pub author: AuthorDocument,
    pub genres: Vec<GenreDocument>,
}

/// Comment referencing its book by target id. Looked up by `book_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentDocument {
    pub id: Uuid,
    pub text: String,
    pub book_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Document for AuthorDocument {
    const COLLECTION: &'static str = "authors";

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Document for GenreDocument {
    const COLLECTION: &'static str = "genres";

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Document for BookDocument {
    const COLLECTION: &'static str = "books";

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Document for CommentDocument {
    const COLLECTION: &'static str = "comments";

    fn id(&self) -> Uuid {
        self.id
    }
}
