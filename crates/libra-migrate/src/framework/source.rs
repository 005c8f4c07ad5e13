//! Read side of a chunked step

use async_trait::async_trait;

use super::partition::Partition;
use crate::error::MigrateResult;

/// A source row addressable by its relational key
pub trait SourceRecord: Send + Sync + 'static {
    /// 64-bit key assigned by the source store; the paging cursor
    fn key(&self) -> i64;
}

/// One keyset page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    /// Exclusive lower bound; `None` starts from the beginning
    pub after: Option<i64>,
    pub limit: usize,
    /// Restrict to keys with `key mod modulus == remainder`
    pub partition: Option<Partition>,
}

impl PageQuery {
    pub fn first(limit: usize, partition: Option<Partition>) -> Self {
        Self {
            after: None,
            limit,
            partition,
        }
    }

    /// Query for the page following `key`
    pub fn after(self, key: i64) -> Self {
        Self {
            after: Some(key),
            ..self
        }
    }

    /// Whether a record key falls inside this query's key range and partition
    pub fn admits(&self, key: i64) -> bool {
        self.after.map_or(true, |after| key > after)
            && self.partition.map_or(true, |p| p.contains(key))
    }
}

/// Ordered, read-only access to one entity table
///
/// Pages must be sorted by ascending key and never contain keys at or below
/// `query.after`, so the last key of a committed page is a stable cursor.
#[async_trait]
pub trait SourceReader<R: SourceRecord>: Send + Sync {
    async fn read_page(&self, query: &PageQuery) -> MigrateResult<Vec<R>>;
}
