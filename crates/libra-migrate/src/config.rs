//! Configuration management
//!
//! Every value comes from the environment (a `.env` file is honoured) with
//! the defaults below.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::framework::retry::RetryPolicy;
use crate::framework::worker::StepSettings;
use crate::idmap::IdCacheConfig;
use crate::library::models::EntityKind;

// ============================================================================
// Defaults
// ============================================================================

/// Default source database URL for local development.
pub const DEFAULT_SOURCE_DATABASE_URL: &str = "postgresql://localhost/library";

/// Default maximum connections per pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default core pool size; also the comments partition count.
pub const DEFAULT_CORE_POOL_SIZE: usize = 4;

/// Default cap on concurrently running step units.
pub const DEFAULT_MAX_POOL_SIZE: usize = 8;

pub const DEFAULT_CHUNK_AUTHORS: usize = 500;
pub const DEFAULT_CHUNK_GENRES: usize = 1_000;
pub const DEFAULT_CHUNK_BOOKS: usize = 200;
pub const DEFAULT_CHUNK_COMMENTS: usize = 5_000;

pub const DEFAULT_PROGRESS_AUTHORS: u64 = 5_000;
pub const DEFAULT_PROGRESS_GENRES: u64 = 200;
pub const DEFAULT_PROGRESS_BOOKS: u64 = 10_000;
pub const DEFAULT_PROGRESS_COMMENTS: u64 = 20_000;

/// Default attempts per chunk, including the first.
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Default linear backoff step in milliseconds.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;

/// Migration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    pub database: DatabaseConfig,
    pub pool: PoolConfig,
    pub chunk_sizes: PerEntity<usize>,
    pub progress_strides: PerEntity<u64>,
    pub id_cache: IdCacheConfig,
    pub retry: RetryConfig,
}

/// Source and target connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub source_url: String,
    pub target_url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Worker pool sizing
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolConfig {
    pub core_pool_size: usize,
    pub max_pool_size: usize,
}

/// One value per entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerEntity<T> {
    pub authors: T,
    pub genres: T,
    pub books: T,
    pub comments: T,
}

impl<T: Copy> PerEntity<T> {
    pub fn get(&self, kind: EntityKind) -> T {
        match kind {
            EntityKind::Author => self.authors,
            EntityKind::Genre => self.genres,
            EntityKind::Book => self.books,
            EntityKind::Comment => self.comments,
        }
    }
}

/// Chunk retry settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    pub limit: u32,
    pub backoff_ms: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.limit, Duration::from_millis(self.backoff_ms))
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

impl MigrationConfig {
    /// Load configuration from the environment and defaults.
    ///
    /// Not validated; apply command-line overrides first, then call
    /// [`MigrationConfig::validate`].
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn with_pool_overrides(mut self, core: Option<usize>, max: Option<usize>) -> Self {
        if let Some(core) = core {
            self.pool.core_pool_size = core;
        }
        if let Some(max) = max {
            self.pool.max_pool_size = max;
        }
        self
    }

    /// Build from an arbitrary variable lookup; unparsable numbers fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source_url =
            lookup("SOURCE_DATABASE_URL").unwrap_or_else(|| DEFAULT_SOURCE_DATABASE_URL.to_string());
        let target_url = lookup("TARGET_DATABASE_URL").unwrap_or_else(|| source_url.clone());

        let per_type = match lookup("MIGRATE_ID_CACHE_PER_TYPE") {
            Some(raw) => IdCacheConfig::parse_overrides(&raw)?,
            None => Default::default(),
        };

        Ok(Self {
            database: DatabaseConfig {
                source_url,
                target_url,
                max_connections: parse_or(
                    lookup("DATABASE_MAX_CONNECTIONS"),
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                connect_timeout_secs: parse_or(
                    lookup("DATABASE_CONNECT_TIMEOUT"),
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
            },
            pool: PoolConfig {
                core_pool_size: parse_or(lookup("MIGRATE_CORE_POOL_SIZE"), DEFAULT_CORE_POOL_SIZE),
                max_pool_size: parse_or(lookup("MIGRATE_MAX_POOL_SIZE"), DEFAULT_MAX_POOL_SIZE),
            },
            chunk_sizes: PerEntity {
                authors: parse_or(lookup("MIGRATE_CHUNK_AUTHORS"), DEFAULT_CHUNK_AUTHORS),
                genres: parse_or(lookup("MIGRATE_CHUNK_GENRES"), DEFAULT_CHUNK_GENRES),
                books: parse_or(lookup("MIGRATE_CHUNK_BOOKS"), DEFAULT_CHUNK_BOOKS),
                comments: parse_or(lookup("MIGRATE_CHUNK_COMMENTS"), DEFAULT_CHUNK_COMMENTS),
            },
            progress_strides: PerEntity {
                authors: parse_or(lookup("MIGRATE_PROGRESS_AUTHORS"), DEFAULT_PROGRESS_AUTHORS),
                genres: parse_or(lookup("MIGRATE_PROGRESS_GENRES"), DEFAULT_PROGRESS_GENRES),
                books: parse_or(lookup("MIGRATE_PROGRESS_BOOKS"), DEFAULT_PROGRESS_BOOKS),
                comments: parse_or(lookup("MIGRATE_PROGRESS_COMMENTS"), DEFAULT_PROGRESS_COMMENTS),
            },
            id_cache: IdCacheConfig {
                maximum_size: parse_or(lookup("MIGRATE_ID_CACHE_MAX"), crate::idmap::DEFAULT_ID_CACHE_MAX),
                per_type,
            },
            retry: RetryConfig {
                limit: parse_or(lookup("MIGRATE_RETRY_LIMIT"), DEFAULT_RETRY_LIMIT),
                backoff_ms: parse_or(lookup("MIGRATE_RETRY_BACKOFF_MS"), DEFAULT_RETRY_BACKOFF_MS),
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.source_url.is_empty() {
            anyhow::bail!("Source database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.pool.core_pool_size == 0 || self.pool.max_pool_size == 0 {
            anyhow::bail!("Pool sizes must be greater than 0");
        }

        if self.pool.core_pool_size > self.pool.max_pool_size {
            anyhow::bail!(
                "Core pool size ({}) cannot be greater than max pool size ({})",
                self.pool.core_pool_size,
                self.pool.max_pool_size
            );
        }

        for kind in EntityKind::ALL {
            if self.chunk_sizes.get(kind) == 0 {
                anyhow::bail!("Chunk size for {} must be greater than 0", kind.collection());
            }
            if self.progress_strides.get(kind) == 0 {
                anyhow::bail!("Progress stride for {} must be greater than 0", kind.collection());
            }
        }

        if self.retry.limit == 0 {
            anyhow::bail!("Retry limit must be at least 1");
        }

        // Partition workers beyond the pool cap just queue
        if self.pool.core_pool_size > self.pool.max_pool_size.saturating_sub(1) {
            tracing::warn!(
                partitions = self.pool.core_pool_size,
                max_pool_size = self.pool.max_pool_size,
                "Comment partitions and the books step cannot all run at once"
            );
        }

        Ok(())
    }

    /// Chunk size, progress stride and retry for one entity's step
    pub fn step_settings(&self, kind: EntityKind) -> StepSettings {
        StepSettings {
            chunk_size: self.chunk_sizes.get(kind),
            progress_stride: self.progress_strides.get(kind),
            retry: self.retry.policy(),
        }
    }

    /// Number of comment partitions
    pub fn partitions(&self) -> u32 {
        u32::try_from(self.pool.core_pool_size.max(1)).unwrap_or(u32::MAX)
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                source_url: DEFAULT_SOURCE_DATABASE_URL.to_string(),
                target_url: DEFAULT_SOURCE_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            pool: PoolConfig {
                core_pool_size: DEFAULT_CORE_POOL_SIZE,
                max_pool_size: DEFAULT_MAX_POOL_SIZE,
            },
            chunk_sizes: PerEntity {
                authors: DEFAULT_CHUNK_AUTHORS,
                genres: DEFAULT_CHUNK_GENRES,
                books: DEFAULT_CHUNK_BOOKS,
                comments: DEFAULT_CHUNK_COMMENTS,
            },
            progress_strides: PerEntity {
                authors: DEFAULT_PROGRESS_AUTHORS,
                genres: DEFAULT_PROGRESS_GENRES,
                books: DEFAULT_PROGRESS_BOOKS,
                comments: DEFAULT_PROGRESS_COMMENTS,
            },
            id_cache: IdCacheConfig::default(),
            retry: RetryConfig {
                limit: DEFAULT_RETRY_LIMIT,
                backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = MigrationConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.pool.core_pool_size, 4);
        assert_eq!(config.pool.max_pool_size, 8);
        assert_eq!(config.chunk_sizes.get(EntityKind::Comment), 5_000);
        assert_eq!(config.progress_strides.get(EntityKind::Genre), 200);
        assert_eq!(config.id_cache.maximum_size, 500_000);
        assert_eq!(config.database.target_url, config.database.source_url);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = MigrationConfig::from_lookup(lookup(&[
            ("SOURCE_DATABASE_URL", "postgresql://db/library"),
            ("TARGET_DATABASE_URL", "postgresql://db/documents"),
            ("MIGRATE_CORE_POOL_SIZE", "2"),
            ("MIGRATE_CHUNK_BOOKS", "50"),
            ("MIGRATE_ID_CACHE_PER_TYPE", "author=1000,book=0"),
            ("MIGRATE_RETRY_LIMIT", "5"),
            ("MIGRATE_RETRY_BACKOFF_MS", "not-a-number"),
        ]))
        .unwrap();

        assert_eq!(config.database.target_url, "postgresql://db/documents");
        assert_eq!(config.partitions(), 2);
        let books = config.step_settings(EntityKind::Book);
        assert_eq!(books.chunk_size, 50);
        assert_eq!(books.retry.max_attempts, 5);
        assert_eq!(books.retry.backoff, Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS));
        assert_eq!(config.id_cache.size_for(EntityKind::Author), 1000);
        assert_eq!(config.id_cache.size_for(EntityKind::Book), 0);
        assert_eq!(config.id_cache.size_for(EntityKind::Genre), 500_000);
    }

    #[test]
    fn test_bad_cache_override_is_rejected() {
        assert!(MigrationConfig::from_lookup(lookup(&[("MIGRATE_ID_CACHE_PER_TYPE", "author")])).is_err());
    }

    #[test]
    fn test_cli_pool_override_applies_before_validation() {
        let config = MigrationConfig::from_lookup(lookup(&[("MIGRATE_CORE_POOL_SIZE", "12")])).unwrap();
        assert!(config.validate().is_err());

        let config = config.with_pool_overrides(None, Some(16));
        assert!(config.validate().is_ok());
        assert_eq!(config.pool.core_pool_size, 12);
        assert_eq!(config.pool.max_pool_size, 16);
    }

    #[test]
    fn test_validation() {
        let mut config = MigrationConfig::default();
        config.pool.core_pool_size = 9;
        assert!(config.validate().is_err());

        let mut config = MigrationConfig::default();
        config.chunk_sizes.books = 0;
        assert!(config.validate().is_err());

        let mut config = MigrationConfig::default();
        config.retry.limit = 0;
        assert!(config.validate().is_err());

        let mut config = MigrationConfig::default();
        config.database.source_url.clear();
        assert!(config.validate().is_err());
    }
}
