//! Libra Migrate Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Batch migration of the relational library catalogue (authors, genres,
//! books, comments) into a document store.
//!
//! # Architecture
//!
//! - **idmap**: durable `(source type, source id) -> target id` translation
//!   fronted by bounded per-type caches
//! - **library**: entity records, target documents, transformers and the job plan
//! - **framework**: chunked read/transform/write steps, modulus partitioning,
//!   retry, logging listeners and the stage coordinator
//! - **storage**: PostgreSQL and in-memory implementations of every store seam
//!
//! Every run is a full idempotent upsert pass. Target identifiers come only from
//! the mapping store, so a rerun over the same source converges on the same
//! documents instead of duplicating them.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use libra_migrate::config::MigrationConfig;
//! use libra_migrate::framework::JobParameters;
//! use libra_migrate::idmap::IdMapper;
//! use libra_migrate::library::plan::build_job;
//! use libra_migrate::storage::memory::{InMemoryDocumentStore, InMemoryMappingStore, InMemorySource};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = MigrationConfig::default();
//!     let ids = Arc::new(IdMapper::new(
//!         Arc::new(InMemoryMappingStore::new()),
//!         config.id_cache.clone(),
//!     ));
//!     let job = build_job(
//!         Arc::new(InMemorySource::new()),
//!         Arc::new(InMemoryDocumentStore::new()),
//!         ids,
//!         &config,
//!     );
//!     let execution = job.run(JobParameters::started_now()).await?;
//!     println!("{}", execution.exit_code);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod framework;
pub mod idmap;
pub mod library;
pub mod storage;

// Re-export commonly used types
pub use error::{MigrateError, MigrateResult};
