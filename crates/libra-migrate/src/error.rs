//! Migration error taxonomy

use libra_common::LibraError;
use thiserror::Error;

/// Result type alias for migration operations
pub type MigrateResult<T> = std::result::Result<T, MigrateError>;

/// Errors raised while migrating relational rows into documents
#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A store could not be reached; the operation may succeed if repeated
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A parent identifier mapping that must already exist was not found
    #[error("Unresolved {kind} reference: source id {source_id}")]
    UnresolvedReference { kind: String, source_id: i64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Stage '{stage}' failed: {}", failed_steps.join(", "))]
    StageFailed {
        stage: String,
        failed_steps: Vec<String>,
    },

    #[error(transparent)]
    Common(#[from] LibraError),
}

impl MigrateError {
    /// Whether repeating the failed operation could succeed.
    ///
    /// Connection, pool and I/O failures plus serialization conflicts are
    /// transient. Constraint violations, bad data and missing references are not.
    pub fn is_transient(&self) -> bool {
        match self {
            MigrateError::StoreUnavailable(_) => true,
            MigrateError::Database(err) => match err {
                sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(db) => db.code().is_some_and(|code| {
                    // serialization_failure, deadlock_detected, connection_exception class
                    code == "40001" || code == "40P01" || code.starts_with("08")
                }),
                _ => false,
            },
            _ => false,
        }
    }
}
