//! Durable run history

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{JobExecution, JobParameters, JobStatus};
use crate::error::MigrateResult;

/// Run status while the job is still executing
pub const STATUS_STARTED: &str = "STARTED";

/// One row of run history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub job_name: String,
    pub parameters: JobParameters,
    /// `STARTED`, `COMPLETED` or `FAILED`
    pub status: String,
    pub exit_code: Option<String>,
    pub summary: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn started(run_id: Uuid, job_name: &str, parameters: &JobParameters) -> Self {
        Self {
            run_id,
            job_name: job_name.to_string(),
            parameters: parameters.clone(),
            status: STATUS_STARTED.to_string(),
            exit_code: None,
            summary: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Apply a finished execution to this record
    pub fn finish(&mut self, execution: &JobExecution) -> MigrateResult<()> {
        self.status = execution.status.as_str().to_string();
        self.exit_code = Some(execution.exit_code.clone());
        self.summary = Some(serde_json::to_value(execution)?);
        self.ended_at = Some(execution.ended_at);
        Ok(())
    }

    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed.as_str()
    }
}

/// Records the lifecycle of every job run
#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn create_run(&self, run_id: Uuid, job_name: &str, parameters: &JobParameters) -> MigrateResult<()>;

    async fn complete_run(&self, execution: &JobExecution) -> MigrateResult<()>;

    async fn fail_run(&self, execution: &JobExecution) -> MigrateResult<()>;

    /// Most recent failed run of `job_name`, if any
    async fn last_failed(&self, job_name: &str) -> MigrateResult<Option<RunRecord>>;

    /// Newest runs first
    async fn recent(&self, job_name: &str, limit: usize) -> MigrateResult<Vec<RunRecord>>;
}
