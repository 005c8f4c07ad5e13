//! Core types for the migration framework

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::partition::Partition;

/// Per-step (or per-partition) processing counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCounters {
    pub read: u64,
    pub written: u64,
    /// Records the transformer chose not to emit
    pub filtered: u64,
    /// Chunks committed
    pub commits: u64,
    /// Failed chunk attempts
    pub rollbacks: u64,
    /// Extra attempts after a transient failure
    pub retries: u64,
}

impl StepCounters {
    pub fn merge(&mut self, other: &StepCounters) {
        self.read += other.read;
        self.written += other.written;
        self.filtered += other.filtered;
        self.commits += other.commits;
        self.rollbacks += other.rollbacks;
        self.retries += other.retries;
    }
}

impl fmt::Display for StepCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "read={} written={} filtered={} retries={} commits={} rollbacks={}",
            self.read, self.written, self.filtered, self.retries, self.commits, self.rollbacks
        )
    }
}

/// Terminal status of a step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &str {
        match self {
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
        }
    }
}

/// Terminal status of a job run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "COMPLETED" => JobStatus::Completed,
            _ => JobStatus::Failed,
        }
    }
}

/// Orchestrator state machine
///
/// `NotStarted -> StageRunning(1) -> StageRunning(2) -> Completed`, with
/// `Failed` reachable from any running stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    NotStarted,
    StageRunning(usize),
    Completed,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::NotStarted => f.write_str("NOT_STARTED"),
            JobState::StageRunning(stage) => write!(f, "STAGE_{}_RUNNING", stage),
            JobState::Completed => f.write_str("COMPLETED"),
            JobState::Failed => f.write_str("FAILED"),
        }
    }
}

/// Result of running one step, or one partition of a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_name: String,
    /// Partition label (`p0`, `p1`, ...) for partitioned workers
    pub partition_label: Option<String>,
    pub partition: Option<Partition>,
    pub status: StepStatus,
    pub counters: StepCounters,
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl StepExecution {
    pub fn start(step_name: impl Into<String>, partition: Option<(String, Partition)>) -> Self {
        let now = Utc::now();
        let (partition_label, partition) = match partition {
            Some((label, p)) => (Some(label), Some(p)),
            None => (None, None),
        };
        Self {
            step_name: step_name.into(),
            partition_label,
            partition,
            status: StepStatus::Completed,
            counters: StepCounters::default(),
            failure: None,
            started_at: now,
            ended_at: now,
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.failure = Some(reason.into());
    }

    pub fn finish(mut self) -> Self {
        self.ended_at = Utc::now();
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

/// Counters for one step aggregated across its partitions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSummary {
    pub step_name: String,
    pub status: StepStatus,
    pub counters: StepCounters,
    pub executions: Vec<StepExecution>,
}

impl StepSummary {
    pub fn from_executions(step_name: impl Into<String>, executions: Vec<StepExecution>) -> Self {
        let mut counters = StepCounters::default();
        for exec in &executions {
            counters.merge(&exec.counters);
        }
        let status = if executions.iter().any(StepExecution::is_failed) {
            StepStatus::Failed
        } else {
            StepStatus::Completed
        };
        Self {
            step_name: step_name.into(),
            status,
            counters,
            executions,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &str> {
        self.executions.iter().filter_map(|e| e.failure.as_deref())
    }
}

/// Run-scoped job parameters
///
/// A distinguishing value such as `started_at` lets a fresh run start even
/// when every business parameter is unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameters(BTreeMap<String, String>);

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters carrying `started_at` in epoch millis
    pub fn started_now() -> Self {
        Self::new().with("started_at", Utc::now().timestamp_millis().to_string())
    }

    /// Parameters for a restart, optionally pointing at the failed run
    pub fn restarted_now(restart_of: Option<Uuid>) -> Self {
        let params = Self::new().with("restarted_at", Utc::now().timestamp_millis().to_string());
        match restart_of {
            Some(run_id) => params.with("restart_of", run_id.to_string()),
            None => params,
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl fmt::Display for JobParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

/// Outcome of one job run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub run_id: Uuid,
    pub job_name: String,
    pub parameters: JobParameters,
    pub status: JobStatus,
    pub exit_code: String,
    /// Every state the run passed through, in order
    pub states: Vec<JobState>,
    pub steps: Vec<StepSummary>,
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl JobExecution {
    pub fn totals(&self) -> StepCounters {
        let mut totals = StepCounters::default();
        for step in &self.steps {
            totals.merge(&step.counters);
        }
        totals
    }

    pub fn step(&self, name: &str) -> Option<&StepSummary> {
        self.steps.iter().find(|s| s.step_name == name)
    }

    pub fn final_state(&self) -> JobState {
        self.states.last().copied().unwrap_or(JobState::NotStarted)
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_merge() {
        let mut total = StepCounters {
            read: 10,
            written: 9,
            filtered: 1,
            commits: 2,
            ..Default::default()
        };
        total.merge(&StepCounters {
            read: 5,
            written: 5,
            commits: 1,
            rollbacks: 1,
            retries: 1,
            ..Default::default()
        });
        assert_eq!(total.read, 15);
        assert_eq!(total.written, 14);
        assert_eq!(total.commits, 3);
        assert_eq!(total.rollbacks, 1);
        assert_eq!(total.retries, 1);
    }

    #[test]
    fn test_summary_fails_if_any_partition_failed() {
        let ok = StepExecution::start("comments", Some(("p0".into(), Partition::new(2, 0)))).finish();
        let mut bad = StepExecution::start("comments", Some(("p1".into(), Partition::new(2, 1))));
        bad.fail("store unavailable");

        let summary = StepSummary::from_executions("comments", vec![ok, bad.finish()]);
        assert_eq!(summary.status, StepStatus::Failed);
        assert_eq!(summary.failures().collect::<Vec<_>>(), vec!["store unavailable"]);
    }

    #[test]
    fn test_job_state_names() {
        assert_eq!(JobState::NotStarted.to_string(), "NOT_STARTED");
        assert_eq!(JobState::StageRunning(2).to_string(), "STAGE_2_RUNNING");
        assert_eq!(JobStatus::from("COMPLETED".to_string()), JobStatus::Completed);
    }

    #[test]
    fn test_job_parameters() {
        let params = JobParameters::started_now();
        assert!(params.get("started_at").is_some());

        let restart = JobParameters::restarted_now(Some(Uuid::nil()));
        assert_eq!(restart.get("restart_of"), Some(Uuid::nil().to_string().as_str()));
        assert!(restart.get("started_at").is_none());
    }
}
