//! Lifecycle logging for jobs, stages, steps and chunks
//!
//! Purely observational. Nothing here influences control flow.

use tracing::{error, info, warn};
use uuid::Uuid;

use super::types::{JobExecution, JobParameters, StepCounters, StepExecution};
use crate::error::MigrateError;

pub fn job_started(job_name: &str, run_id: Uuid, params: &JobParameters) {
    info!(job = %job_name, run_id = %run_id, params = %params, "JOB START");
}

pub fn job_finished(execution: &JobExecution) {
    let totals = execution.totals();
    let elapsed_ms = (execution.ended_at - execution.started_at).num_milliseconds();

    if execution.is_success() {
        info!(
            job = %execution.job_name,
            run_id = %execution.run_id,
            status = execution.status.as_str(),
            read = totals.read,
            written = totals.written,
            filtered = totals.filtered,
            retries = totals.retries,
            commits = totals.commits,
            rollbacks = totals.rollbacks,
            elapsed_ms,
            "JOB END"
        );
    } else {
        error!(
            job = %execution.job_name,
            run_id = %execution.run_id,
            status = execution.status.as_str(),
            read = totals.read,
            written = totals.written,
            filtered = totals.filtered,
            retries = totals.retries,
            commits = totals.commits,
            rollbacks = totals.rollbacks,
            elapsed_ms,
            failure = execution.failure.as_deref().unwrap_or(""),
            "JOB END"
        );
    }

    for step in &execution.steps {
        info!(
            step = %step.step_name,
            status = step.status.as_str(),
            partitions = step.executions.len(),
            counts = %step.counters,
            "step summary"
        );
    }
}

pub fn stage_started(stage: usize, name: &str, units: usize) {
    info!(stage, name = %name, units, "STAGE START");
}

pub fn stage_finished(stage: usize, name: &str, failed_steps: &[String]) {
    if failed_steps.is_empty() {
        info!(stage, name = %name, "STAGE END");
    } else {
        error!(stage, name = %name, failed = ?failed_steps, "STAGE FAILED, later stages skipped");
    }
}

pub fn step_started(alias: &str, execution: &StepExecution) {
    match &execution.partition_label {
        Some(label) => info!(
            "[{}] PARTITION START {} ({})",
            alias,
            label,
            execution.partition.map(|p| p.to_string()).unwrap_or_default()
        ),
        None => info!("[{}] STEP START", alias),
    }
}

pub fn step_finished(alias: &str, execution: &StepExecution) {
    let elapsed_ms = (execution.ended_at - execution.started_at).num_milliseconds();
    let phase = if execution.partition_label.is_some() {
        "PARTITION END"
    } else {
        "STEP END"
    };
    let label = execution.partition_label.as_deref().unwrap_or("");

    if execution.is_failed() {
        error!(
            status = execution.status.as_str(),
            elapsed_ms,
            failure = execution.failure.as_deref().unwrap_or(""),
            "[{}] {} {} {}",
            alias,
            phase,
            label,
            execution.counters
        );
    } else {
        info!(
            status = execution.status.as_str(),
            elapsed_ms,
            "[{}] {} {} {}",
            alias,
            phase,
            label,
            execution.counters
        );
    }
}

pub fn chunk_retry(alias: &str, attempt: u32, max_attempts: u32, err: &MigrateError) {
    warn!(attempt, max_attempts, error = %err, "[{}] chunk attempt failed, retrying", alias);
}

/// Emits a progress line only after at least `stride` records were read
/// since the previous one
#[derive(Debug)]
pub struct ProgressListener {
    alias: String,
    stride: u64,
    last_logged: u64,
}

impl ProgressListener {
    pub fn new(alias: impl Into<String>, stride: u64) -> Self {
        Self {
            alias: alias.into(),
            stride: stride.max(1),
            last_logged: 0,
        }
    }

    /// Called after each committed chunk; returns whether a line was emitted
    pub fn after_chunk(&mut self, counters: &StepCounters) -> bool {
        if counters.read.saturating_sub(self.last_logged) < self.stride {
            return false;
        }
        self.last_logged = counters.read;
        info!(
            "[{}] progress: read={} written={} filtered={} commits={}",
            self.alias, counters.read, counters.written, counters.filtered, counters.commits
        );
        true
    }

    pub fn on_chunk_error(&self, counters: &StepCounters, err: &MigrateError) {
        warn!(
            error = %err,
            "[{}] chunk error: read={} written={} commits={} rollbacks={}",
            self.alias, counters.read, counters.written, counters.commits, counters.rollbacks
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(read: u64) -> StepCounters {
        StepCounters {
            read,
            written: read,
            ..Default::default()
        }
    }

    #[test]
    fn test_progress_is_throttled() {
        let mut progress = ProgressListener::new("authors", 100);
        assert!(!progress.after_chunk(&at(40)));
        assert!(!progress.after_chunk(&at(80)));
        assert!(progress.after_chunk(&at(120)));
        assert!(!progress.after_chunk(&at(160)));
        assert!(!progress.after_chunk(&at(200)));
        assert!(progress.after_chunk(&at(220)));
    }

    #[test]
    fn test_events_are_at_least_a_stride_apart() {
        let mut progress = ProgressListener::new("comments", 100);
        assert!(progress.after_chunk(&at(199)));
        assert!(!progress.after_chunk(&at(201)));
        assert!(!progress.after_chunk(&at(298)));
        assert!(progress.after_chunk(&at(299)));
    }

    #[test]
    fn test_large_chunk_emits_once() {
        let mut progress = ProgressListener::new("comments", 10);
        assert!(progress.after_chunk(&at(55)));
        assert!(!progress.after_chunk(&at(59)));
        assert!(!progress.after_chunk(&at(60)));
        assert!(progress.after_chunk(&at(65)));
    }

    #[test]
    fn test_zero_stride_logs_every_chunk() {
        let mut progress = ProgressListener::new("genres", 0);
        assert!(progress.after_chunk(&at(1)));
        assert!(progress.after_chunk(&at(2)));
    }
}
