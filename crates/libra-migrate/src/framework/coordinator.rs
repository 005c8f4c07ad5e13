//! Stage coordinator
//!
//! A job is an ordered list of stages. Steps inside a stage are independent
//! and run concurrently on a bounded [`WorkerPool`]; a partitioned step fans
//! out into one unit per partition. Each stage is a join-all barrier: the next
//! stage starts only when every unit of the current one has succeeded. A
//! failing unit never cancels siblings already in flight.

use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::warn;
use uuid::Uuid;

use super::listener;
use super::partition::{ModulusPartitioner, Partition};
use super::runs::RunRepository;
use super::types::{
    JobExecution, JobParameters, JobState, JobStatus, StepExecution, StepStatus, StepSummary,
};
use super::worker::Step;
use crate::error::{MigrateError, MigrateResult};

/// Default cap on concurrently running units
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Bounded pool running futures on the tokio runtime
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    max_concurrency: usize,
}

impl WorkerPool {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run every task, at most `max_concurrency` at a time, and wait for all.
    /// Results come back in submission order.
    pub async fn run_all<T: Send + 'static>(
        &self,
        tasks: Vec<BoxFuture<'static, T>>,
    ) -> Vec<Result<T, JoinError>> {
        let mut results: Vec<(usize, Result<T, JoinError>)> = stream::iter(tasks.into_iter().enumerate())
            .map(|(index, task)| async move { (index, tokio::spawn(task).await) })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

struct StageStep {
    step: Arc<dyn Step>,
    partitioner: Option<ModulusPartitioner>,
}

/// A set of mutually independent steps
pub struct Stage {
    name: String,
    steps: Vec<StageStep>,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(StageStep {
            step,
            partitioner: None,
        });
        self
    }

    /// Add a step that runs once per partition
    pub fn partitioned_step(mut self, step: Arc<dyn Step>, partitioner: ModulusPartitioner) -> Self {
        self.steps.push(StageStep {
            step,
            partitioner: Some(partitioner),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.step.name()).collect()
    }
}

struct Unit {
    step_index: usize,
    step: Arc<dyn Step>,
    partition: Option<(String, Partition)>,
}

/// Dependency-ordered migration job
pub struct MigrationJob {
    name: String,
    stages: Vec<Stage>,
    pool: WorkerPool,
    runs: Option<Arc<dyn RunRepository>>,
}

impl MigrationJob {
    pub fn builder(name: impl Into<String>) -> MigrationJobBuilder {
        MigrationJobBuilder {
            name: name.into(),
            stages: Vec::new(),
            pool: WorkerPool::default(),
            runs: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Run every stage in order.
    ///
    /// Step failures end in a `FAILED` execution rather than an error; `Err`
    /// is returned only when the run could not be recorded at start.
    pub async fn run(&self, parameters: JobParameters) -> MigrateResult<JobExecution> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut states = vec![JobState::NotStarted];

        if let Some(runs) = &self.runs {
            runs.create_run(run_id, &self.name, &parameters).await?;
        }
        listener::job_started(&self.name, run_id, &parameters);

        let mut steps = Vec::new();
        let mut failure = None;

        for (index, stage) in self.stages.iter().enumerate() {
            let number = index + 1;
            states.push(JobState::StageRunning(number));

            let summaries = self.run_stage(number, stage).await;
            let failed_steps: Vec<String> = summaries
                .iter()
                .filter(|s| s.status == StepStatus::Failed)
                .map(|s| s.step_name.clone())
                .collect();

            listener::stage_finished(number, &stage.name, &failed_steps);
            steps.extend(summaries);

            if !failed_steps.is_empty() {
                failure = Some(
                    MigrateError::StageFailed {
                        stage: stage.name.clone(),
                        failed_steps,
                    }
                    .to_string(),
                );
                break;
            }
        }

        let status = if failure.is_none() {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        states.push(match status {
            JobStatus::Completed => JobState::Completed,
            JobStatus::Failed => JobState::Failed,
        });

        let execution = JobExecution {
            run_id,
            job_name: self.name.clone(),
            parameters,
            status,
            exit_code: status.as_str().to_string(),
            states,
            steps,
            failure,
            started_at,
            ended_at: Utc::now(),
        };
        listener::job_finished(&execution);

        if let Some(runs) = &self.runs {
            let recorded = match status {
                JobStatus::Completed => runs.complete_run(&execution).await,
                JobStatus::Failed => runs.fail_run(&execution).await,
            };
            if let Err(e) = recorded {
                warn!(run_id = %run_id, error = %e, "Failed to record run outcome");
            }
        }

        Ok(execution)
    }

    async fn run_stage(&self, number: usize, stage: &Stage) -> Vec<StepSummary> {
        let units = self.expand(stage);
        listener::stage_started(number, &stage.name, units.len());

        let labels: Vec<(usize, String, Option<(String, Partition)>)> = units
            .iter()
            .map(|u| (u.step_index, u.step.name().to_string(), u.partition.clone()))
            .collect();

        let tasks = units
            .into_iter()
            .map(|unit| async move { unit.step.execute(unit.partition).await }.boxed())
            .collect();

        let results = self.pool.run_all(tasks).await;

        let mut per_step: Vec<Vec<StepExecution>> = vec![Vec::new(); stage.steps.len()];
        for ((step_index, name, partition), result) in labels.into_iter().zip(results) {
            let execution = match result {
                Ok(execution) => execution,
                Err(join_error) => {
                    let mut execution = StepExecution::start(name.clone(), partition);
                    execution.fail(
                        MigrateError::StepFailed {
                            step: name,
                            reason: format!("worker task aborted: {}", join_error),
                        }
                        .to_string(),
                    );
                    execution.finish()
                }
            };
            per_step[step_index].push(execution);
        }

        stage
            .steps
            .iter()
            .zip(per_step)
            .map(|(s, executions)| StepSummary::from_executions(s.step.name(), executions))
            .collect()
    }

    fn expand(&self, stage: &Stage) -> Vec<Unit> {
        let grid_size = u32::try_from(self.pool.max_concurrency()).unwrap_or(u32::MAX);
        let mut units = Vec::new();

        for (step_index, stage_step) in stage.steps.iter().enumerate() {
            match stage_step.partitioner {
                Some(partitioner) => {
                    for (label, partition) in partitioner.partition(grid_size) {
                        units.push(Unit {
                            step_index,
                            step: Arc::clone(&stage_step.step),
                            partition: Some((label, partition)),
                        });
                    }
                }
                None => units.push(Unit {
                    step_index,
                    step: Arc::clone(&stage_step.step),
                    partition: None,
                }),
            }
        }
        units
    }
}

/// Builder for [`MigrationJob`]
pub struct MigrationJobBuilder {
    name: String,
    stages: Vec<Stage>,
    pool: WorkerPool,
    runs: Option<Arc<dyn RunRepository>>,
}

impl MigrationJobBuilder {
    /// Append a stage; stages run in insertion order
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.pool = WorkerPool::new(max_concurrency);
        self
    }

    pub fn run_repository(mut self, runs: Arc<dyn RunRepository>) -> Self {
        self.runs = Some(runs);
        self
    }

    pub fn build(self) -> MigrationJob {
        MigrationJob {
            name: self.name,
            stages: self.stages,
            pool: self.pool,
            runs: self.runs,
        }
    }
}
