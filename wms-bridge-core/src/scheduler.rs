//! Interval scheduling of sync and upload jobs.
//!
//! Jobs are registered per scope with an interval. A job is due when it never
//! ran or its interval has elapsed since its last start. Due jobs run one after
//! the other in registration order; a failing job is logged and recorded in the
//! execution log, and the remaining jobs still run.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::RunOptions;
use crate::entity::Scope;
use crate::error::{SyncError, SyncResult};
use crate::report::{JobReport, RunOutcome};
use crate::status::{ExecutionRecord, ExecutionStatus};
use crate::store::ExecutionLog;
use crate::synchronise::SyncJob;
use crate::uploader::UploadJob;

/// Anything the scheduler can run.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;
    fn scope(&self) -> &Scope;
    async fn run(&self, options: &RunOptions) -> SyncResult<JobReport>;
}

#[async_trait]
impl Job for SyncJob {
    fn name(&self) -> &str {
        self.kind().name()
    }

    fn scope(&self) -> &Scope {
        SyncJob::scope(self)
    }

    async fn run(&self, options: &RunOptions) -> SyncResult<JobReport> {
        SyncJob::run(self, options).await
    }
}

#[async_trait]
impl Job for UploadJob {
    fn name(&self) -> &str {
        self.flow().name()
    }

    fn scope(&self) -> &Scope {
        UploadJob::scope(self)
    }

    async fn run(&self, options: &RunOptions) -> SyncResult<JobReport> {
        UploadJob::run(self, options).await
    }
}

pub struct ScheduledJob {
    pub job: Arc<dyn Job>,
    pub interval: Duration,
}

/// Result of one job invocation by the scheduler.
#[derive(Debug)]
pub struct JobRun {
    pub scope: Scope,
    pub job: String,
    pub result: SyncResult<JobReport>,
}

impl JobRun {
    pub fn outcome(&self) -> RunOutcome {
        match &self.result {
            Ok(report) => report.outcome,
            Err(_) => RunOutcome::TotalFailure,
        }
    }
}

pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
    last_run: Mutex<HashMap<(Scope, String), DateTime<Utc>>>,
    executions: Option<Arc<dyn ExecutionLog>>,
    clock: Arc<dyn Clock>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            last_run: Mutex::new(HashMap::new()),
            executions: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_execution_log(mut self, log: Arc<dyn ExecutionLog>) -> Self {
        self.executions = Some(log);
        self
    }

    pub fn register(&mut self, job: Arc<dyn Job>, interval: Duration) {
        info!(scope = %job.scope(), job = job.name(), interval_secs = interval.num_seconds(), "Registered job");
        self.jobs.push(ScheduledJob { job, interval });
    }

    /// (scope, job name) of every registered job, in registration order.
    pub fn job_names(&self) -> Vec<(Scope, String)> {
        self.jobs
            .iter()
            .map(|s| (s.job.scope().clone(), s.job.name().to_string()))
            .collect()
    }

    fn last_runs(&self) -> std::sync::MutexGuard<'_, HashMap<(Scope, String), DateTime<Utc>>> {
        self.last_run.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn due_jobs(&self, now: DateTime<Utc>) -> Vec<Arc<dyn Job>> {
        let last_runs = self.last_runs();
        self.jobs
            .iter()
            .filter(|s| {
                let id = (s.job.scope().clone(), s.job.name().to_string());
                last_runs
                    .get(&id)
                    .map_or(true, |last| now - *last >= s.interval)
            })
            .map(|s| s.job.clone())
            .collect()
    }

    /// Runs one named job of a scope immediately, regardless of its interval.
    pub async fn run_once(&self, scope: &Scope, name: &str, options: &RunOptions) -> SyncResult<JobReport> {
        let job = self
            .jobs
            .iter()
            .find(|s| s.job.scope() == scope && s.job.name() == name)
            .map(|s| s.job.clone())
            .ok_or_else(|| SyncError::Config(format!("no job named '{name}' for scope {scope}")))?;
        self.execute(job.as_ref(), options).await
    }

    /// Runs every job of a scope once, in registration order.
    pub async fn run_all(&self, scope: &Scope, options: &RunOptions) -> Vec<JobRun> {
        let jobs: Vec<_> = self
            .jobs
            .iter()
            .filter(|s| s.job.scope() == scope)
            .map(|s| s.job.clone())
            .collect();
        let mut runs = Vec::with_capacity(jobs.len());
        for job in jobs {
            runs.push(self.run_job(job.as_ref(), options).await);
        }
        runs
    }

    /// Runs every job that is due now.
    pub async fn run_pending(&self, options: &RunOptions) -> Vec<JobRun> {
        self.run_due(options, None).await
    }

    async fn run_due(&self, options: &RunOptions, cancel: Option<&CancellationToken>) -> Vec<JobRun> {
        let mut runs = Vec::new();
        for job in self.due_jobs(self.clock.now()) {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                info!("Cancellation requested, remaining due jobs skipped");
                break;
            }
            runs.push(self.run_job(job.as_ref(), options).await);
        }
        runs
    }

    /// Ticks until cancelled, running due jobs on every tick.
    pub async fn run_forever(&self, options: &RunOptions, tick: std::time::Duration, cancel: CancellationToken) {
        info!(jobs = self.jobs.len(), tick_secs = tick.as_secs(), "Scheduler started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.run_due(options, Some(&cancel)).await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(tick) => {}
            }
        }
        info!("Scheduler stopped");
    }

    async fn run_job(&self, job: &dyn Job, options: &RunOptions) -> JobRun {
        let result = self.execute(job, options).await;
        JobRun {
            scope: job.scope().clone(),
            job: job.name().to_string(),
            result,
        }
    }

    async fn execute(&self, job: &dyn Job, options: &RunOptions) -> SyncResult<JobReport> {
        let started = self.clock.now();
        self.last_runs()
            .insert((job.scope().clone(), job.name().to_string()), started);

        let mut execution = ExecutionRecord::start(job.scope().clone(), job.name(), started);
        if let Some(log) = &self.executions {
            if let Err(e) = log.start_execution(&execution).await {
                warn!(job = job.name(), error = %e, "Could not record execution start");
            }
        }

        let result = job.run(options).await;

        execution.finished_at = Some(self.clock.now());
        match &result {
            Ok(report) => {
                execution.records_processed = report.fetched as u64;
                execution.error_count = report.errors as u64;
                execution.status = report.outcome.execution_status();
            }
            Err(e) => {
                error!(scope = %job.scope(), job = job.name(), error = %e, "Job failed");
                execution.status = ExecutionStatus::Failed;
                execution.message = Some(e.to_string());
            }
        }
        if let Some(log) = &self.executions {
            if let Err(e) = log.finish_execution(&execution).await {
                warn!(job = job.name(), error = %e, "Could not record execution finish");
            }
        }
        result
    }
}
