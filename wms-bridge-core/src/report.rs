//! Outcome reporting for a single job run.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entity::Scope;
use crate::error::RecordError;
use crate::status::ExecutionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    AllSucceeded,
    /// At least one record reconciled and at least one failed.
    PartialSuccess,
    /// Nothing reconciled and something failed, or the job itself failed.
    TotalFailure,
}

impl RunOutcome {
    /// Classifies a run. Unchanged and dry-run records count as reconciled.
    pub fn from_counts(reconciled: usize, errors: usize) -> Self {
        match (reconciled, errors) {
            (_, 0) => RunOutcome::AllSucceeded,
            (0, _) => RunOutcome::TotalFailure,
            _ => RunOutcome::PartialSuccess,
        }
    }

    /// Process exit status for a single requested operation.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::AllSucceeded => 0,
            RunOutcome::TotalFailure => 1,
            RunOutcome::PartialSuccess => 2,
        }
    }

    pub fn execution_status(&self) -> ExecutionStatus {
        match self {
            RunOutcome::AllSucceeded => ExecutionStatus::Succeeded,
            RunOutcome::PartialSuccess => ExecutionStatus::PartiallySucceeded,
            RunOutcome::TotalFailure => ExecutionStatus::Failed,
        }
    }
}

/// One record that could not be synchronised, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordFailure {
    /// `None` when the record had no derivable key.
    pub key: Option<String>,
    #[serde(serialize_with = "display")]
    pub error: RecordError,
}

fn display<S: serde::Serializer>(error: &RecordError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(error)
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: String,
    pub scope: Scope,
    pub outcome: RunOutcome,
    /// Candidates evaluated (after any limit).
    pub fetched: usize,
    /// Remote writes that succeeded.
    pub written: usize,
    /// Skipped because nothing changed (or, for uploads, already uploaded).
    pub unchanged: usize,
    /// Recorded as dry-run without a remote write.
    pub dry_run: usize,
    pub errors: usize,
    pub failures: Vec<RecordFailure>,
    /// The watermark stored at the end of the run, if it moved.
    pub watermark: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    pub fn new(job: &str, scope: &Scope, started_at: DateTime<Utc>) -> Self {
        Self {
            job: job.to_string(),
            scope: scope.clone(),
            outcome: RunOutcome::AllSucceeded,
            fetched: 0,
            written: 0,
            unchanged: 0,
            dry_run: 0,
            errors: 0,
            failures: Vec::new(),
            watermark: None,
            started_at,
            finished_at: started_at,
        }
    }

    pub fn fail(&mut self, key: Option<String>, error: RecordError) {
        self.errors += 1;
        self.failures.push(RecordFailure { key, error });
    }

    /// Computes the outcome and stamps the finish time.
    pub fn finish(mut self, finished_at: DateTime<Utc>) -> Self {
        self.outcome = RunOutcome::from_counts(self.written + self.unchanged + self.dry_run, self.errors);
        self.finished_at = finished_at;
        self
    }
}
