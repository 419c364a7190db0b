//! Error types for the sync engine.
//!
//! Two tiers:
//! - [`SyncError`] is a job-level failure. It propagates out of a job run and the
//!   scheduler logs it and moves on to the next due job.
//! - [`RecordError`] is a per-record failure. It is counted and logged inside the
//!   job's entity loop and never aborts the batch.
//!
//! Capability traits at the external seams return [`ContractError`] so that
//! transports can surface their own error types unchanged.

use thiserror::Error;

/// Boxed error returned by external collaborators (HTTP clients, blob stores).
pub type ContractError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("source fetch failed: {0}")]
    Fetch(String),

    #[error("upload poll failed: {0}")]
    Upload(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt row in {table}: {reason}")]
    Corrupt { table: String, reason: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Why a single candidate record was not synchronised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The record lacks a derivable entity key. Upstream data issue.
    #[error("record has no usable key")]
    Identification,

    /// The mapped record failed required-field or format checks.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// The remote write failed; retried on the next run.
    #[error("write failed: {0}")]
    Write(String),
}

impl RecordError {
    /// Transient failures hold the watermark back so the record is fetched again.
    pub fn is_transient(&self) -> bool {
        matches!(self, RecordError::Write(_))
    }
}
