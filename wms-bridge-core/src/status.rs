//! Persisted bookkeeping rows: sync status, upload status, executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{EntityKey, EntityKind, Scope, UploadFlow};
use crate::fingerprint::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Pending,
    Success,
    Failed,
    DryRun,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
            SyncStatus::DryRun => "dry_run",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "success" => Some(SyncStatus::Success),
            "failed" => Some(SyncStatus::Failed),
            "dry_run" => Some(SyncStatus::DryRun),
            _ => None,
        }
    }
}

/// One row per (scope, entity key) in the entity kind's status table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatusRecord {
    pub scope: Scope,
    pub kind: EntityKind,
    pub key: EntityKey,
    /// Digest of the last synced content; `None` until the first sync.
    pub fingerprint: Option<Fingerprint>,
    pub status: SyncStatus,
    /// Local bookkeeping time of the last reconciliation attempt.
    pub last_sync_time: DateTime<Utc>,
    /// When the remote write actually happened.
    pub last_remote_sync_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub asset_url: Option<String>,
    pub asset_hash: Option<String>,
}

impl SyncStatusRecord {
    /// A fresh row for a key seen for the first time.
    pub fn first_sighting(scope: Scope, kind: EntityKind, key: EntityKey, now: DateTime<Utc>) -> Self {
        Self {
            scope,
            kind,
            key,
            fingerprint: None,
            status: SyncStatus::Pending,
            last_sync_time: now,
            last_remote_sync_time: None,
            created_at: now,
            asset_url: None,
            asset_hash: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    Success,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Success => "success",
            UploadStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(UploadStatus::Success),
            "failed" => Some(UploadStatus::Failed),
            _ => None,
        }
    }
}

/// One row per (scope, foreign item id) for an upload flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStatusRecord {
    pub scope: Scope,
    pub flow: UploadFlow,
    pub item_id: String,
    /// When the WMS completed the item; the poll cursor is derived from it.
    pub completed_at: Option<DateTime<Utc>>,
    pub upload_time: DateTime<Utc>,
    pub status: UploadStatus,
    pub error_message: Option<String>,
    /// Document id assigned by the ERP.
    pub remote_document_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    PartiallySucceeded,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::PartiallySucceeded => "partially_succeeded",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(ExecutionStatus::Running),
            "succeeded" => Some(ExecutionStatus::Succeeded),
            "partially_succeeded" => Some(ExecutionStatus::PartiallySucceeded),
            "failed" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }
}

/// Append-only history row for one scheduler invocation of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub scope: Scope,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub records_processed: u64,
    pub error_count: u64,
    pub status: ExecutionStatus,
    pub message: Option<String>,
}

impl ExecutionRecord {
    pub fn start(scope: Scope, job_name: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope,
            job_name: job_name.to_string(),
            started_at,
            finished_at: None,
            records_processed: 0,
            error_count: 0,
            status: ExecutionStatus::Running,
            message: None,
        }
    }
}
