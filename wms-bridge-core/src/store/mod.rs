//! Persistence seams for sync bookkeeping.
//!
//! Every row is namespaced by [`Scope`]; within a scope each entity kind and
//! upload flow has its own table, and a single writer (that kind's job) owns it.
//! Stores do not add optimistic concurrency on top of that; multi-process
//! deployments need row-level locking in the storage engine.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entity::{EntityKey, EntityKind, Scope, UploadFlow};
use crate::error::StoreResult;
use crate::status::{ExecutionRecord, SyncStatusRecord, UploadStatusRecord};

/// Lower bound used when no watermark exists yet: a full sync.
pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

#[async_trait]
pub trait SyncStatusStore: Send + Sync {
    async fn get_status(
        &self,
        scope: &Scope,
        kind: EntityKind,
        key: &EntityKey,
    ) -> StoreResult<Option<SyncStatusRecord>>;

    /// Creates the row if absent, else updates it in place. `created_at` is kept.
    async fn upsert_status(&self, record: &SyncStatusRecord) -> StoreResult<()>;

    /// Writes several rows as one unit where the backend supports it.
    async fn upsert_statuses(&self, records: &[SyncStatusRecord]) -> StoreResult<()> {
        for record in records {
            self.upsert_status(record).await?;
        }
        Ok(())
    }
}

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// The stored cursor, or [`epoch`] when none exists.
    async fn get_watermark(&self, scope: &Scope, entity_type: &str) -> StoreResult<DateTime<Utc>>;

    async fn set_watermark(
        &self,
        scope: &Scope,
        entity_type: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait UploadStatusStore: Send + Sync {
    async fn get_upload(
        &self,
        scope: &Scope,
        flow: UploadFlow,
        item_id: &str,
    ) -> StoreResult<Option<UploadStatusRecord>>;

    async fn record_upload(&self, record: &UploadStatusRecord) -> StoreResult<()>;

    /// Latest completion time among successful uploads of the flow. Rows
    /// without a completion time count with their `upload_time`.
    async fn last_successful_completion(
        &self,
        scope: &Scope,
        flow: UploadFlow,
    ) -> StoreResult<Option<DateTime<Utc>>>;

    /// Rows whose last attempt failed; they still await a retry.
    async fn failed_uploads(&self, scope: &Scope, flow: UploadFlow) -> StoreResult<Vec<UploadStatusRecord>>;
}

#[async_trait]
pub trait ExecutionLog: Send + Sync {
    async fn start_execution(&self, record: &ExecutionRecord) -> StoreResult<()>;

    async fn finish_execution(&self, record: &ExecutionRecord) -> StoreResult<()>;

    /// Most recent first.
    async fn recent_executions(
        &self,
        scope: &Scope,
        job_name: &str,
        limit: usize,
    ) -> StoreResult<Vec<ExecutionRecord>>;
}
