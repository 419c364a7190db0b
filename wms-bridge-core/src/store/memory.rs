use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{epoch, ExecutionLog, SyncStatusStore, UploadStatusStore, WatermarkStore};
use crate::entity::{EntityKey, EntityKind, Scope, UploadFlow};
use crate::error::StoreResult;
use crate::status::{ExecutionRecord, SyncStatusRecord, UploadStatus, UploadStatusRecord};

#[derive(Default)]
struct Inner {
    statuses: HashMap<(Scope, EntityKind, EntityKey), SyncStatusRecord>,
    watermarks: HashMap<(Scope, String), DateTime<Utc>>,
    uploads: HashMap<(Scope, UploadFlow, String), UploadStatusRecord>,
    executions: Vec<ExecutionRecord>,
    status_writes: usize,
}

/// Process-local store used by tests and by dry-run tooling.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Number of status rows written since creation.
    pub fn status_writes(&self) -> usize {
        self.lock().status_writes
    }

    pub fn statuses(&self, scope: &Scope, kind: EntityKind) -> Vec<SyncStatusRecord> {
        let mut rows: Vec<_> = self
            .lock()
            .statuses
            .values()
            .filter(|r| &r.scope == scope && r.kind == kind)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }

    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.lock().executions.clone()
    }
}

#[async_trait]
impl SyncStatusStore for MemoryStore {
    async fn get_status(
        &self,
        scope: &Scope,
        kind: EntityKind,
        key: &EntityKey,
    ) -> StoreResult<Option<SyncStatusRecord>> {
        Ok(self
            .lock()
            .statuses
            .get(&(scope.clone(), kind, key.clone()))
            .cloned())
    }

    async fn upsert_status(&self, record: &SyncStatusRecord) -> StoreResult<()> {
        let mut inner = self.lock();
        let id = (record.scope.clone(), record.kind, record.key.clone());
        let mut row = record.clone();
        if let Some(existing) = inner.statuses.get(&id) {
            row.created_at = existing.created_at;
        }
        inner.statuses.insert(id, row);
        inner.status_writes += 1;
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for MemoryStore {
    async fn get_watermark(&self, scope: &Scope, entity_type: &str) -> StoreResult<DateTime<Utc>> {
        Ok(self
            .lock()
            .watermarks
            .get(&(scope.clone(), entity_type.to_string()))
            .copied()
            .unwrap_or_else(epoch))
    }

    async fn set_watermark(
        &self,
        scope: &Scope,
        entity_type: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.lock()
            .watermarks
            .insert((scope.clone(), entity_type.to_string()), at);
        Ok(())
    }
}

#[async_trait]
impl UploadStatusStore for MemoryStore {
    async fn get_upload(
        &self,
        scope: &Scope,
        flow: UploadFlow,
        item_id: &str,
    ) -> StoreResult<Option<UploadStatusRecord>> {
        Ok(self
            .lock()
            .uploads
            .get(&(scope.clone(), flow, item_id.to_string()))
            .cloned())
    }

    async fn record_upload(&self, record: &UploadStatusRecord) -> StoreResult<()> {
        self.lock().uploads.insert(
            (record.scope.clone(), record.flow, record.item_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn last_successful_completion(
        &self,
        scope: &Scope,
        flow: UploadFlow,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self
            .lock()
            .uploads
            .values()
            .filter(|r| &r.scope == scope && r.flow == flow && r.status == UploadStatus::Success)
            .map(|r| r.completed_at.unwrap_or(r.upload_time))
            .max())
    }

    async fn failed_uploads(&self, scope: &Scope, flow: UploadFlow) -> StoreResult<Vec<UploadStatusRecord>> {
        let mut rows: Vec<UploadStatusRecord> = self
            .lock()
            .uploads
            .values()
            .filter(|r| &r.scope == scope && r.flow == flow && r.status == UploadStatus::Failed)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        Ok(rows)
    }
}

#[async_trait]
impl ExecutionLog for MemoryStore {
    async fn start_execution(&self, record: &ExecutionRecord) -> StoreResult<()> {
        self.lock().executions.push(record.clone());
        Ok(())
    }

    async fn finish_execution(&self, record: &ExecutionRecord) -> StoreResult<()> {
        let mut inner = self.lock();
        match inner.executions.iter_mut().find(|e| e.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => inner.executions.push(record.clone()),
        }
        Ok(())
    }

    async fn recent_executions(
        &self,
        scope: &Scope,
        job_name: &str,
        limit: usize,
    ) -> StoreResult<Vec<ExecutionRecord>> {
        let mut rows: Vec<_> = self
            .lock()
            .executions
            .iter()
            .filter(|e| &e.scope == scope && e.job_name == job_name)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        rows.truncate(limit);
        Ok(rows)
    }
}
