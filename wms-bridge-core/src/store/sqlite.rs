use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, Row, Sqlite};
use std::str::FromStr;
use uuid::Uuid;

use super::{epoch, ExecutionLog, SyncStatusStore, UploadStatusStore, WatermarkStore};
use crate::entity::{EntityKey, EntityKind, Scope, UploadFlow};
use crate::error::{StoreError, StoreResult};
use crate::fingerprint::Fingerprint;
use crate::status::{
    ExecutionRecord, ExecutionStatus, SyncStatus, SyncStatusRecord, UploadStatus,
    UploadStatusRecord,
};

const UPLOAD_COLUMNS: &str =
    "scope, item_id, completed_at, upload_time, status, error_message, remote_document_id";

/// SQLite-backed implementation of every bookkeeping store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if missing) the database at `database_url`.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        tracing::info!("connecting to sync state database");
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// A private in-memory database with its schema in place.
    pub async fn in_memory() -> StoreResult<Self> {
        // one connection that never recycles, or the database vanishes with it
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Creates all tables if they do not exist. Safe to call on every start.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        for kind in EntityKind::ALL {
            let sql = format!(
                "create table if not exists {} (
                   scope text not null,
                   entity_key text not null,
                   fingerprint text,
                   status text not null,
                   last_sync_time text not null,
                   last_remote_sync_time text,
                   created_at text not null,
                   asset_url text,
                   asset_hash text,
                   primary key (scope, entity_key)
                 )",
                kind.status_table()
            );
            sqlx::query(&sql).execute(&self.pool).await?;
        }

        sqlx::query(
            "create table if not exists sync_watermarks (
               scope text not null,
               entity_type text not null,
               last_sync_time text not null,
               unique (scope, entity_type)
             )",
        )
        .execute(&self.pool)
        .await?;

        for flow in UploadFlow::ALL {
            let sql = format!(
                "create table if not exists {} (
                   scope text not null,
                   item_id text not null,
                   completed_at text,
                   upload_time text not null,
                   status text not null,
                   error_message text,
                   remote_document_id text,
                   primary key (scope, item_id)
                 )",
                flow.status_table()
            );
            sqlx::query(&sql).execute(&self.pool).await?;
        }

        sqlx::query(
            "create table if not exists job_executions (
               id text primary key,
               scope text not null,
               job_name text not null,
               started_at text not null,
               finished_at text,
               records_processed integer not null default 0,
               error_count integer not null default 0,
               status text not null,
               message text
             )",
        )
        .execute(&self.pool)
        .await?;

        tracing::debug!("sync state schema ensured");
        Ok(())
    }

    fn map_status_row(row: &SqliteRow, kind: EntityKind) -> StoreResult<SyncStatusRecord> {
        let raw_status: String = row.try_get("status")?;
        let status = SyncStatus::parse(&raw_status).ok_or_else(|| StoreError::Corrupt {
            table: kind.status_table().to_string(),
            reason: format!("unknown status {raw_status:?}"),
        })?;
        let fingerprint: Option<String> = row.try_get("fingerprint")?;
        Ok(SyncStatusRecord {
            scope: Scope::new(row.try_get::<String, _>("scope")?),
            kind,
            key: EntityKey::from_parts([row.try_get::<String, _>("entity_key")?]).ok_or_else(
                || StoreError::Corrupt {
                    table: kind.status_table().to_string(),
                    reason: "empty entity key".to_string(),
                },
            )?,
            fingerprint: fingerprint.map(Fingerprint::from_stored),
            status,
            last_sync_time: row.try_get("last_sync_time")?,
            last_remote_sync_time: row.try_get("last_remote_sync_time")?,
            created_at: row.try_get("created_at")?,
            asset_url: row.try_get("asset_url")?,
            asset_hash: row.try_get("asset_hash")?,
        })
    }

    fn map_upload_row(row: &SqliteRow, flow: UploadFlow) -> StoreResult<UploadStatusRecord> {
        let raw_status: String = row.try_get("status")?;
        let status = UploadStatus::parse(&raw_status).ok_or_else(|| StoreError::Corrupt {
            table: flow.status_table().to_string(),
            reason: format!("unknown status {raw_status:?}"),
        })?;
        Ok(UploadStatusRecord {
            scope: Scope::new(row.try_get::<String, _>("scope")?),
            flow,
            item_id: row.try_get("item_id")?,
            completed_at: row.try_get("completed_at")?,
            upload_time: row.try_get("upload_time")?,
            status,
            error_message: row.try_get("error_message")?,
            remote_document_id: row.try_get("remote_document_id")?,
        })
    }

    fn map_execution_row(row: &SqliteRow) -> StoreResult<ExecutionRecord> {
        let corrupt = |reason: String| StoreError::Corrupt {
            table: "job_executions".to_string(),
            reason,
        };
        let raw_id: String = row.try_get("id")?;
        let raw_status: String = row.try_get("status")?;
        Ok(ExecutionRecord {
            id: Uuid::parse_str(&raw_id).map_err(|e| corrupt(format!("bad id {raw_id:?}: {e}")))?,
            scope: Scope::new(row.try_get::<String, _>("scope")?),
            job_name: row.try_get("job_name")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            records_processed: row.try_get::<i64, _>("records_processed")?.max(0) as u64,
            error_count: row.try_get::<i64, _>("error_count")?.max(0) as u64,
            status: ExecutionStatus::parse(&raw_status)
                .ok_or_else(|| corrupt(format!("unknown status {raw_status:?}")))?,
            message: row.try_get("message")?,
        })
    }
}

async fn write_status<'c, E>(executor: E, record: &SyncStatusRecord) -> StoreResult<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    let sql = format!(
        "insert into {}
         (scope, entity_key, fingerprint, status, last_sync_time, last_remote_sync_time,
          created_at, asset_url, asset_hash)
         values (?, ?, ?, ?, ?, ?, ?, ?, ?)
         on conflict (scope, entity_key) do update set
           fingerprint = excluded.fingerprint,
           status = excluded.status,
           last_sync_time = excluded.last_sync_time,
           last_remote_sync_time = excluded.last_remote_sync_time,
           asset_url = excluded.asset_url,
           asset_hash = excluded.asset_hash",
        record.kind.status_table()
    );
    sqlx::query(&sql)
        .bind(record.scope.as_str())
        .bind(record.key.as_str())
        .bind(record.fingerprint.as_ref().map(Fingerprint::as_str))
        .bind(record.status.as_str())
        .bind(record.last_sync_time)
        .bind(record.last_remote_sync_time)
        .bind(record.created_at)
        .bind(record.asset_url.as_deref())
        .bind(record.asset_hash.as_deref())
        .execute(executor)
        .await?;
    Ok(())
}

#[async_trait]
impl SyncStatusStore for SqliteStore {
    async fn get_status(
        &self,
        scope: &Scope,
        kind: EntityKind,
        key: &EntityKey,
    ) -> StoreResult<Option<SyncStatusRecord>> {
        let sql = format!(
            "select scope, entity_key, fingerprint, status, last_sync_time,
                    last_remote_sync_time, created_at, asset_url, asset_hash
             from {} where scope = ? and entity_key = ?",
            kind.status_table()
        );
        let row = sqlx::query(&sql)
            .bind(scope.as_str())
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::map_status_row(&r, kind)).transpose()
    }

    async fn upsert_status(&self, record: &SyncStatusRecord) -> StoreResult<()> {
        write_status(&self.pool, record).await
    }

    async fn upsert_statuses(&self, records: &[SyncStatusRecord]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for record in records {
            write_status(&mut *tx, record).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for SqliteStore {
    async fn get_watermark(&self, scope: &Scope, entity_type: &str) -> StoreResult<DateTime<Utc>> {
        let row = sqlx::query(
            "select last_sync_time from sync_watermarks where scope = ? and entity_type = ?",
        )
        .bind(scope.as_str())
        .bind(entity_type)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(r) => Ok(r.try_get("last_sync_time")?),
            None => Ok(epoch()),
        }
    }

    async fn set_watermark(
        &self,
        scope: &Scope,
        entity_type: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "insert into sync_watermarks (scope, entity_type, last_sync_time)
             values (?, ?, ?)
             on conflict (scope, entity_type) do update set
               last_sync_time = excluded.last_sync_time",
        )
        .bind(scope.as_str())
        .bind(entity_type)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl UploadStatusStore for SqliteStore {
    async fn get_upload(
        &self,
        scope: &Scope,
        flow: UploadFlow,
        item_id: &str,
    ) -> StoreResult<Option<UploadStatusRecord>> {
        let sql = format!(
            "select {UPLOAD_COLUMNS} from {} where scope = ? and item_id = ?",
            flow.status_table()
        );
        let row = sqlx::query(&sql)
            .bind(scope.as_str())
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::map_upload_row(&r, flow)).transpose()
    }

    async fn record_upload(&self, record: &UploadStatusRecord) -> StoreResult<()> {
        let sql = format!(
            "insert into {}
             ({UPLOAD_COLUMNS})
             values (?, ?, ?, ?, ?, ?, ?)
             on conflict (scope, item_id) do update set
               completed_at = excluded.completed_at,
               upload_time = excluded.upload_time,
               status = excluded.status,
               error_message = excluded.error_message,
               remote_document_id = excluded.remote_document_id",
            record.flow.status_table()
        );
        sqlx::query(&sql)
            .bind(record.scope.as_str())
            .bind(&record.item_id)
            .bind(record.completed_at)
            .bind(record.upload_time)
            .bind(record.status.as_str())
            .bind(record.error_message.as_deref())
            .bind(record.remote_document_id.as_deref())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn last_successful_completion(
        &self,
        scope: &Scope,
        flow: UploadFlow,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let sql = format!(
            "select coalesce(completed_at, upload_time) as cursor from {}
             where scope = ? and status = ?
             order by cursor desc limit 1",
            flow.status_table()
        );
        let row = sqlx::query(&sql)
            .bind(scope.as_str())
            .bind(UploadStatus::Success.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Ok(Some(r.try_get("cursor")?)),
            None => Ok(None),
        }
    }

    async fn failed_uploads(&self, scope: &Scope, flow: UploadFlow) -> StoreResult<Vec<UploadStatusRecord>> {
        let sql = format!(
            "select {UPLOAD_COLUMNS} from {} where scope = ? and status = ? order by item_id",
            flow.status_table()
        );
        let rows = sqlx::query(&sql)
            .bind(scope.as_str())
            .bind(UploadStatus::Failed.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| Self::map_upload_row(r, flow)).collect()
    }
}

#[async_trait]
impl ExecutionLog for SqliteStore {
    async fn start_execution(&self, record: &ExecutionRecord) -> StoreResult<()> {
        sqlx::query(
            "insert into job_executions
             (id, scope, job_name, started_at, finished_at, records_processed, error_count,
              status, message)
             values (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.scope.as_str())
        .bind(&record.job_name)
        .bind(record.started_at)
        .bind(record.finished_at)
        .bind(record.records_processed as i64)
        .bind(record.error_count as i64)
        .bind(record.status.as_str())
        .bind(record.message.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_execution(&self, record: &ExecutionRecord) -> StoreResult<()> {
        sqlx::query(
            "update job_executions
             set finished_at = ?, records_processed = ?, error_count = ?, status = ?, message = ?
             where id = ?",
        )
        .bind(record.finished_at)
        .bind(record.records_processed as i64)
        .bind(record.error_count as i64)
        .bind(record.status.as_str())
        .bind(record.message.as_deref())
        .bind(record.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_executions(
        &self,
        scope: &Scope,
        job_name: &str,
        limit: usize,
    ) -> StoreResult<Vec<ExecutionRecord>> {
        let rows = sqlx::query(
            "select id, scope, job_name, started_at, finished_at, records_processed,
                    error_count, status, message
             from job_executions
             where scope = ? and job_name = ?
             order by started_at desc
             limit ?",
        )
        .bind(scope.as_str())
        .bind(job_name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::map_execution_row).collect()
    }
}
