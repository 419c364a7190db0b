//! Sync job: reconciles one entity kind from the ERP into the WMS.
//!
//! One generic [`SyncJob`] serves every entity kind. The kind-specific parts are
//! injected: an [`EntityMapper`] (key, projection, mapping), a [`SourceReader`],
//! a [`TargetWriter`], the status and watermark stores, and optionally an
//! [`AssetSync`] side-channel.
//!
//! # Algorithm, per run
//! 1. Lower bound: epoch when forced, else the `from` override, else the stored watermark.
//! 2. Fetch candidates within the window, capped by the limit.
//! 3. Empty fetch: done, nothing processed, watermark untouched.
//! 4. Per candidate, independently:
//!    - no key: counted as an identification error;
//!    - fingerprint equal to the stored one of a successful sync: unchanged, no writes at all;
//!    - mapping/validation failure: logged and counted, never written;
//!    - dry run: a `DryRun` status row with the new fingerprint, no remote write;
//!    - otherwise queued for the next write batch; success stores the new fingerprint,
//!      failure keeps the old one so the record is retried next run.
//! 5. Unless dry-running, advance the watermark (see [`next_watermark`]). "Now" is the
//!    clock reading taken before the fetch, so edits made while the run was writing
//!    fall inside the next run's window.
//!
//! # Error Handling
//! Per-record failures are counted in the [`JobReport`] and never abort the batch.
//! A failing fetch or status store aborts the run with a [`SyncError`]; status rows of
//! batches already written are persisted by then, and the watermark is not advanced.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::assets::{AssetState, AssetSync, NoAssets};
use crate::clock::{Clock, SystemClock};
use crate::config::RunOptions;
use crate::contract::{FetchWindow, MappedEntity, SourceReader, TargetWriter};
use crate::entity::{EntityKey, EntityKind, Scope};
use crate::error::{ContractError, RecordError, SyncError, SyncResult};
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::mapping::EntityMapper;
use crate::record::Record;
use crate::report::JobReport;
use crate::status::{SyncStatus, SyncStatusRecord};
use crate::store::{epoch, SyncStatusStore, WatermarkStore};

/// Mapped field carrying the stored asset URL.
pub const ASSET_URL_FIELD: &str = "image_url";

pub struct SyncJob {
    scope: Scope,
    mapper: Arc<dyn EntityMapper>,
    reader: Arc<dyn SourceReader>,
    writer: Arc<dyn TargetWriter>,
    statuses: Arc<dyn SyncStatusStore>,
    watermarks: Arc<dyn WatermarkStore>,
    assets: Arc<dyn AssetSync>,
    clock: Arc<dyn Clock>,
    write_batch_size: usize,
}

/// A mapped entity waiting for its write batch.
struct PendingWrite {
    key: EntityKey,
    fingerprint: Fingerprint,
    existing: Option<SyncStatusRecord>,
    mapped: MappedEntity,
    modified_at: Option<DateTime<Utc>>,
    asset: Option<AssetState>,
}

/// How far transient write failures allow the watermark to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkHold {
    Free,
    /// Cap at the earliest source timestamp among failed records.
    At(DateTime<Utc>),
    /// A failed record had no timestamp; stay put.
    Previous,
}

impl WatermarkHold {
    fn observe_failure(&mut self, modified_at: Option<DateTime<Utc>>) {
        *self = match (*self, modified_at) {
            (WatermarkHold::Previous, _) | (_, None) => WatermarkHold::Previous,
            (WatermarkHold::Free, Some(ts)) => WatermarkHold::At(ts),
            (WatermarkHold::At(held), Some(ts)) => WatermarkHold::At(held.min(ts)),
        };
    }
}

/// The watermark after a completed, non-dry run.
///
/// The later of `fetch_started` and the newest source timestamp seen, capped by the
/// fetch's upper bound and by any failure hold, and never below `previous`.
pub fn next_watermark(
    previous: DateTime<Utc>,
    fetch_started: DateTime<Utc>,
    max_seen: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    hold: WatermarkHold,
) -> DateTime<Utc> {
    let mut next = max_seen.map_or(fetch_started, |seen| seen.max(fetch_started));
    if let Some(until) = until {
        next = next.min(until);
    }
    next = match hold {
        WatermarkHold::Free => next,
        WatermarkHold::At(held) => next.min(held),
        WatermarkHold::Previous => previous,
    };
    next.max(previous)
}

/// Mutable state of one run.
struct Pass {
    report: JobReport,
    pending: Vec<PendingWrite>,
    /// Status rows not yet flushed (dry-run bookkeeping).
    rows: Vec<SyncStatusRecord>,
    max_seen: Option<DateTime<Utc>>,
    hold: WatermarkHold,
}

impl Pass {
    /// Counts a per-record failure; transient ones also hold the watermark.
    fn fail(&mut self, key: Option<String>, error: RecordError, modified_at: Option<DateTime<Utc>>) {
        if error.is_transient() {
            self.hold.observe_failure(modified_at);
        }
        self.report.fail(key, error);
    }
}

impl SyncJob {
    pub fn new(
        scope: Scope,
        mapper: Arc<dyn EntityMapper>,
        reader: Arc<dyn SourceReader>,
        writer: Arc<dyn TargetWriter>,
        statuses: Arc<dyn SyncStatusStore>,
        watermarks: Arc<dyn WatermarkStore>,
    ) -> Self {
        Self {
            scope,
            mapper,
            reader,
            writer,
            statuses,
            watermarks,
            assets: Arc::new(NoAssets),
            clock: Arc::new(SystemClock),
            write_batch_size: 20,
        }
    }

    pub fn with_assets(mut self, assets: Arc<dyn AssetSync>) -> Self {
        self.assets = assets;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_write_batch_size(mut self, size: usize) -> Self {
        self.write_batch_size = size.max(1);
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.mapper.kind()
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub async fn run(&self, options: &RunOptions) -> SyncResult<JobReport> {
        let kind = self.kind();
        let span = info_span!("sync_job", scope = %self.scope, entity = %kind);
        self.run_inner(kind, options).instrument(span).await
    }

    async fn run_inner(&self, kind: EntityKind, options: &RunOptions) -> SyncResult<JobReport> {
        let started = self.clock.now();
        let previous = self.watermarks.get_watermark(&self.scope, kind.name()).await?;
        let since = if options.force {
            epoch()
        } else {
            options.from.unwrap_or(previous)
        };
        let window = FetchWindow {
            since,
            until: options.until,
            limit: options.limit,
        };
        info!(%since, until = ?window.until, limit = ?window.limit, dry_run = options.dry_run, "fetching candidates");

        let batch = self
            .reader
            .fetch(&self.scope, kind, &window)
            .await
            .map_err(|e| {
                error!(error = %e, "source fetch failed");
                SyncError::Fetch(e.to_string())
            })?;
        let mut records = batch.records;
        let mut complete = batch.complete;
        if let Some(limit) = options.limit {
            if records.len() > limit {
                records.truncate(limit);
                complete = false;
            }
        }

        let mut pass = Pass {
            report: JobReport::new(kind.name(), &self.scope, started),
            pending: Vec::new(),
            rows: Vec::new(),
            max_seen: None,
            hold: WatermarkHold::Free,
        };
        pass.report.fetched = records.len();

        if records.is_empty() {
            info!("no candidates, nothing to do");
            return Ok(pass.report.finish(self.clock.now()));
        }

        if let Err(e) = self.reconcile(&records, options, &mut pass).await {
            // keep whatever bookkeeping was gathered before the failure
            if !pass.rows.is_empty() {
                if let Err(flush) = self.statuses.upsert_statuses(&pass.rows).await {
                    warn!(error = %flush, "could not flush status rows after fatal error");
                }
            }
            error!(error = %e, "sync run aborted");
            return Err(e);
        }

        if options.dry_run {
            info!("dry run, watermark left untouched");
        } else if !complete {
            warn!(
                fetched = records.len(),
                "candidate list was truncated, watermark held for the next run"
            );
        } else {
            let next = next_watermark(
                previous,
                started,
                pass.max_seen,
                options.until,
                pass.hold,
            );
            self.watermarks
                .set_watermark(&self.scope, kind.name(), next)
                .await?;
            pass.report.watermark = Some(next);
            debug!(%next, hold = ?pass.hold, "watermark advanced");
        }

        let report = pass.report.finish(self.clock.now());
        info!(
            outcome = ?report.outcome,
            fetched = report.fetched,
            written = report.written,
            unchanged = report.unchanged,
            dry_run = report.dry_run,
            errors = report.errors,
            "sync run finished"
        );
        Ok(report)
    }

    async fn reconcile(&self, records: &[Record], options: &RunOptions, pass: &mut Pass) -> SyncResult<()> {
        let kind = self.kind();
        for record in records {
            let modified_at = self.mapper.modified_at(record);
            if let Some(ts) = modified_at {
                pass.max_seen = Some(pass.max_seen.map_or(ts, |seen| seen.max(ts)));
            }

            let Some(key) = self.mapper.key(record) else {
                warn!("candidate without a usable key, skipped");
                pass.fail(None, RecordError::Identification, modified_at);
                continue;
            };

            let projection = self.mapper.projection(record);
            let fp = fingerprint(&projection);
            let existing = self.statuses.get_status(&self.scope, kind, &key).await?;

            if let Some(row) = &existing {
                if row.status == SyncStatus::Success && row.fingerprint.as_ref() == Some(&fp) {
                    debug!(%key, "unchanged");
                    pass.report.unchanged += 1;
                    continue;
                }
            }

            let mut mapped = match self.mapper.map(&key, &projection) {
                Ok(mapped) => mapped,
                Err(e) => {
                    warn!(%key, error = %e, "mapped record rejected");
                    pass.fail(Some(key.to_string()), e, modified_at);
                    continue;
                }
            };

            if options.dry_run {
                let now = self.clock.now();
                let mut row = existing.unwrap_or_else(|| {
                    SyncStatusRecord::first_sighting(self.scope.clone(), kind, key.clone(), now)
                });
                row.fingerprint = Some(fp);
                row.status = SyncStatus::DryRun;
                row.last_sync_time = now;
                debug!(%key, "dry run, remote write suppressed");
                pass.rows.push(row);
                pass.report.dry_run += 1;
                if pass.rows.len() >= self.write_batch_size {
                    self.statuses.upsert_statuses(&pass.rows).await?;
                    pass.rows.clear();
                }
                continue;
            }

            let asset = self.sync_asset(record, existing.as_ref(), &mut mapped).await;
            pass.pending.push(PendingWrite {
                key,
                fingerprint: fp,
                existing,
                mapped,
                modified_at,
                asset,
            });
            if pass.pending.len() >= self.write_batch_size {
                self.write_pending(pass).await?;
            }
        }

        self.write_pending(pass).await?;
        if !pass.rows.is_empty() {
            self.statuses.upsert_statuses(&pass.rows).await?;
            pass.rows.clear();
        }
        Ok(())
    }

    /// Runs the asset side-channel and injects the resulting URL into the payload.
    /// Failures keep the previously stored asset.
    async fn sync_asset(
        &self,
        record: &Record,
        existing: Option<&SyncStatusRecord>,
        mapped: &mut MappedEntity,
    ) -> Option<AssetState> {
        let previous = existing.and_then(|row| match (&row.asset_url, &row.asset_hash) {
            (Some(url), Some(hash)) => Some(AssetState {
                url: url.clone(),
                hash: hash.clone(),
            }),
            _ => None,
        });
        let state = match self.mapper.asset_url(record) {
            Some(source_url) => match self
                .assets
                .sync_asset(&self.scope, &source_url, previous.clone())
                .await
            {
                Ok(state) => state,
                Err(e) => {
                    warn!(key = %mapped.key, error = %e, "asset sync failed, keeping previous asset");
                    previous
                }
            },
            None => previous,
        };
        if let (Some(state), Some(payload)) = (&state, mapped.payload.as_object_mut()) {
            payload.insert(
                ASSET_URL_FIELD.to_string(),
                serde_json::Value::String(state.url.clone()),
            );
        }
        state
    }

    async fn write_pending(&self, pass: &mut Pass) -> SyncResult<()> {
        if pass.pending.is_empty() {
            return Ok(());
        }
        let kind = self.kind();
        let entities: Vec<MappedEntity> = pass.pending.iter().map(|p| p.mapped.clone()).collect();
        let results = self.writer.upsert_batch(&self.scope, kind, &entities).await;
        if results.len() != entities.len() {
            warn!(
                expected = entities.len(),
                got = results.len(),
                "writer returned a short result list, missing results count as failures"
            );
        }

        let now = self.clock.now();
        let mut results = results.into_iter();
        let mut rows = Vec::with_capacity(entities.len());
        for pending in std::mem::take(&mut pass.pending) {
            let result: Result<(), ContractError> = results
                .next()
                .unwrap_or_else(|| Err("no result reported for entity".into()));
            let mut row = pending.existing.unwrap_or_else(|| {
                SyncStatusRecord::first_sighting(self.scope.clone(), kind, pending.key.clone(), now)
            });
            row.last_sync_time = now;
            match result {
                Ok(()) => {
                    debug!(key = %pending.key, "written");
                    row.fingerprint = Some(pending.fingerprint);
                    row.status = SyncStatus::Success;
                    row.last_remote_sync_time = Some(now);
                    if let Some(asset) = pending.asset {
                        row.asset_url = Some(asset.url);
                        row.asset_hash = Some(asset.hash);
                    }
                    pass.report.written += 1;
                }
                Err(e) => {
                    warn!(key = %pending.key, error = %e, "write failed, will retry next run");
                    // fingerprint stays at the last successful content
                    row.status = SyncStatus::Failed;
                    pass.fail(
                        Some(pending.key.to_string()),
                        RecordError::Write(e.to_string()),
                        pending.modified_at,
                    );
                }
            }
            rows.push(row);
        }
        self.statuses.upsert_statuses(&rows).await?;
        Ok(())
    }
}
