//! Upload job: pushes completed WMS work back into the ERP as documents.
//!
//! Shipped orders become goods deliveries and received deliveries become
//! purchase receipts. Each item is keyed by its WMS id in the flow's upload
//! status table; an item with a successful row is never submitted again.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::clock::{Clock, SystemClock};
use crate::config::RunOptions;
use crate::contract::{CompletedItem, CompletedItemSource, DocumentSink};
use crate::entity::{Scope, UploadFlow};
use crate::error::{RecordError, SyncError, SyncResult};
use crate::mapping::{upload_profile, UploadProfile};
use crate::report::JobReport;
use crate::status::{UploadStatus, UploadStatusRecord};
use crate::store::UploadStatusStore;

pub struct UploadJob {
    scope: Scope,
    profile: &'static UploadProfile,
    source: Arc<dyn CompletedItemSource>,
    sink: Arc<dyn DocumentSink>,
    uploads: Arc<dyn UploadStatusStore>,
    clock: Arc<dyn Clock>,
    lookback: Duration,
}

impl UploadJob {
    pub fn new(
        scope: Scope,
        flow: UploadFlow,
        source: Arc<dyn CompletedItemSource>,
        sink: Arc<dyn DocumentSink>,
        uploads: Arc<dyn UploadStatusStore>,
    ) -> Self {
        Self {
            scope,
            profile: upload_profile(flow),
            source,
            sink,
            uploads,
            clock: Arc::new(SystemClock),
            lookback: Duration::days(7),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn flow(&self) -> UploadFlow {
        self.profile.flow
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub async fn run(&self, options: &RunOptions) -> SyncResult<JobReport> {
        let span = info_span!("upload_job", scope = %self.scope, flow = %self.flow());
        self.run_inner(options).instrument(span).await
    }

    /// Start of the poll window: the override, else the newest completion time
    /// among successful uploads, else the lookback period.
    ///
    /// Failed items pull the window back to their own completion time so the
    /// WMS returns them again. A failed item without one falls back to the
    /// lookback.
    async fn poll_since(&self, options: &RunOptions, now: DateTime<Utc>) -> SyncResult<DateTime<Utc>> {
        if let Some(from) = options.from {
            return Ok(from);
        }
        let lookback = now - self.lookback;
        if options.force {
            return Ok(lookback);
        }
        let mut since = self
            .uploads
            .last_successful_completion(&self.scope, self.flow())
            .await?;
        for failed in self.uploads.failed_uploads(&self.scope, self.flow()).await? {
            let retry_from = failed.completed_at.unwrap_or(lookback);
            since = Some(since.map_or(retry_from, |s| s.min(retry_from)));
        }
        Ok(since.unwrap_or(lookback))
    }

    async fn run_inner(&self, options: &RunOptions) -> SyncResult<JobReport> {
        let flow = self.flow();
        let started = self.clock.now();
        let mut report = JobReport::new(flow.name(), &self.scope, started);

        let since = self.poll_since(options, started).await?;
        info!(%since, dry_run = options.dry_run, "[UPLOAD] Polling completed items");
        let mut items = self
            .source
            .poll_completed(&self.scope, flow, since)
            .await
            .map_err(|e| {
                error!(error = %e, "[UPLOAD][ERROR] Poll failed");
                SyncError::Upload(e.to_string())
            })?;
        if let Some(until) = options.until {
            items.retain(|item| item.completed_at.map_or(true, |at| at <= until));
        }
        if let Some(limit) = options.limit {
            items.truncate(limit);
        }
        report.fetched = items.len();

        for item in &items {
            self.upload_one(item, options, &mut report).await?;
        }

        let report = report.finish(self.clock.now());
        info!(
            outcome = ?report.outcome,
            fetched = report.fetched,
            uploaded = report.written,
            skipped = report.unchanged,
            errors = report.errors,
            "[UPLOAD] Run finished"
        );
        Ok(report)
    }

    async fn upload_one(
        &self,
        item: &CompletedItem,
        options: &RunOptions,
        report: &mut JobReport,
    ) -> SyncResult<()> {
        let flow = self.flow();
        if item.item_id.trim().is_empty() {
            warn!("[UPLOAD] Completed item without an id, skipped");
            report.fail(None, RecordError::Identification);
            return Ok(());
        }

        let existing = self.uploads.get_upload(&self.scope, flow, &item.item_id).await?;
        if matches!(&existing, Some(row) if row.status == UploadStatus::Success) {
            debug!(item_id = %item.item_id, "[UPLOAD] Already uploaded");
            report.unchanged += 1;
            if !options.dry_run {
                // an earlier mark may have failed; the item keeps showing up until it sticks
                self.mark_processed(&item.item_id).await;
            }
            return Ok(());
        }

        let document = match self.profile.map(&item.record) {
            Ok(document) => document,
            Err(e) => {
                warn!(item_id = %item.item_id, error = %e, "[UPLOAD] Document rejected");
                if !options.dry_run {
                    self.record(item, UploadStatus::Failed, Some(e.to_string()), None)
                        .await?;
                }
                report.fail(Some(item.item_id.clone()), e);
                return Ok(());
            }
        };

        if options.dry_run {
            debug!(item_id = %item.item_id, "[UPLOAD] Dry run, submission suppressed");
            report.dry_run += 1;
            return Ok(());
        }

        match self.sink.submit(&self.scope, flow, &document).await {
            Ok(document_id) => {
                info!(item_id = %item.item_id, %document_id, "[UPLOAD] Document created");
                self.record(item, UploadStatus::Success, None, Some(document_id))
                    .await?;
                report.written += 1;
                self.mark_processed(&item.item_id).await;
            }
            Err(e) => {
                warn!(item_id = %item.item_id, error = %e, "[UPLOAD][ERROR] Submission failed");
                self.record(item, UploadStatus::Failed, Some(e.to_string()), None)
                    .await?;
                report.fail(Some(item.item_id.clone()), RecordError::Write(e.to_string()));
            }
        }
        Ok(())
    }

    async fn record(
        &self,
        item: &CompletedItem,
        status: UploadStatus,
        error_message: Option<String>,
        remote_document_id: Option<String>,
    ) -> SyncResult<()> {
        let row = UploadStatusRecord {
            scope: self.scope.clone(),
            flow: self.flow(),
            item_id: item.item_id.clone(),
            completed_at: item.completed_at,
            upload_time: self.clock.now(),
            status,
            error_message,
            remote_document_id,
        };
        self.uploads.record_upload(&row).await?;
        Ok(())
    }

    async fn mark_processed(&self, item_id: &str) {
        if let Err(e) = self
            .source
            .mark_processed(&self.scope, self.flow(), item_id)
            .await
        {
            warn!(%item_id, error = %e, "[UPLOAD] Could not mark item processed");
        }
    }
}
