use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Per-invocation modifiers for a job run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Read, compare and map, but never write remotely.
    pub dry_run: bool,
    /// Evaluate at most this many candidates.
    pub limit: Option<usize>,
    /// Overrides the stored watermark as the lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Upper bound for deterministic backfills.
    pub until: Option<DateTime<Utc>>,
    /// Ignore the watermark and resync from the epoch.
    pub force: bool,
}

impl RunOptions {
    pub fn trace_loaded(&self) {
        info!(
            dry_run = self.dry_run,
            limit = ?self.limit,
            from = ?self.from,
            until = ?self.until,
            force = self.force,
            "Run options"
        );
    }
}

/// Engine knobs shared by all jobs of a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Entities per `upsert_batch` call.
    pub write_batch_size: usize,
    /// How far back the upload poll starts when no upload ever succeeded.
    pub upload_lookback: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            write_batch_size: 20,
            upload_lookback: Duration::days(7),
        }
    }
}

impl EngineSettings {
    pub fn trace_loaded(&self) {
        info!(
            write_batch_size = self.write_batch_size,
            upload_lookback_hours = self.upload_lookback.num_hours(),
            "Loaded engine settings"
        );
        debug!(?self, "Engine settings (full debug)");
    }
}
