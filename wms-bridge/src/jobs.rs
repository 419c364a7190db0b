//! Job registry: wires the HTTP clients and the SQLite store into one sync
//! job per (scope, entity kind) and one upload job per (scope, upload flow).

use anyhow::{Context, Result};
use std::sync::Arc;

use wms_bridge_core::assets::{AssetSync, ContentAddressedAssets};
use wms_bridge_core::entity::{EntityKind, Scope, UploadFlow};
use wms_bridge_core::mapping::entity_profile;
use wms_bridge_core::scheduler::Scheduler;
use wms_bridge_core::store::SqliteStore;
use wms_bridge_core::synchronise::SyncJob;
use wms_bridge_core::uploader::UploadJob;

use crate::erp::ErpClient;
use crate::load_config::CliConfig;
use crate::wms::WmsClient;

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_UPLOAD_INTERVAL_SECS: u64 = 120;

/// Every job name, in the order jobs run within a scope. Item groups precede
/// items so that group references resolve.
pub fn known_job_names() -> Vec<&'static str> {
    EntityKind::ALL
        .iter()
        .map(|kind| kind.name())
        .chain(UploadFlow::ALL.iter().map(|flow| flow.name()))
        .collect()
}

pub fn default_interval_secs(job: &str) -> u64 {
    if UploadFlow::from_name(job).is_some() {
        DEFAULT_UPLOAD_INTERVAL_SECS
    } else {
        DEFAULT_SYNC_INTERVAL_SECS
    }
}

pub async fn open_store(database_url: &str) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::connect(database_url)
        .await
        .with_context(|| format!("cannot open sync state database {database_url}"))?;
    store
        .ensure_schema()
        .await
        .context("cannot create sync state schema")?;
    Ok(Arc::new(store))
}

/// Registers every job for each of `scopes`.
pub fn build_scheduler(config: &CliConfig, scopes: &[Scope], store: Arc<SqliteStore>) -> Result<Scheduler> {
    let erp = ErpClient::new(config.erp.clone()).context("cannot build ERP client")?;
    let wms = WmsClient::new(config.wms.clone()).context("cannot build WMS client")?;
    let assets: Arc<dyn AssetSync> = Arc::new(ContentAddressedAssets::new(erp.clone(), wms.clone()));
    let erp = Arc::new(erp);
    let wms = Arc::new(wms);

    let mut scheduler = Scheduler::new().with_execution_log(store.clone());
    for scope in scopes {
        for kind in EntityKind::ALL {
            let profile = entity_profile(kind);
            let mut job = SyncJob::new(
                scope.clone(),
                Arc::new(*profile),
                erp.clone(),
                wms.clone(),
                store.clone(),
                store.clone(),
            )
            .with_write_batch_size(config.engine.write_batch_size);
            if profile.asset_field.is_some() {
                job = job.with_assets(assets.clone());
            }
            scheduler.register(Arc::new(job), config.interval(kind.name()));
        }
        for flow in UploadFlow::ALL {
            let job = UploadJob::new(scope.clone(), flow, wms.clone(), erp.clone(), store.clone())
                .with_lookback(config.engine.upload_lookback);
            scheduler.register(Arc::new(job), config.interval(flow.name()));
        }
    }
    Ok(scheduler)
}
