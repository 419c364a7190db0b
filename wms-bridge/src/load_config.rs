/// `load_config` module: loads the static YAML config, injects secrets from the
/// environment, and resolves everything into a typed [`CliConfig`].
///
/// This module is the only place where untrusted YAML is parsed.
///
/// # Responsibilities
/// - Parse the YAML file into raw, defaulted structs
/// - Inject `ERP_API_TOKEN` and `WMS_API_KEY` from the environment (never from the file)
/// - Reject unknown job names in `schedule`, an empty scope list and a zero batch size
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary, where they map
/// to the configuration exit code.
use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{error, info};

use wms_bridge_core::config::EngineSettings;
use wms_bridge_core::entity::Scope;

use crate::erp::ErpClientConfig;
use crate::http::HttpSettings;
use crate::jobs::{default_interval_secs, known_job_names};
use crate::wms::WmsClientConfig;

pub const ERP_TOKEN_ENV: &str = "ERP_API_TOKEN";
pub const WMS_KEY_ENV: &str = "WMS_API_KEY";

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub database_url: String,
    pub scopes: Vec<Scope>,
    pub erp: ErpClientConfig,
    pub wms: WmsClientConfig,
    /// Interval in seconds for every known job.
    pub schedule: BTreeMap<String, u64>,
    pub tick_secs: u64,
    pub engine: EngineSettings,
}

impl CliConfig {
    pub fn interval(&self, job: &str) -> Duration {
        let secs = self
            .schedule
            .get(job)
            .copied()
            .unwrap_or_else(|| default_interval_secs(job));
        Duration::seconds(secs as i64)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default = "default_database_url")]
    database_url: String,
    scopes: Vec<String>,
    erp: RawErp,
    wms: RawWms,
    #[serde(default)]
    schedule: BTreeMap<String, u64>,
    #[serde(default = "default_tick_secs")]
    tick_secs: u64,
    #[serde(default = "default_write_batch_size")]
    write_batch_size: usize,
    #[serde(default = "default_upload_lookback_days")]
    upload_lookback_days: i64,
}

#[derive(Debug, Deserialize)]
struct RawErp {
    base_url: String,
    #[serde(default = "default_page_size")]
    page_size: usize,
    #[serde(flatten)]
    http: HttpSettings,
}

#[derive(Debug, Deserialize)]
struct RawWms {
    base_url: String,
    #[serde(flatten)]
    http: HttpSettings,
}

fn default_database_url() -> String {
    "sqlite://wms-bridge.db".to_string()
}

fn default_tick_secs() -> u64 {
    30
}

fn default_write_batch_size() -> usize {
    20
}

fn default_upload_lookback_days() -> i64 {
    7
}

fn default_page_size() -> usize {
    100
}

fn secret(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => {
            error!(env = name, "Required secret missing from environment");
            bail!("environment variable {name} must be set")
        }
    }
}

/// Loads a static YAML config file (no secrets) and injects the secrets from env.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;
    let raw: RawConfig = serde_yaml::from_str(&content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow::anyhow!("Failed to parse config YAML: {e}")
    })?;
    info!(config_path = ?path_ref, "Parsed config YAML successfully");

    resolve(raw)
}

fn resolve(raw: RawConfig) -> Result<CliConfig> {
    if raw.scopes.is_empty() {
        bail!("config must list at least one scope");
    }
    if raw.scopes.iter().any(|s| s.trim().is_empty()) {
        bail!("scope ids must not be empty");
    }
    if raw.write_batch_size == 0 {
        bail!("write_batch_size must be at least 1");
    }
    if raw.tick_secs == 0 {
        bail!("tick_secs must be at least 1");
    }
    if raw.upload_lookback_days <= 0 {
        bail!("upload_lookback_days must be positive");
    }

    let known = known_job_names();
    if let Some(unknown) = raw.schedule.keys().find(|name| !known.contains(&name.as_str())) {
        bail!(
            "unknown job '{unknown}' in schedule, expected one of: {}",
            known.join(", ")
        );
    }
    let mut schedule = BTreeMap::new();
    for name in known {
        let secs = raw
            .schedule
            .get(name)
            .copied()
            .unwrap_or_else(|| default_interval_secs(name));
        if secs == 0 {
            bail!("interval for job '{name}' must be at least one second");
        }
        schedule.insert(name.to_string(), secs);
    }

    let erp = ErpClientConfig {
        base_url: raw.erp.base_url,
        api_token: secret(ERP_TOKEN_ENV).context("ERP credentials")?,
        page_size: raw.erp.page_size.max(1),
        http: raw.erp.http,
    };
    let wms = WmsClientConfig {
        base_url: raw.wms.base_url,
        api_key: secret(WMS_KEY_ENV).context("WMS credentials")?,
        http: raw.wms.http,
    };

    let engine = EngineSettings {
        write_batch_size: raw.write_batch_size,
        upload_lookback: Duration::days(raw.upload_lookback_days),
    };
    engine.trace_loaded();

    Ok(CliConfig {
        database_url: raw.database_url,
        scopes: raw.scopes.into_iter().map(Scope::new).collect(),
        erp,
        wms,
        schedule,
        tick_secs: raw.tick_secs,
        engine,
    })
}
