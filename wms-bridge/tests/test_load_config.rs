use serial_test::serial;
use std::env;
use std::fs::write;
use tempfile::NamedTempFile;

use wms_bridge::jobs::{DEFAULT_SYNC_INTERVAL_SECS, DEFAULT_UPLOAD_INTERVAL_SECS};
use wms_bridge::load_config::load_config;
use wms_bridge_core::entity::Scope;

fn config_file(yaml: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), yaml).unwrap();
    file
}

fn set_secrets() {
    env::set_var("ERP_API_TOKEN", "erp-token");
    env::set_var("WMS_API_KEY", "wms-key");
}

const MINIMAL: &str = r#"
scopes: ["2001"]
erp:
  base_url: https://erp.example.com/api
wms:
  base_url: https://wms.example.com/api
"#;

/// A config with only the required keys gets defaults for everything else.
#[tokio::test]
#[serial]
async fn test_load_config_minimal_uses_defaults() {
    set_secrets();
    let file = config_file(MINIMAL);

    let config = load_config(file.path()).expect("Config should load");

    assert_eq!(config.scopes, vec![Scope::new("2001")]);
    assert_eq!(config.database_url, "sqlite://wms-bridge.db");
    assert_eq!(config.erp.api_token, "erp-token");
    assert_eq!(config.wms.api_key, "wms-key");
    assert_eq!(config.erp.page_size, 100);
    assert_eq!(config.erp.http.max_retries, 3);
    assert_eq!(config.engine.write_batch_size, 20);
    assert_eq!(config.engine.upload_lookback, chrono::Duration::days(7));
    assert_eq!(
        config.interval("items"),
        chrono::Duration::seconds(DEFAULT_SYNC_INTERVAL_SECS as i64)
    );
    assert_eq!(
        config.interval("shipments"),
        chrono::Duration::seconds(DEFAULT_UPLOAD_INTERVAL_SECS as i64)
    );
}

#[tokio::test]
#[serial]
async fn test_load_config_full() {
    set_secrets();
    let file = config_file(
        r#"
database_url: sqlite:///var/lib/wms-bridge/state.db
scopes: ["2001", "2002"]
erp:
  base_url: https://erp.example.com/api
  page_size: 250
  timeout_secs: 10
  max_retries: 5
wms:
  base_url: https://wms.example.com/api
tick_secs: 15
write_batch_size: 50
upload_lookback_days: 3
schedule:
  items: 600
  receipts: 60
"#,
    );

    let config = load_config(file.path()).expect("Config should load");

    assert_eq!(config.scopes.len(), 2);
    assert_eq!(config.erp.page_size, 250);
    assert_eq!(config.erp.http.timeout_secs, 10);
    assert_eq!(config.erp.http.max_retries, 5);
    assert_eq!(config.tick_secs, 15);
    assert_eq!(config.engine.write_batch_size, 50);
    assert_eq!(config.engine.upload_lookback, chrono::Duration::days(3));
    assert_eq!(config.interval("items"), chrono::Duration::seconds(600));
    assert_eq!(config.interval("receipts"), chrono::Duration::seconds(60));
}

#[tokio::test]
#[serial]
async fn test_load_config_rejects_unknown_job() {
    set_secrets();
    let file = config_file(&format!("{MINIMAL}schedule:\n  pallets: 60\n"));

    let err = load_config(file.path()).unwrap_err();

    assert!(err.to_string().contains("unknown job 'pallets'"));
}

#[tokio::test]
#[serial]
async fn test_load_config_requires_secrets() {
    set_secrets();
    env::remove_var("WMS_API_KEY");
    let file = config_file(MINIMAL);

    let err = load_config(file.path()).unwrap_err();

    assert!(format!("{err:#}").contains("WMS_API_KEY"));
    set_secrets();
}

#[tokio::test]
#[serial]
async fn test_load_config_rejects_empty_scopes_and_bad_yaml() {
    set_secrets();
    let empty = config_file(
        "scopes: []\nerp:\n  base_url: http://erp\nwms:\n  base_url: http://wms\n",
    );
    assert!(load_config(empty.path()).is_err());

    let broken = config_file("scopes: [\n");
    let err = load_config(broken.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config YAML"));
}

#[test]
fn test_load_config_missing_file() {
    let err = load_config("/nonexistent/wms-bridge.yaml").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
