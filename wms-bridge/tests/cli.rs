use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use tracing::field::{Field, Visit};
use tracing_subscriber::prelude::*; // needed for .with()
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Creates a minimal config file for the CLI to read.
fn create_minimal_config() -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    write(
        config.path(),
        b"scopes: [\"2001\"]\nerp:\n  base_url: http://127.0.0.1:9/erp\nwms:\n  base_url: http://127.0.0.1:9/wms\n",
    )
    .expect("Writing temp config failed");
    config
}

#[test]
fn jobs_lists_every_job_name() {
    let mut cmd = Command::cargo_bin("wms-bridge").expect("Binary exists");
    cmd.arg("jobs");
    cmd.assert().success().stdout(
        predicate::str::contains("item_groups")
            .and(predicate::str::contains("purchase_orders"))
            .and(predicate::str::contains("shipments"))
            .and(predicate::str::contains("receipts")),
    );
}

#[test]
fn help_describes_run_modifiers() {
    let mut cmd = Command::cargo_bin("wms-bridge").expect("Binary exists");
    cmd.args(["run", "--help"]);
    cmd.assert().success().stdout(
        predicate::str::contains("--dry-run")
            .and(predicate::str::contains("--limit"))
            .and(predicate::str::contains("--force")),
    );
}

#[test]
fn missing_config_exits_with_configuration_code() {
    let mut cmd = Command::cargo_bin("wms-bridge").expect("Binary exists");
    cmd.args(["run", "--config", "/nonexistent/wms-bridge.yaml", "--operation", "items"]);
    cmd.assert()
        .code(3)
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn unknown_operation_exits_with_configuration_code() {
    let config = create_minimal_config();
    let mut cmd = Command::cargo_bin("wms-bridge").expect("Binary exists");
    cmd.arg("run")
        .arg("--config")
        .arg(config.path())
        .args(["--operation", "pallets"])
        .env("ERP_API_TOKEN", "erp-token")
        .env("WMS_API_KEY", "wms-key");
    cmd.assert()
        .code(3)
        .stderr(predicate::str::contains("unknown operation 'pallets'"));
}

#[test]
fn malformed_date_is_a_usage_error() {
    let config = create_minimal_config();
    let mut cmd = Command::cargo_bin("wms-bridge").expect("Binary exists");
    cmd.arg("run")
        .arg("--config")
        .arg(config.path())
        .args(["--from", "last tuesday"]);
    cmd.assert()
        .code(3)
        .stderr(predicate::str::contains("is not a date"));
}

#[test]
fn window_modifiers_are_rejected_in_the_scheduler_loop() {
    let config = create_minimal_config();
    let mut cmd = Command::cargo_bin("wms-bridge").expect("Binary exists");
    cmd.arg("run")
        .arg("--config")
        .arg(config.path())
        .args(["--limit", "5"])
        .env("ERP_API_TOKEN", "erp-token")
        .env("WMS_API_KEY", "wms-key");
    cmd.assert()
        .code(3)
        .stderr(predicate::str::contains("add --once or name an operation"));
}

/// Collects the message of every emitted event.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

struct MessageVisitor<'a>(&'a mut String);

impl Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{value:?}"));
        }
    }
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut msg = String::new();
        event.record(&mut MessageVisitor(&mut msg));
        self.events.lock().unwrap().push(msg);
    }
}

#[tokio::test]
async fn emits_config_failure_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use wms_bridge::cli::{run, Cli, Commands};

    let cli = Cli {
        command: Commands::Run {
            config: std::path::PathBuf::from("dummy.yaml"),
            scope: None,
            operation: "items".to_string(),
            dry_run: false,
            limit: None,
            from: None,
            to: None,
            force: false,
            once: false,
        },
    };

    let result = run(cli).await;
    assert!(result.is_err());

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs
            .iter()
            .any(|msg| msg.contains("Failed to read config file")),
        "Expected a config failure event, got: {:?}",
        event_msgs
    );
}
