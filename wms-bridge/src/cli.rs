///
/// This module implements the CLI interface for wms-bridge: command parsing,
/// argument validation, and the async entrypoint used by `main` and tests.
///
/// All business logic (jobs, stores, scheduling) lives in the [`wms-bridge-core`] crate.
/// This module only turns arguments into [`RunOptions`] and a job selection, and the
/// outcome back into a process exit code.
///
/// ## Exit codes
/// - `0`: every requested job succeeded
/// - `1`: total failure (nothing reconciled, or the job itself failed)
/// - `2`: partial success (some records failed)
/// - `3`: configuration or connection error
///
/// [`wms-bridge-core`]: ../../wms-bridge-core/
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use wms_bridge_core::config::RunOptions;
use wms_bridge_core::entity::Scope;
use wms_bridge_core::record::parse_date;
use wms_bridge_core::report::RunOutcome;
use wms_bridge_core::scheduler::JobRun;

use crate::jobs::{build_scheduler, known_job_names, open_store};
use crate::load_config::load_config;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_TOTAL_FAILURE: u8 = 1;
pub const EXIT_PARTIAL: u8 = 2;
pub const EXIT_CONFIG: u8 = 3;

/// CLI for wms-bridge: keep a warehouse-management system in sync with the ERP.
#[derive(Parser)]
#[clap(
    name = "wms-bridge",
    version,
    about = "Change-tracking sync between an ERP and a warehouse-management system"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one job, or every job, for the configured scopes
    Run {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Restrict to one scope (company) id; defaults to all configured scopes
        #[clap(long)]
        scope: Option<String>,
        /// Job name (see `jobs`), or `all` for the scheduler loop
        #[clap(long, default_value = "all")]
        operation: String,
        /// Read, compare and map, but write nothing remotely
        #[clap(long)]
        dry_run: bool,
        /// Evaluate at most this many candidates per job
        #[clap(long)]
        limit: Option<usize>,
        /// Lower bound overriding the stored watermark (RFC 3339 or YYYY-MM-DD)
        #[clap(long, value_parser = parse_date_arg)]
        from: Option<DateTime<Utc>>,
        /// Upper bound for backfills (RFC 3339 or YYYY-MM-DD)
        #[clap(long, value_parser = parse_date_arg)]
        to: Option<DateTime<Utc>>,
        /// Ignore watermarks and resync everything
        #[clap(long)]
        force: bool,
        /// With `--operation all`: run every job once and exit instead of looping
        #[clap(long)]
        once: bool,
    },
    /// List the job names accepted by `--operation`
    Jobs,
}

fn parse_date_arg(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    parse_date(raw).ok_or_else(|| format!("'{raw}' is not a date (use RFC 3339 or YYYY-MM-DD)"))
}

/// Folds several job runs into one exit code.
pub fn aggregate_exit_code(runs: &[JobRun]) -> u8 {
    if runs.is_empty() {
        return EXIT_SUCCESS;
    }
    let outcomes: Vec<RunOutcome> = runs.iter().map(JobRun::outcome).collect();
    if outcomes.iter().all(|o| *o == RunOutcome::AllSucceeded) {
        EXIT_SUCCESS
    } else if outcomes.iter().all(|o| *o == RunOutcome::TotalFailure) {
        EXIT_TOTAL_FAILURE
    } else {
        EXIT_PARTIAL
    }
}

fn log_run(run: &JobRun) {
    match &run.result {
        Ok(report) => tracing::info!(
            scope = %run.scope,
            job = %run.job,
            outcome = ?report.outcome,
            written = report.written,
            unchanged = report.unchanged,
            errors = report.errors,
            "Job finished"
        ),
        Err(e) => tracing::error!(scope = %run.scope, job = %run.job, error = %e, "Job failed"),
    }
}

/// Async CLI entrypoint for integration tests and main(). Returns the exit code;
/// an `Err` is a configuration or connection problem.
pub async fn run(cli: Cli) -> Result<u8> {
    match cli.command {
        Commands::Jobs => {
            for name in known_job_names() {
                println!("{name}");
            }
            Ok(EXIT_SUCCESS)
        }
        Commands::Run {
            config,
            scope,
            operation,
            dry_run,
            limit,
            from,
            to,
            force,
            once,
        } => {
            let config = load_config(config)?;
            if let (Some(from), Some(to)) = (from, to) {
                if from > to {
                    bail!("--from must not be after --to");
                }
            }
            let scopes: Vec<Scope> = match scope {
                Some(id) => {
                    let scope = Scope::new(id);
                    if !config.scopes.contains(&scope) {
                        bail!("scope {scope} is not configured");
                    }
                    vec![scope]
                }
                None => config.scopes.clone(),
            };
            if operation != "all" && !known_job_names().contains(&operation.as_str()) {
                bail!(
                    "unknown operation '{operation}', expected 'all' or one of: {}",
                    known_job_names().join(", ")
                );
            }

            let looping = operation == "all" && !once;
            if looping && (limit.is_some() || from.is_some() || to.is_some() || force) {
                bail!(
                    "--limit, --from, --to and --force bound a single run; \
                     add --once or name an operation"
                );
            }

            let options = RunOptions {
                dry_run,
                limit,
                from,
                until: to,
                force,
            };
            options.trace_loaded();

            let store = open_store(&config.database_url).await?;
            let scheduler = build_scheduler(&config, &scopes, store)?;
            tracing::info!(command = "run", %operation, scopes = scopes.len(), "Starting");

            if looping {
                let cancel = CancellationToken::new();
                let on_signal = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("Interrupt received, finishing the current job");
                        on_signal.cancel();
                    }
                });
                scheduler
                    .run_forever(&options, Duration::from_secs(config.tick_secs), cancel)
                    .await;
                return Ok(EXIT_SUCCESS);
            }

            let mut runs = Vec::new();
            for scope in &scopes {
                if operation == "all" {
                    runs.extend(scheduler.run_all(scope, &options).await);
                } else {
                    let result = scheduler.run_once(scope, &operation, &options).await;
                    runs.push(JobRun {
                        scope: scope.clone(),
                        job: operation.clone(),
                        result,
                    });
                }
            }
            runs.iter().for_each(log_run);
            if let Ok(summary) = serde_json::to_string_pretty(
                &runs
                    .iter()
                    .filter_map(|r| r.result.as_ref().ok())
                    .collect::<Vec<_>>(),
            ) {
                println!("{summary}");
            }
            Ok(aggregate_exit_code(&runs))
        }
    }
}
