use clap::Parser;
use std::process::ExitCode;
use wms_bridge::cli::{run, Cli, EXIT_CONFIG};
use wms_bridge::tracing_init::init_tracing;

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment
    dotenvy::dotenv().ok();

    init_tracing("info");
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // usage errors share the configuration exit code; --help and --version exit 0
            let code = if e.use_stderr() { EXIT_CONFIG } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };
    match run(cli).await {
        Ok(code) => {
            tracing::info!(exit_code = code, "CLI finished");
            ExitCode::from(code)
        }
        Err(e) => {
            tracing::error!(error = %e, "CLI exited with configuration error");
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_CONFIG)
        }
    }
}
