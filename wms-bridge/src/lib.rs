pub mod cli;
pub mod erp;
pub mod http;
pub mod jobs;
pub mod load_config;
pub mod tracing_init;
pub mod wms;

pub use cli::{run, Cli, Commands};
