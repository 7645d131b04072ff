use autoinst_common::constants::{DEFAULT_CONFIG_FILE, WORKING_DIR};
use clap::Parser;
use std::path::PathBuf;

fn about_message() -> String {
    format!(
        "Attaches OpenTelemetry instrumentation to workload processes on this node\nVersion: {}",
        env!("CARGO_PKG_VERSION")
    )
}

fn footer_message() -> String {
    format!(
        "Default config file: {DEFAULT_CONFIG_FILE}\nDefault log directory: {WORKING_DIR}\nEvery config key can also be set as an AUTOINST_<KEY> environment variable.\n"
    )
}

#[derive(Parser, Clone, Debug, Default)]
#[clap(
    name = "autoinst-agent",
    about = about_message(),
    version = env!("CARGO_PKG_VERSION"),
    after_help = footer_message()
)]
pub struct Cli {
    /// Path to a TOML config file
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `autoinst_instrumentation=debug`
    #[clap(long)]
    pub log_level: Option<String>,

    /// Directory the agent log file is written to
    #[clap(long)]
    pub log_dir: Option<PathBuf>,

    /// How often the process table is scanned, in milliseconds
    #[clap(long)]
    pub poll_interval_ms: Option<u64>,
}
