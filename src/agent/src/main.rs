use anyhow::Context;
use autoinst_agent::cli::Cli;
use autoinst_agent::logging::setup_logging;
use autoinst_agent::{Agent, ConfigLoader};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::load(cli.config.as_deref())?;
    config.apply_cli_overrides(&cli);

    setup_logging(&config.log_level, &config.log_dir).context("failed to set up logging")?;
    info!(?config, "Starting autoinst agent");

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received ctrl-c, shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for ctrl-c, shutting down"),
        }
        shutdown.cancel();
    });

    let result = Agent::new(config).run(cancel).await;
    if let Err(e) = &result {
        error!(error = ?e, "Agent stopped with an error");
    }
    result
}
