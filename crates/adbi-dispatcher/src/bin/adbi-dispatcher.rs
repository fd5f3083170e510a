//! The dispatcher CLI: `<image_id> <entry_point...>` builds a [`ConstantResolver`] and
//! runs the receive loop until Ctrl-C (§6 "CLI surface... Examples only").

use adbi_container::BollardContainerManager;
use adbi_dispatcher::{Dispatcher, DispatcherConfig};
use adbi_resolver::ConstantResolver;
use adbi_util::config::LogLevel;
use adbi_base::WorkerInfo;
use anyhow::Context as _;
use clap::Parser;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "adbi-dispatcher", about = "Runs the ADBI dispatcher with a constant resolver")]
struct Cli {
    /// Container image every job is dispatched to.
    image_id: String,
    /// Entry-point argv; the job prefix URI is appended as the final argument.
    #[arg(required = true)]
    entry_point: Vec<String>,
    #[arg(long, env = "ADBI_LOG_LEVEL", default_value = "info")]
    log_level: LogLevel,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = DispatcherConfig::from_env()?;

    adbi_util::log::run_with_logger(cli.log_level, |logger| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start the tokio runtime")?
            .block_on(run(cli, config, logger))
    })
}

async fn run(cli: Cli, config: DispatcherConfig, logger: slog::Logger) -> anyhow::Result<()> {
    let worker_info = WorkerInfo::new(cli.image_id, cli.entry_point);
    let resolver = Arc::new(ConstantResolver::new(worker_info));
    let container = Arc::new(
        BollardContainerManager::connect_with_local_defaults(config.ecr_account_ids.clone())
            .await
            .context("failed to connect to the container runtime")?,
    );

    let dispatcher = Dispatcher::from_config(&config, resolver, container, logger.clone()).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    slog::info!(logger, "dispatcher starting"; "max_worker" => config.max_worker, "queue_name" => &config.queue_name);
    dispatcher.run(shutdown_rx).await
}
