//! Swift consometer service binary
//!
//! Polls the object-storage usage of every tenant project once per configured
//! timeout and publishes it to RabbitMQ.

mod config;
mod scheduler;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};

use consometer_collector::{
    AmqpBroker, Broker, GraphiteSink, KeystoneClient, MemoryBroker, MetricsSink, NopSink,
    Orchestrator, SwiftProbeFactory,
};
use consometer_common::VERSION;

use crate::config::{ServiceConfig, DEFAULT_CONFIG_DIR};

/// Periodic Swift usage collector
#[derive(Debug, Parser)]
#[command(name = "swift-consometer", version, about)]
struct Cli {
    /// Path of the configuration file directory
    #[arg(short, long, default_value = DEFAULT_CONFIG_DIR)]
    config: PathBuf,

    /// Log level: trace, debug, info, warn, error. Overrides the configuration file
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Perform a single run and exit
    #[arg(long)]
    once: bool,

    /// Log batches instead of publishing them to RabbitMQ
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = ServiceConfig::load(&cli.config);
    let level = cli
        .log_level
        .as_deref()
        .or_else(|| loaded.as_ref().ok().map(|c| c.log_level.as_str()));
    telemetry::init(level)?;

    let config = loaded.context("Failed reading configuration")?;
    info!("Starting swift-consometer v{}", VERSION);
    debug!(?config, "Configuration loaded");

    let run_config = Arc::new(config.run);

    let identity = KeystoneClient::with_timeout(run_config.openstack.clone(), run_config.timeout)
        .context("Failed creating identity client")?;

    let metrics: Arc<dyn MetricsSink> = match GraphiteSink::connect(&run_config.graphite).await {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            warn!(
                "cannot connect to graphite with hostname: {} port: {}: {}",
                run_config.graphite.hostname, run_config.graphite.port, e
            );
            Arc::new(NopSink)
        }
    };

    let broker: Arc<dyn Broker> = if cli.dry_run {
        info!("Dry run, nothing will be published to RabbitMQ");
        Arc::new(MemoryBroker::discarding())
    } else {
        Arc::new(AmqpBroker::new(run_config.rabbit.uri()))
    };

    let orchestrator = Arc::new(Orchestrator::new(
        run_config.clone(),
        Arc::new(identity),
        Arc::new(SwiftProbeFactory),
        broker,
        metrics,
    ));

    if cli.once {
        let summary = orchestrator.run_once().await;
        if !summary.is_success() {
            bail!("Run finished with failures");
        }
        return Ok(());
    }

    let runs = scheduler::schedule(run_config.timeout, scheduler::shutdown_signal(), move || {
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run_once().await }
    })
    .await;

    info!(runs, "Shutting down swift-consometer");
    Ok(())
}
