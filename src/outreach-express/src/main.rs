//! Outreach Express — multi-channel sales sequence automation.
//!
//! Main entry point that initializes the engine, the background runner and
//! the HTTP API.

use std::sync::Arc;

use clap::Parser;
use outreach_api::ApiServer;
use outreach_core::config::AppConfig;
use outreach_core::event_bus::LogSink;
use outreach_sequences::{LogDispatcher, SequenceEngine, SequenceRunner};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "outreach-express")]
#[command(about = "Multi-channel sales sequence automation engine")]
#[command(version)]
struct Cli {
    /// Path to a config file (TOML, YAML or JSON)
    #[arg(long, env = "OUTREACH_EXPRESS_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "OUTREACH_EXPRESS__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "OUTREACH_EXPRESS__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Serve the API without the background dispatch runner
    #[arg(long, default_value_t = false)]
    api_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "outreach_express=info,outreach_sequences=info,tower_http=info".into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Outreach Express starting up");

    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        metrics_port = config.metrics.port,
        scheduler_enabled = config.scheduler.enabled && !cli.api_only,
        "Configuration loaded"
    );

    let engine = SequenceEngine::in_memory(config.sequences.clone())
        .with_event_sink(Arc::new(LogSink))
        .with_node_id(&config.node_id);

    if cli.api_only || !config.scheduler.enabled {
        info!("Running in API-only mode (no dispatch runner)");
    } else {
        let runner = SequenceRunner::new(
            engine.clone(),
            Arc::new(LogDispatcher),
            config.scheduler.clone(),
        );
        runner.spawn();
    }

    let api_server = ApiServer::new(config.clone(), engine);

    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Outreach Express is ready to serve traffic");

    api_server.start_http().await?;

    Ok(())
}
