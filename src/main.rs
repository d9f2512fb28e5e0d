// Runs the estimation engine against a directory of frames and serves the
// latest snapshot over HTTP.

use anyhow::Context;
use koza_vision::{
    AnalyticsPipeline, DirectoryFrameSource, EngineConfig, Monitor, MonitorConfig, NoModelDetector, ServerConfig,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("koza_vision=info"))?;

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .try_init()?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();
    init_tracing()?;
    info!("Starting koza_vision");

    let engine_config = EngineConfig::from_env();
    engine_config.validate()?;
    let monitor_config = MonitorConfig::from_env();
    let server_config = ServerConfig::from_env();

    let frame_dir = monitor_config
        .frame_dir
        .clone()
        .context("KOZA_FRAME_DIR must point at a directory of frames")?;
    let source = DirectoryFrameSource::new(frame_dir)?;
    info!(
        dir = %source.dir().display(),
        queued = source.remaining(),
        stage = %engine_config.active_stage,
        "frame source ready"
    );

    let pipeline = AnalyticsPipeline::new(engine_config);
    let monitor = Monitor::new(pipeline, source, Arc::new(NoModelDetector), monitor_config);
    let reader = monitor.reader();

    let cancel = CancellationToken::new();
    let worker = monitor.spawn(cancel.clone());

    let server = match koza_vision::server::start_server(reader, server_config, cancel.clone()).await {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(error = %err, "snapshot server not started");
            None
        }
    };

    tokio::signal::ctrl_c().await.context("installing Ctrl+C handler")?;
    info!("Received shutdown signal");
    cancel.cancel();

    match worker.await {
        Ok(stats) => info!(published = stats.published, abandoned = stats.abandoned, "worker finished"),
        Err(err) => error!(error = %err, "worker task failed"),
    }
    if let Some(server) = server {
        if let Err(err) = server.await {
            error!(error = %err, "server task failed");
        }
    }

    info!("Shutdown complete");
    Ok(())
}
