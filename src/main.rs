use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use judge_pipeline::config::{TransportConfig, WorkerConfig};
use judge_pipeline::core::languages::{self, get_language_config};
use judge_pipeline::runner::InterpreterRunner;
use judge_pipeline::transport::redis_stream::RedisJobSource;
use judge_pipeline::worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("judge_pipeline=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    languages::init_languages()?;

    let transport_config = TransportConfig::from_env()?;
    let worker_config = WorkerConfig::from_env()?;

    let language = get_language_config(&worker_config.language)
        .with_context(|| format!("Unsupported language: {}", worker_config.language))?;
    info!(
        "Starting Judge Worker (language={}, time_limit={:?}, memory_limit={} bytes)",
        worker_config.language,
        worker_config.limits.time_limit,
        worker_config.limits.memory_limit_bytes
    );

    let source = RedisJobSource::connect(&transport_config).await?;
    info!(
        "Joined {} on {} as {}",
        transport_config.group,
        transport_config.topic,
        source.consumer()
    );

    let runner = Arc::new(InterpreterRunner::new(language));
    let worker = Worker::new(source, runner, worker_config.limits);

    tokio::select! {
        result = worker.run() => result?,
        _ = tokio::signal::ctrl_c() => warn!("Received Ctrl-C, shutting down"),
    }

    Ok(())
}
