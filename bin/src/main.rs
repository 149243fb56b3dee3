use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tokio::runtime::Builder;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use netwatch_core::buffer::MeasurementBuffer;
use netwatch_core::config::Config;
use netwatch_core::registry::DeviceRegistry;
use netwatch_core::trace;
use netwatch_core::{Orchestrator, Sink};
use ping_engine::PingEngine;
use record_sink::NatsSink;
use resolver_pool::ResolverPool;

#[cfg(not(target_env = "musl"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "musl"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn main() -> Result<()> {
    let config = Config::parse();
    trace::init(&config.log_level, &config.log_format)?;
    debug!(?config, "parsed configuration");
    if let Err(err) = dotenv::dotenv() {
        debug!(?err, ".env file not loaded");
    }

    let rt = Builder::new_multi_thread().thread_name("netwatchd").enable_all().build()?;

    rt.block_on(async move {
        match tokio::spawn(async move { start(config).await }).await {
            Err(err) => error!(?err, "failed to start"),
            Ok(Err(err)) => error!(?err, "exited with error"),
            Ok(_) => debug!("exiting..."),
        }
    });

    Ok(())
}

async fn start(config: Config) -> Result<()> {
    let secret = Config::record_sink_secret().context("failed to read record sink secret")?;
    let token = (!secret.is_empty()).then_some(secret);

    let sink: Arc<dyn Sink> = NatsSink::new(config.record_sink_endpoint.clone(), token);

    let registry = Arc::new(DeviceRegistry::new());
    let buffer = Arc::new(MeasurementBuffer::new());
    let resolver = Arc::new(ResolverPool::new(config.dns_workers).map_err(|e| anyhow!("failed to build resolver pool: {e}"))?);

    let cancel = CancellationToken::new();
    let (engine, measurements) =
        PingEngine::start(config.ping_timeout(), cancel.clone()).map_err(|e| anyhow!("failed to start ping engine: {e}"))?;

    info!(
        dns_workers = config.dns_workers,
        ping_workers = config.ping_workers,
        record_sink_endpoint = %config.record_sink_endpoint,
        "starting netwatch"
    );

    let orchestrator = Arc::new(Orchestrator::new(
        registry,
        buffer,
        engine,
        resolver,
        sink,
        config.ping_workers,
        config.ping_buffer_size,
        config.ping_interval(),
        config.dns_lookup_interval(),
        config.purge_interval(),
        config.purge_older_than(),
    ));

    let handles = orchestrator
        .run(measurements, cancel.clone())
        .await
        .context("failed to start pipeline orchestrator")?;

    shutdown_signal(cancel.clone()).await?;
    info!("shutdown signal received, waiting for tasks to stop");

    for handle in handles {
        if let Err(err) = handle.await {
            error!(?err, "orchestrator task panicked");
        }
    }

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) -> Result<()> {
    let ret = signal::ctrl_c().await.map_err(|err| anyhow!(err));
    cancel.cancel();
    ret
}
