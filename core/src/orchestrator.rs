//! the pipeline orchestrator: four independent tickers driving device
//! resolution, probing, measurement flushing, and purging.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ping_engine::PingEngine;
use resolver_pool::ResolverPool;

use crate::buffer::MeasurementBuffer;
use crate::metrics;
use crate::model::{Device, Measurement};
use crate::registry::DeviceRegistry;
use crate::sink::Sink;

pub struct Orchestrator {
    registry: Arc<DeviceRegistry>,
    buffer: Arc<MeasurementBuffer>,
    engine: Arc<PingEngine>,
    resolver: Arc<ResolverPool>,
    sink: Arc<dyn Sink>,
    ping_workers: usize,
    ping_buffer_size: usize,
    ping_interval: Duration,
    dns_lookup_interval: Duration,
    purge_interval: Duration,
    purge_older_than: Duration,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<DeviceRegistry>,
        buffer: Arc<MeasurementBuffer>,
        engine: Arc<PingEngine>,
        resolver: Arc<ResolverPool>,
        sink: Arc<dyn Sink>,
        ping_workers: usize,
        ping_buffer_size: usize,
        ping_interval: Duration,
        dns_lookup_interval: Duration,
        purge_interval: Duration,
        purge_older_than: Duration,
    ) -> Self {
        Self {
            registry,
            buffer,
            engine,
            resolver,
            sink,
            ping_workers,
            ping_buffer_size,
            ping_interval,
            dns_lookup_interval,
            purge_interval,
            purge_older_than,
        }
    }

    /// start every background task. Returns once the device-snapshot
    /// subscription has been established.
    pub async fn run(
        self: Arc<Self>,
        measurements: tokio::sync::mpsc::Receiver<ping_engine::Completed>,
        cancel: CancellationToken,
    ) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();

        handles.push(self.clone().spawn_device_sync(cancel.clone()).await?);
        handles.push(spawn_collector(self.buffer.clone(), measurements, cancel.clone()));

        let (device_tx, device_rx) = mpsc::channel(self.ping_buffer_size.max(1));
        let device_rx = Arc::new(AsyncMutex::new(device_rx));
        for worker in 0..self.ping_workers.max(1) {
            handles.push(spawn_ping_worker(worker, self.engine.clone(), device_rx.clone(), cancel.clone()));
        }

        handles.push(spawn_ticker(
            "resolve",
            self.dns_lookup_interval,
            cancel.clone(),
            {
                let orch = self.clone();
                move || {
                    let orch = orch.clone();
                    async move { orch.resolve_tick().await }
                }
            },
        ));
        handles.push(spawn_ticker("ping", self.ping_interval, cancel.clone(), {
            let orch = self.clone();
            let device_tx = device_tx.clone();
            move || {
                let orch = orch.clone();
                let device_tx = device_tx.clone();
                async move { orch.ping_tick(device_tx).await }
            }
        }));
        handles.push(spawn_ticker("flush", self.ping_interval, cancel.clone(), {
            let orch = self.clone();
            move || {
                let orch = orch.clone();
                async move { orch.flush_tick().await }
            }
        }));
        handles.push(spawn_ticker("purge", self.purge_interval, cancel.clone(), {
            let orch = self.clone();
            move || {
                let orch = orch.clone();
                async move { orch.purge_tick().await }
            }
        }));

        Ok(handles)
    }

    async fn spawn_device_sync(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<JoinHandle<()>> {
        let mut snapshots = self.sink.subscribe_devices().await?;
        let registry = self.registry.clone();
        let resolver = self.resolver.clone();
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("device sync task stopping");
                        return;
                    }
                    msg = snapshots.recv() => {
                        match msg {
                            Some(snapshot) => registry.sync(&snapshot, &resolver).await,
                            None => {
                                warn!("device snapshot subscription ended");
                                return;
                            }
                        }
                    }
                }
            }
        }))
    }

    async fn resolve_tick(&self) {
        for device in self.registry.snapshot().await {
            match self.resolver.resolve(device.hostname()).await {
                Ok(addrs) => device.set_addrs(addrs),
                Err(err) => warn!(device_id = %device.id, %err, "failed to resolve device hostname"),
            }
        }
    }

    /// enqueue every device with at least one resolved address onto the
    /// bounded ping-sender queue. Backpressure here (an await on a full
    /// channel) is the queue bound `B` from spec.md §6 doing its job; the
    /// caller is itself a ticker-spawned task, so this never stalls the
    /// interval timer.
    async fn ping_tick(&self, device_tx: mpsc::Sender<Arc<Device>>) {
        for device in self.registry.snapshot().await {
            if device.addrs().is_empty() {
                continue;
            }
            if device_tx.send(device.clone()).await.is_err() {
                warn!(device_id = %device.id, "ping sender queue closed, dropping tick");
                return;
            }
        }
    }

    async fn flush_tick(&self) {
        let batch = self.buffer.take();
        if batch.is_empty() {
            return;
        }
        let len = batch.len();
        match self.sink.insert_measurements(&batch).await {
            Ok(inserted) if inserted == len => {
                metrics::SINK_INSERT_COUNT.ok.inc();
            }
            Ok(inserted) => {
                metrics::SINK_INSERT_COUNT.error.inc();
                error!(sent = len, inserted, "sink reported partial insert");
            }
            Err(err) => {
                metrics::SINK_INSERT_COUNT.error.inc();
                error!(%err, sent = len, "failed to insert measurement batch");
            }
        }
    }

    async fn purge_tick(&self) {
        let older_than = SystemTime::now() - self.purge_older_than;
        match self.sink.delete_older_than(older_than).await {
            Ok(deleted) => {
                metrics::SINK_PURGE_COUNT.ok.inc();
                info!(deleted, "purged old measurements");
            }
            Err(err) => {
                metrics::SINK_PURGE_COUNT.error.inc();
                error!(%err, "failed to purge old measurements");
            }
        }
    }
}

/// one of `W_ping` persistent sender workers, sharing a single bounded
/// device queue behind a mutex-guarded receiver -- the same fixed
/// worker-pool-over-one-channel idiom `resolver-pool` uses for `W_dns`.
fn spawn_ping_worker(
    worker: usize,
    engine: Arc<PingEngine>,
    device_rx: Arc<AsyncMutex<mpsc::Receiver<Arc<Device>>>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(worker, "ping sender worker starting");
        loop {
            let device = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(worker, "ping sender worker stopping");
                    return;
                }
                job = async { device_rx.lock().await.recv().await } => job,
            };
            let Some(device) = device else {
                debug!(worker, "ping sender worker stopping, queue closed");
                return;
            };
            for addr in device.addrs() {
                if let Err(err) = engine.send_probe(device.id.clone(), addr.into()).await {
                    debug!(device_id = %device.id, %addr, %err, "failed to send probe");
                }
            }
        }
    })
}

fn spawn_collector(
    buffer: Arc<MeasurementBuffer>,
    mut measurements: tokio::sync::mpsc::Receiver<ping_engine::Completed>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("measurement collector stopping");
                    return;
                }
                completed = measurements.recv() => {
                    match completed {
                        Some(completed) => {
                            let target = to_v4(completed.target);
                            let measurement = match completed.outcome {
                                ping_engine::Outcome::Replied { rtt } => {
                                    Measurement::replied(completed.device_id, target, completed.sent_time, rtt)
                                }
                                ping_engine::Outcome::TimedOut => {
                                    Measurement::timed_out(completed.device_id, target, completed.sent_time)
                                }
                            };
                            buffer.push(measurement);
                        }
                        None => {
                            warn!("ping engine measurement channel closed");
                            return;
                        }
                    }
                }
            }
        }
    })
}

fn to_v4(addr: std::net::IpAddr) -> std::net::Ipv4Addr {
    match addr {
        std::net::IpAddr::V4(v4) => v4,
        std::net::IpAddr::V6(_) => unreachable!("ping-engine only ever probes ipv4 targets"),
    }
}

/// run `work` every `interval`, skipping a tick if the previous invocation
/// of `work` is still running rather than letting invocations overlap.
fn spawn_ticker<F, Fut>(name: &'static str, interval: Duration, cancel: CancellationToken, work: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let busy = Arc::new(AtomicBool::new(false));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(ticker = name, "ticker stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if busy.swap(true, Ordering::AcqRel) {
                        warn!(ticker = name, "skipping tick, previous run still in progress");
                        continue;
                    }
                    let fut = work();
                    let busy = busy.clone();
                    tokio::spawn(async move {
                        fut.await;
                        busy.store(false, Ordering::Release);
                    });
                }
            }
        }
    })
}
