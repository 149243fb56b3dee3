//! bounded-concurrency IPv4-only DNS resolver pool.
#![warn(missing_debug_implementations, rust_2018_idioms)]

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use hickory_resolver::config::ResolverOpts;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::{Resolver, TokioResolver};
use lazy_static::lazy_static;
use prometheus::register_int_counter_vec;
use prometheus_static_metric::make_static_metric;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, warn};

make_static_metric! {
    pub label_enum ResolveResult {
        ok,
        error,
    }
    pub struct ResolveStats: IntCounter {
        "result" => ResolveResult,
    }
}

lazy_static! {
    static ref DNS_RESOLVE_COUNT: ResolveStats = ResolveStats::from(
        &register_int_counter_vec!(
            "dns_resolve_total",
            "count of hostname resolutions by result",
            &["result"]
        )
        .unwrap(),
    );
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to build dns resolver: {0}")]
    Build(#[source] anyhow::Error),
    #[error("lookup for {hostname:?} failed: {source}")]
    Lookup {
        hostname: String,
        #[source]
        source: hickory_resolver::ResolveError,
    },
    #[error("resolver pool is shut down")]
    PoolClosed,
}

pub type Result<T> = std::result::Result<T, Error>;

struct Job {
    hostname: String,
    reply: oneshot::Sender<Result<Vec<Ipv4Addr>>>,
}

/// a fixed set of worker tasks sharing one resolver and a bounded job queue,
/// capping concurrent outstanding DNS lookups at the configured worker count.
pub struct ResolverPool {
    tx: mpsc::Sender<Job>,
}

impl fmt::Debug for ResolverPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverPool").finish_non_exhaustive()
    }
}

impl ResolverPool {
    pub fn new(workers: usize) -> Result<Self> {
        let resolver = Arc::new(build_resolver()?);
        let (tx, rx) = mpsc::channel(workers.max(1) * 4);
        let rx = Arc::new(Mutex::new(rx));

        for id in 0..workers.max(1) {
            let rx = rx.clone();
            let resolver = resolver.clone();
            tokio::spawn(async move {
                debug!(worker = id, "resolver worker starting");
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else {
                        debug!(worker = id, "resolver worker stopping, queue closed");
                        return;
                    };
                    let result = lookup_ipv4(&resolver, &job.hostname).await;
                    if result.is_ok() {
                        DNS_RESOLVE_COUNT.ok.inc();
                    } else {
                        DNS_RESOLVE_COUNT.error.inc();
                    }
                    let _ = job.reply.send(result);
                }
            });
        }

        Ok(Self { tx })
    }

    /// resolve a hostname to its IPv4 addresses, routing the request to the
    /// next free worker.
    pub async fn resolve(&self, hostname: impl Into<String>) -> Result<Vec<Ipv4Addr>> {
        let hostname = hostname.into();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job {
                hostname,
                reply,
            })
            .await
            .map_err(|_| Error::PoolClosed)?;
        rx.await.map_err(|_| Error::PoolClosed)?
    }
}

fn build_resolver() -> Result<TokioResolver> {
    Ok(Resolver::builder(TokioConnectionProvider::default())
        .map_err(|e| Error::Build(anyhow::Error::new(e)))?
        .with_options(ResolverOpts::default())
        .build())
}

async fn lookup_ipv4(resolver: &TokioResolver, hostname: &str) -> Result<Vec<Ipv4Addr>> {
    let lookup = resolver
        .ipv4_lookup(hostname)
        .await
        .map_err(|source| Error::Lookup {
            hostname: hostname.to_string(),
            source,
        })?;
    let addrs: Vec<Ipv4Addr> = lookup.iter().map(|rdata| rdata.0).collect();
    if addrs.is_empty() {
        warn!(hostname, "resolved to zero ipv4 addresses");
    }
    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_closed_error_after_drop() {
        let (tx, rx) = mpsc::channel::<Job>(1);
        drop(rx);
        let pool = ResolverPool { tx };
        let err = pool.resolve("example.com").await.unwrap_err();
        assert!(matches!(err, Error::PoolClosed));
    }
}
