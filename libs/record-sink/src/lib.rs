//! a `Sink` implementation backed by core NATS pub/sub and request/reply,
//! with an exponential-backoff reconnect loop for the device snapshot
//! subscription.
#![warn(missing_debug_implementations, rust_2018_idioms)]

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_nats::ConnectOptions;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};

use netwatch_core::model::{DeviceSnapshot, Measurement};
use netwatch_core::sink::{Result, Sink, SinkError};

/// subject the control plane publishes full device snapshots on.
pub const DEVICES_SUBJECT: &str = "netwatch.devices.snapshot";
/// request/reply subject for inserting a measurement batch.
pub const INSERT_SUBJECT: &str = "netwatch.measurements.insert";
/// request/reply subject for purging old measurements.
pub const PURGE_SUBJECT: &str = "netwatch.measurements.purge";

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct PurgeRequest {
    older_than: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct InsertReply {
    inserted: usize,
}

#[derive(Debug, Deserialize)]
struct PurgeReply {
    deleted: usize,
}

/// a NATS connection/reconnect manager plus `Sink` implementation.
pub struct NatsSink {
    servers: String,
    token: Option<String>,
    client: RwLock<Option<async_nats::Client>>,
}

impl std::fmt::Debug for NatsSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsSink")
            .field("servers", &self.servers)
            .finish_non_exhaustive()
    }
}

impl NatsSink {
    pub fn new(servers: impl Into<String>, token: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            servers: servers.into(),
            token,
            client: RwLock::new(None),
        })
    }

    fn connect_options(&self) -> ConnectOptions {
        let mut opts = ConnectOptions::new().connection_timeout(Duration::from_secs(5));
        if let Some(token) = &self.token {
            opts = opts.token(token.clone());
        }
        opts
    }

    /// connect once, retrying with doubling backoff (starting at 1s,
    /// uncapped) until it succeeds.
    async fn connect_with_backoff(&self) -> async_nats::Client {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self.connect_options().connect(&self.servers).await {
                Ok(client) => {
                    info!(servers = %self.servers, "connected to record sink");
                    return client;
                }
                Err(err) => {
                    netwatch_core::metrics::SINK_RECONNECT_COUNT.inc();
                    warn!(%err, backoff = ?backoff, "record sink connection failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    async fn client(&self) -> async_nats::Client {
        if let Some(client) = self.client.read().await.clone() {
            return client;
        }
        let client = self.connect_with_backoff().await;
        *self.client.write().await = Some(client.clone());
        client
    }

    async fn request(&self, subject: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        let client = self.client().await;
        let response = tokio::time::timeout(REQUEST_TIMEOUT, client.request(subject.to_string(), payload.into()))
            .await
            .map_err(|_| SinkError::Timeout(format!("request to {subject} timed out")))?
            .map_err(|err| SinkError::Transport(format!("request to {subject} failed: {err}")))?;
        Ok(response.payload.to_vec())
    }
}

#[async_trait]
impl Sink for NatsSink {
    async fn subscribe_devices(&self) -> Result<mpsc::Receiver<Vec<DeviceSnapshot>>> {
        let (tx, rx) = mpsc::channel(16);
        let servers = self.servers.clone();
        let token = self.token.clone();
        let connect_opts = |token: Option<String>| {
            let mut opts = ConnectOptions::new().connection_timeout(Duration::from_secs(5));
            if let Some(token) = token {
                opts = opts.token(token);
            }
            opts
        };

        tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            loop {
                let client = match connect_opts(token.clone()).connect(&servers).await {
                    Ok(client) => {
                        backoff = INITIAL_BACKOFF;
                        client
                    }
                    Err(err) => {
                        netwatch_core::metrics::SINK_RECONNECT_COUNT.inc();
                        warn!(%err, backoff = ?backoff, "device subscription connect failed, retrying");
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                        continue;
                    }
                };

                let mut subscriber = match client.subscribe(DEVICES_SUBJECT.to_string()).await {
                    Ok(sub) => sub,
                    Err(err) => {
                        error!(%err, "failed to subscribe to device snapshot subject");
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                        continue;
                    }
                };

                debug!(subject = DEVICES_SUBJECT, "subscribed to device snapshots");
                loop {
                    match subscriber.next().await {
                        Some(msg) => match serde_json::from_slice::<Vec<DeviceSnapshot>>(&msg.payload) {
                            Ok(snapshot) => {
                                if tx.send(snapshot).await.is_err() {
                                    debug!("device snapshot receiver dropped, stopping subscription");
                                    return;
                                }
                            }
                            Err(err) => error!(%err, "failed to decode device snapshot payload"),
                        },
                        None => {
                            warn!("device snapshot subscription ended, reconnecting");
                            netwatch_core::metrics::SINK_RECONNECT_COUNT.inc();
                            break;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn insert_measurements(&self, batch: &[Measurement]) -> Result<usize> {
        let payload = serde_json::to_vec(batch)
            .map_err(|err| SinkError::Transport(format!("failed to encode measurement batch: {err}")))?;
        let response = self.request(INSERT_SUBJECT, payload).await?;
        let reply: InsertReply = serde_json::from_slice(&response)
            .map_err(|err| SinkError::Transport(format!("failed to decode insert reply: {err}")))?;
        if reply.inserted != batch.len() {
            return Err(SinkError::CountMismatch {
                sent: batch.len(),
                reported: reply.inserted,
            });
        }
        Ok(reply.inserted)
    }

    async fn delete_older_than(&self, older_than: SystemTime) -> Result<usize> {
        let payload = serde_json::to_vec(&PurgeRequest {
            older_than: older_than.into(),
        })
        .map_err(|err| SinkError::Transport(format!("failed to encode purge request: {err}")))?;
        let response = self.request(PURGE_SUBJECT, payload).await?;
        let reply: PurgeReply = serde_json::from_slice(&response)
            .map_err(|err| SinkError::Transport(format!("failed to decode purge reply: {err}")))?;
        Ok(reply.deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_never_contains_the_token() {
        let sink = NatsSink::new("nats://localhost:4222", Some("super-secret-token".to_string()));
        let debugged = format!("{sink:?}");
        assert!(!debugged.contains("super-secret-token"));
        assert!(debugged.contains("nats://localhost:4222"));
    }

    #[test]
    fn purge_request_serializes_older_than_as_rfc3339() {
        let req = PurgeRequest {
            older_than: DateTime::<Utc>::from(SystemTime::UNIX_EPOCH),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("1970-01-01"));
    }
}
