//! the record sink contract: publish device snapshots, insert measurement
//! batches, and purge old measurements.

use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::model::{DeviceSnapshot, Measurement};

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("row count mismatch: sent {sent}, sink reported {reported}")]
    CountMismatch { sent: usize, reported: usize },
}

pub type Result<T> = std::result::Result<T, SinkError>;

/// the three operations the pipeline needs from an upstream record store.
/// implementations own their own reconnect/backoff policy; callers only
/// see a channel that keeps producing snapshots for as long as the
/// subscription lives.
#[async_trait]
pub trait Sink: Send + Sync {
    /// subscribe to the control plane's device snapshot feed. Each message
    /// received on the returned channel is a *full* replacement snapshot,
    /// not a diff.
    async fn subscribe_devices(&self) -> Result<mpsc::Receiver<Vec<DeviceSnapshot>>>;

    /// insert a batch of measurements, returning the number of rows the
    /// sink reports as inserted. Callers should treat a mismatch between
    /// `batch.len()` and the returned count as an error.
    async fn insert_measurements(&self, batch: &[Measurement]) -> Result<usize>;

    /// delete every measurement recorded before `older_than`, returning the
    /// number of rows removed.
    async fn delete_older_than(&self, older_than: SystemTime) -> Result<usize>;
}
