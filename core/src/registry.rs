//! the device registry: a shared map of devices kept in sync with
//! control-plane snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use resolver_pool::ResolverPool;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::metrics;
use crate::model::{Device, DeviceSnapshot};

/// holds every currently-known device behind a single `RwLock`, with each
/// device's mutable hostname/address state behind its own internal lock so
/// resolving one device never blocks iterating the whole registry.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Arc<Device>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// replace the registry's contents with `snapshot`: devices present in
    /// the snapshot are inserted or updated in a first pass, then any
    /// device absent from the snapshot is deleted in a second pass. Doing
    /// this as two separate passes over two different views (the snapshot,
    /// then the registry) is what makes deletion correct -- a single pass
    /// that both updates and deletes while iterating the same map it's
    /// mutating never observes entries it has already removed.
    ///
    /// every newly-inserted or hostname-changed device has a resolve
    /// scheduled against `resolver` immediately, so a device doesn't sit
    /// with an empty address list (and get skipped by the ping ticker)
    /// until the next periodic resolve sweep.
    pub async fn sync(&self, snapshot: &[DeviceSnapshot], resolver: &Arc<ResolverPool>) {
        let mut devices = self.devices.write().await;
        let mut changed: Vec<Arc<Device>> = Vec::new();

        for entry in snapshot {
            match devices.get(&entry.id) {
                Some(existing) if existing.hostname() == entry.hostname => {
                    // unchanged, nothing to do
                }
                Some(existing) => {
                    existing.set_hostname(entry.hostname.clone());
                    changed.push(existing.clone());
                }
                None => {
                    let device = Arc::new(Device::new(entry.id.clone(), entry.hostname.clone()));
                    devices.insert(entry.id.clone(), device.clone());
                    changed.push(device);
                }
            }
        }

        let wanted: std::collections::HashSet<&str> =
            snapshot.iter().map(|d| d.id.as_str()).collect();
        devices.retain(|id, _| wanted.contains(id.as_str()));

        metrics::REGISTRY_DEVICES.set(devices.len() as i64);
        info!(count = devices.len(), "synced device registry");
        drop(devices);

        for device in changed {
            let resolver = resolver.clone();
            tokio::spawn(async move {
                match resolver.resolve(device.hostname()).await {
                    Ok(addrs) => device.set_addrs(addrs),
                    Err(err) => warn!(device_id = %device.id, %err, "failed to resolve newly synced device hostname"),
                }
            });
        }
    }

    /// a snapshot of every currently-registered device, for iteration by
    /// the resolver and ping tickers without holding the registry lock for
    /// the duration of the sweep.
    pub async fn snapshot(&self) -> Vec<Arc<Device>> {
        self.devices.read().await.values().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(id: &str, hostname: &str) -> DeviceSnapshot {
        DeviceSnapshot {
            id: id.into(),
            hostname: hostname.into(),
        }
    }

    fn resolver() -> Arc<ResolverPool> {
        Arc::new(ResolverPool::new(1).unwrap())
    }

    #[tokio::test]
    async fn sync_inserts_new_devices() {
        let registry = DeviceRegistry::new();
        registry.sync(&[snap("a", "a.example.com")], &resolver()).await;
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.get("a").await.unwrap().hostname(), "a.example.com");
    }

    #[tokio::test]
    async fn sync_removes_devices_missing_from_snapshot() {
        let registry = DeviceRegistry::new();
        let resolver = resolver();
        registry
            .sync(&[snap("a", "a.example.com"), snap("b", "b.example.com")], &resolver)
            .await;
        assert_eq!(registry.len().await, 2);

        registry.sync(&[snap("a", "a.example.com")], &resolver).await;
        assert_eq!(registry.len().await, 1);
        assert!(registry.get("b").await.is_none());
    }

    #[tokio::test]
    async fn sync_updates_hostname_and_clears_addrs() {
        let registry = DeviceRegistry::new();
        let resolver = resolver();
        registry.sync(&[snap("a", "old.example.com")], &resolver).await;
        let device = registry.get("a").await.unwrap();
        device.set_addrs(vec!["10.0.0.1".parse().unwrap()]);

        registry.sync(&[snap("a", "new.example.com")], &resolver).await;
        let device = registry.get("a").await.unwrap();
        assert_eq!(device.hostname(), "new.example.com");
        assert!(device.addrs().is_empty());
    }

    #[tokio::test]
    async fn sync_twice_with_same_snapshot_is_idempotent() {
        let registry = DeviceRegistry::new();
        let resolver = resolver();
        let snapshot = vec![snap("a", "a.example.com"), snap("b", "b.example.com")];
        registry.sync(&snapshot, &resolver).await;
        registry.sync(&snapshot, &resolver).await;
        assert_eq!(registry.len().await, 2);
    }
}
