//! Mock device client for testing.
//!
//! [`MockClient`] implements [`DeviceClient`] without any network access.
//! Tests set the snapshot each device answers polls with, push snapshots to
//! open subscriptions, and inject failures.
//!
//! # Features
//!
//! - **Failure injection**: mark devices unreachable for polls and subscribes
//! - **Latency simulation**: delay every poll response
//! - **Push control**: deliver snapshots to subscribers or end their streams

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use dyson_types::{DeviceIdentity, DeviceStateSnapshot};

use crate::error::{Error, Result};
use crate::streaming::{DEFAULT_BUFFER_SIZE, SnapshotSender, SnapshotStream};
use crate::traits::DeviceClient;

/// An in-memory [`DeviceClient`] for tests.
///
/// # Example
///
/// ```
/// use dyson_core::{DeviceClient, MockClient};
/// use dyson_types::{DeviceIdentity, DeviceStateSnapshot};
///
/// #[tokio::main]
/// async fn main() {
///     let identity = DeviceIdentity::new("AAA-1", "Hall", "475", true).unwrap();
///     let client = MockClient::new(vec![identity.clone()]);
///     client
///         .set_snapshot("AAA-1", DeviceStateSnapshot { power: Some(true), ..Default::default() })
///         .await;
///
///     let snapshot = client.get_snapshot(&identity).await.unwrap();
///     assert_eq!(snapshot.power, Some(true));
/// }
/// ```
pub struct MockClient {
    devices: Vec<DeviceIdentity>,
    snapshots: RwLock<HashMap<String, DeviceStateSnapshot>>,
    unreachable: RwLock<HashSet<String>>,
    subscribers: RwLock<HashMap<String, Vec<SnapshotSender>>>,
    snapshot_count: AtomicU32,
    subscribe_count: AtomicU32,
    /// Simulated poll latency in milliseconds (0 = no delay).
    latency_ms: AtomicU64,
}

impl std::fmt::Debug for MockClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClient")
            .field("devices", &self.devices.len())
            .field("snapshot_count", &self.snapshot_count.load(Ordering::Relaxed))
            .field("subscribe_count", &self.subscribe_count.load(Ordering::Relaxed))
            .finish()
    }
}

fn key(serial: &str) -> String {
    serial.to_ascii_uppercase()
}

impl MockClient {
    /// Create a mock client serving `devices`, none of which has state yet.
    pub fn new(devices: Vec<DeviceIdentity>) -> Self {
        Self {
            devices,
            snapshots: RwLock::new(HashMap::new()),
            unreachable: RwLock::new(HashSet::new()),
            subscribers: RwLock::new(HashMap::new()),
            snapshot_count: AtomicU32::new(0),
            subscribe_count: AtomicU32::new(0),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Set the snapshot returned by polls of `serial`.
    pub async fn set_snapshot(&self, serial: &str, snapshot: DeviceStateSnapshot) {
        self.snapshots.write().await.insert(key(serial), snapshot);
    }

    /// Make polls and subscribes of `serial` fail (or succeed again).
    pub async fn set_unreachable(&self, serial: &str, unreachable: bool) {
        let mut set = self.unreachable.write().await;
        if unreachable {
            set.insert(key(serial));
        } else {
            set.remove(&key(serial));
        }
    }

    /// Delay every poll response by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Deliver a snapshot to every open subscription of `serial`.
    ///
    /// The snapshot also becomes the poll answer. Returns how many
    /// subscribers received it.
    pub async fn push(&self, serial: &str, snapshot: DeviceStateSnapshot) -> usize {
        self.set_snapshot(serial, snapshot.clone()).await;

        let senders = {
            let mut subscribers = self.subscribers.write().await;
            let senders = subscribers.entry(key(serial)).or_default();
            senders.retain(|s| !s.is_closed());
            senders.clone()
        };

        let mut delivered = 0;
        for sender in senders {
            if sender.send(Ok(snapshot.clone())).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// End every open subscription of `serial`, as a dropped connection would.
    pub async fn close_streams(&self, serial: &str) {
        let senders = self
            .subscribers
            .write()
            .await
            .remove(&key(serial))
            .unwrap_or_default();
        for sender in senders {
            sender.try_send(Err(Error::PushStreamClosed(serial.to_string())));
        }
    }

    /// Number of open subscriptions for `serial`.
    pub async fn subscriber_count(&self, serial: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(&key(serial))
            .map_or(0, |senders| senders.iter().filter(|s| !s.is_closed()).count())
    }

    /// Number of `get_snapshot` calls so far.
    pub fn snapshot_count(&self) -> u32 {
        self.snapshot_count.load(Ordering::Relaxed)
    }

    /// Number of successful `subscribe` calls so far.
    pub fn subscribe_count(&self) -> u32 {
        self.subscribe_count.load(Ordering::Relaxed)
    }

    fn check_configured(&self, device: &DeviceIdentity) -> Result<()> {
        if self
            .devices
            .iter()
            .any(|d| d.serial.eq_ignore_ascii_case(&device.serial))
        {
            Ok(())
        } else {
            Err(Error::NotConfigured(device.serial.clone()))
        }
    }

    async fn check_reachable(&self, device: &DeviceIdentity) -> Result<()> {
        if self.unreachable.read().await.contains(&key(&device.serial)) {
            return Err(Error::unreachable(&device.serial, "mock failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceClient for MockClient {
    async fn list_devices(&self) -> Result<Vec<DeviceIdentity>> {
        Ok(self.devices.clone())
    }

    async fn get_snapshot(&self, device: &DeviceIdentity) -> Result<DeviceStateSnapshot> {
        self.snapshot_count.fetch_add(1, Ordering::Relaxed);

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        self.check_configured(device)?;
        self.check_reachable(device).await?;

        self.snapshots
            .read()
            .await
            .get(&key(&device.serial))
            .cloned()
            .ok_or_else(|| Error::unreachable(&device.serial, "no state reported"))
    }

    async fn subscribe(&self, device: &DeviceIdentity) -> Result<SnapshotStream> {
        self.check_configured(device)?;
        self.check_reachable(device).await?;

        let (tx, stream) = SnapshotStream::channel(DEFAULT_BUFFER_SIZE);
        self.subscribers
            .write()
            .await
            .entry(key(&device.serial))
            .or_default()
            .push(tx);
        self.subscribe_count.fetch_add(1, Ordering::Relaxed);
        Ok(stream)
    }

    async fn disconnect_all(&self) {
        self.subscribers.write().await.clear();
    }
}
