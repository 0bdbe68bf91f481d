//! Trait abstraction over device clients.
//!
//! The [`DeviceClient`] trait is the boundary between the exporter and
//! whatever talks to the devices: the real [`LinkClient`](crate::LinkClient)
//! or the [`MockClient`](crate::MockClient) used in tests.

use async_trait::async_trait;

use dyson_types::{DeviceIdentity, DeviceStateSnapshot};

use crate::error::Result;
use crate::streaming::SnapshotStream;

/// Source of device state.
///
/// # Example
///
/// ```ignore
/// use dyson_core::DeviceClient;
///
/// async fn print_power<C: DeviceClient>(client: &C) -> dyson_core::Result<()> {
///     for device in client.list_devices().await? {
///         let snapshot = client.get_snapshot(&device).await?;
///         println!("{}: {:?}", device, snapshot.power);
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// All devices known to this client.
    async fn list_devices(&self) -> Result<Vec<DeviceIdentity>>;

    /// Request the latest state of a device.
    ///
    /// Fails with [`Error::DeviceUnreachable`](crate::Error::DeviceUnreachable)
    /// or [`Error::Timeout`](crate::Error::Timeout) when the device does not answer.
    async fn get_snapshot(&self, device: &DeviceIdentity) -> Result<DeviceStateSnapshot>;

    /// Subscribe to device-originated state changes.
    ///
    /// The returned stream yields a new snapshot on every change and ends when
    /// the underlying connection is lost; callers are expected to subscribe
    /// again.
    async fn subscribe(&self, device: &DeviceIdentity) -> Result<SnapshotStream>;

    /// Release all device connections.
    ///
    /// The default implementation does nothing.
    async fn disconnect_all(&self) {}
}
