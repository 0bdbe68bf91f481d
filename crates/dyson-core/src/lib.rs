//! Local-network client library for Dyson Link fans and purifiers.
//!
//! This crate talks to devices over the MQTT broker each device runs on its
//! local network interface, decodes their state messages and presents the
//! result as [`DeviceStateSnapshot`](dyson_types::DeviceStateSnapshot)s.
//!
//! # Features
//!
//! - **Polling**: request the current state and sensor data on demand
//! - **Push subscriptions**: stream of snapshots on every device-originated change
//! - **Discovery**: resolve device addresses over mDNS when no host is configured
//! - **Backoff**: configurable re-subscription delays
//! - **Testing**: an in-memory [`MockClient`] behind the same [`DeviceClient`] trait
//!
//! # Supported Devices
//!
//! | Generation | Models |
//! |------------|--------|
//! | V1 | Pure Cool Link (desk, tower), Pure Hot+Cool Link |
//! | V2 | Pure Cool, Pure Hot+Cool, Pure Humidify+Cool, and formaldehyde variants |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::collections::HashMap;
//!
//! use dyson_core::{DeviceClient, LinkClient, LinkDevice, LinkOptions};
//! use dyson_types::DeviceIdentity;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let identity = DeviceIdentity::new("AB1-UK-AAA0111A", "Living room", "475", true)?;
//!     let device = LinkDevice { identity: identity.clone(), credential: "secret".into() };
//!     let hosts = HashMap::from([("AB1-UK-AAA0111A".to_string(), "192.168.1.2".to_string())]);
//!
//!     let client = LinkClient::new(vec![device], hosts, LinkOptions::default())?;
//!     let snapshot = client.get_snapshot(&identity).await?;
//!     println!("Humidity: {:?}%", snapshot.humidity);
//!     Ok(())
//! }
//! ```

pub mod discovery;
pub mod error;
pub mod link;
pub mod mock;
pub mod protocol;
pub mod reconnect;
pub mod streaming;
pub mod traits;

pub use error::{Error, Result};
pub use link::{LinkClient, LinkDevice, LinkOptions};
pub use mock::MockClient;
pub use protocol::{DeviceView, Message};
pub use reconnect::ReconnectOptions;
pub use streaming::{SnapshotResult, SnapshotSender, SnapshotStream};
pub use traits::DeviceClient;

// Re-export the shared types crate for convenience.
pub use dyson_types;
