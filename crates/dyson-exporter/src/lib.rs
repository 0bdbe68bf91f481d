//! Prometheus exporter for Dyson Link fans and purifiers.
//!
//! This crate provides a service that:
//! - Polls configured devices on a schedule
//! - Applies device-originated push updates as they arrive
//! - Maps each device's state onto a fixed set of `dyson_*` metrics
//! - Serves them at `GET /metrics` in the Prometheus text format
//!
//! # HTTP Endpoints
//!
//! - `GET /metrics` - Prometheus exposition
//! - `GET /api/health` - Service health check
//! - `GET /api/status` - Collector state and per-device statistics
//! - `GET /api/devices/{serial}` - Statistics for one device
//!
//! # Configuration
//!
//! The exporter reads configuration from `~/.config/dyson-exporter/config.toml`:
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8091"
//!
//! [collector]
//! poll_interval = 30
//!
//! [[devices]]
//! name = "Living room"
//! serial = "AB1-UK-AAA0111A"
//! localcredentials = "..."
//! producttype = "475"
//! ```
//!
//! Devices without an entry under `[hosts]` are located with mDNS.

pub mod adapter;
pub mod api;
pub mod collector;
pub mod config;
pub mod registry;
pub mod schema;
pub mod state;

pub use adapter::{AdapterError, DeviceMetricsAdapter, MetricUpdate};
pub use collector::{Collector, CollectorError, CollectorOptions};
pub use config::{CollectorConfig, Config, ConfigError, DeviceConfig, ServerConfig};
pub use registry::{MetricKind, MetricRegistry, RegistryError, Sample};
pub use state::{AppState, CollectorState, DeviceCollectionStats, DeviceStatus, Trigger};
