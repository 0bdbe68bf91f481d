//! Application state shared across handlers and collector tasks.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use time::OffsetDateTime;

use dyson_types::{DeviceIdentity, Generation};

use crate::config::Config;
use crate::registry::MetricRegistry;

/// Shared application state.
pub struct AppState {
    /// The metric registry scraped by `/metrics`.
    pub registry: Arc<MetricRegistry>,
    /// Collector status, shared with the collector tasks.
    pub collector: Arc<CollectorState>,
    /// Configuration the exporter was started with.
    pub config: Config,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        registry: Arc<MetricRegistry>,
        collector: Arc<CollectorState>,
        config: Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            collector,
            config,
        })
    }
}

/// What caused a snapshot to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Periodic poll.
    Poll,
    /// Device-originated push notification.
    Push,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Poll => write!(f, "poll"),
            Trigger::Push => write!(f, "push"),
        }
    }
}

/// Lifecycle of a monitored device.
///
/// A device becomes `Connected` on its first successful update and stays
/// there; later failures only leave its metrics stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Unconfigured,
    Connected,
}

/// State for tracking the collector.
pub struct CollectorState {
    running: AtomicBool,
    /// When the collector was started (Unix timestamp).
    started_at: AtomicU64,
    devices: RwLock<Vec<DeviceCollectionStats>>,
}

impl CollectorState {
    /// Create a new collector state.
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            started_at: AtomicU64::new(0),
            devices: RwLock::new(Vec::new()),
        }
    }

    /// Check if the collector is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Mark the collector as started or stopped.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        if running {
            let now = OffsetDateTime::now_utc().unix_timestamp() as u64;
            self.started_at.store(now, Ordering::SeqCst);
        }
    }

    /// Get the collector start time.
    pub fn started_at(&self) -> Option<OffsetDateTime> {
        let ts = self.started_at.load(Ordering::SeqCst);
        if ts == 0 {
            None
        } else {
            OffsetDateTime::from_unix_timestamp(ts as i64).ok()
        }
    }

    /// Start tracking a device. Tracking the same serial twice is a no-op.
    pub fn track(&self, identity: &DeviceIdentity) {
        let mut devices = self.devices.write();
        if devices.iter().any(|d| d.serial == identity.serial) {
            return;
        }
        devices.push(DeviceCollectionStats::new(identity));
    }

    /// Record a successful update.
    ///
    /// Returns `true` if this was the device's first successful update.
    pub fn record_success(&self, serial: &str, trigger: Trigger) -> bool {
        self.with_device(serial, |stats| {
            match trigger {
                Trigger::Poll => stats.poll_success_count += 1,
                Trigger::Push => stats.push_success_count += 1,
            }
            stats.consecutive_failures = 0;
            stats.last_update_at = Some(OffsetDateTime::now_utc());
            let first = stats.status == DeviceStatus::Unconfigured;
            stats.status = DeviceStatus::Connected;
            first
        })
        .unwrap_or(false)
    }

    /// Record a failed update.
    ///
    /// Returns the number of consecutive failures, including this one.
    pub fn record_failure(&self, serial: &str, trigger: Trigger, error: &str) -> u32 {
        self.with_device(serial, |stats| {
            match trigger {
                Trigger::Poll => stats.poll_failure_count += 1,
                Trigger::Push => stats.push_failure_count += 1,
            }
            stats.consecutive_failures += 1;
            stats.last_error_at = Some(OffsetDateTime::now_utc());
            stats.last_error = Some(error.to_string());
            stats.consecutive_failures
        })
        .unwrap_or(0)
    }

    /// Record whether a push subscription is currently open.
    pub fn set_subscribed(&self, serial: &str, subscribed: bool) {
        self.with_device(serial, |stats| stats.subscribed = subscribed);
    }

    /// Stats for a single device.
    pub fn device(&self, serial: &str) -> Option<DeviceCollectionStats> {
        self.devices
            .read()
            .iter()
            .find(|d| d.serial == serial)
            .cloned()
    }

    /// Stats for every tracked device, in tracking order.
    pub fn devices(&self) -> Vec<DeviceCollectionStats> {
        self.devices.read().clone()
    }

    fn with_device<T>(
        &self,
        serial: &str,
        f: impl FnOnce(&mut DeviceCollectionStats) -> T,
    ) -> Option<T> {
        self.devices
            .write()
            .iter_mut()
            .find(|d| d.serial == serial)
            .map(f)
    }
}

impl Default for CollectorState {
    fn default() -> Self {
        Self::new()
    }
}

/// Collection statistics for a single device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceCollectionStats {
    pub serial: String,
    pub name: String,
    pub product_type: String,
    pub generation: Generation,
    pub status: DeviceStatus,
    pub poll_success_count: u64,
    pub poll_failure_count: u64,
    pub push_success_count: u64,
    pub push_failure_count: u64,
    /// Failures since the last successful update, from either trigger.
    pub consecutive_failures: u32,
    /// Whether a push subscription is open.
    pub subscribed: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_update_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_error_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
}

impl DeviceCollectionStats {
    fn new(identity: &DeviceIdentity) -> Self {
        Self {
            serial: identity.serial.clone(),
            name: identity.name.clone(),
            product_type: identity.product_type.clone(),
            generation: identity.generation,
            status: DeviceStatus::Unconfigured,
            poll_success_count: 0,
            poll_failure_count: 0,
            push_success_count: 0,
            push_failure_count: 0,
            consecutive_failures: 0,
            subscribed: false,
            last_update_at: None,
            last_error_at: None,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new("AAA-1", "Hall", "438", true).unwrap()
    }

    #[test]
    fn test_collector_state_running() {
        let collector = CollectorState::new();
        assert!(!collector.is_running());
        assert!(collector.started_at().is_none());

        collector.set_running(true);
        assert!(collector.is_running());
        assert!(collector.started_at().is_some());

        collector.set_running(false);
        assert!(!collector.is_running());
    }

    #[test]
    fn test_track_is_idempotent() {
        let collector = CollectorState::new();
        collector.track(&identity());
        collector.track(&identity());
        assert_eq!(collector.devices().len(), 1);

        let stats = collector.device("AAA-1").unwrap();
        assert_eq!(stats.status, DeviceStatus::Unconfigured);
        assert_eq!(stats.generation, Generation::V2);
    }

    #[test]
    fn test_first_success_connects() {
        let collector = CollectorState::new();
        collector.track(&identity());

        assert!(collector.record_success("AAA-1", Trigger::Push));
        assert!(!collector.record_success("AAA-1", Trigger::Poll));

        let stats = collector.device("AAA-1").unwrap();
        assert_eq!(stats.status, DeviceStatus::Connected);
        assert_eq!(stats.push_success_count, 1);
        assert_eq!(stats.poll_success_count, 1);
        assert!(stats.last_update_at.is_some());
    }

    #[test]
    fn test_failures_keep_status() {
        let collector = CollectorState::new();
        collector.track(&identity());
        collector.record_success("AAA-1", Trigger::Poll);

        assert_eq!(collector.record_failure("AAA-1", Trigger::Poll, "timeout"), 1);
        assert_eq!(collector.record_failure("AAA-1", Trigger::Push, "closed"), 2);

        let stats = collector.device("AAA-1").unwrap();
        assert_eq!(stats.status, DeviceStatus::Connected);
        assert_eq!(stats.last_error.as_deref(), Some("closed"));
        assert_eq!(stats.poll_failure_count, 1);
        assert_eq!(stats.push_failure_count, 1);

        collector.record_success("AAA-1", Trigger::Push);
        assert_eq!(collector.device("AAA-1").unwrap().consecutive_failures, 0);
    }

    #[test]
    fn test_untracked_device_is_ignored() {
        let collector = CollectorState::new();
        assert!(!collector.record_success("NOPE", Trigger::Poll));
        assert_eq!(collector.record_failure("NOPE", Trigger::Poll, "x"), 0);
        assert!(collector.device("NOPE").is_none());
    }

    #[test]
    fn test_stats_serialization() {
        let collector = CollectorState::new();
        collector.track(&identity());
        collector.set_subscribed("AAA-1", true);

        let json = serde_json::to_value(collector.device("AAA-1").unwrap()).unwrap();
        assert_eq!(json["status"], "unconfigured");
        assert_eq!(json["generation"], "V2");
        assert_eq!(json["subscribed"], true);
        assert!(json["last_update_at"].is_null());
    }
}
