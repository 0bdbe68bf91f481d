//! Background collector.
//!
//! Keeps the registry up to date from two independent sources per device:
//! a periodic poll of every monitored device, and a long-lived push
//! subscription that applies each device-originated change as it arrives.
//! A failure for one device never affects another device or the scrape path;
//! its metrics just keep their last values.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dyson_core::{DeviceClient, ReconnectOptions};

use crate::adapter::{AdapterError, DeviceMetricsAdapter};
use crate::config::CollectorConfig;
use crate::registry::MetricRegistry;
use crate::state::{CollectorState, Trigger};

/// Collector timing and device selection.
#[derive(Debug, Clone)]
pub struct CollectorOptions {
    /// Time between polls.
    pub poll_interval: Duration,
    /// Upper bound for a single poll.
    pub request_timeout: Duration,
    /// Also monitor devices marked inactive.
    pub include_inactive_devices: bool,
    /// Backoff for re-subscribing after a push stream ends.
    pub reconnect: ReconnectOptions,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self::from(&CollectorConfig::default())
    }
}

impl From<&CollectorConfig> for CollectorOptions {
    fn from(config: &CollectorConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            request_timeout: config.request_timeout(),
            include_inactive_devices: config.include_inactive_devices,
            reconnect: config.reconnect(),
        }
    }
}

/// Collector errors.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Collector is already started")]
    AlreadyStarted,
    #[error("Failed to list devices: {0}")]
    ListDevices(dyson_core::Error),
    #[error(transparent)]
    Client(#[from] dyson_core::Error),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Background collector feeding the metric registry.
pub struct Collector {
    client: Arc<dyn DeviceClient>,
    registry: Arc<MetricRegistry>,
    state: Arc<CollectorState>,
    options: CollectorOptions,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Collector {
    /// Create a new collector.
    pub fn new(
        client: Arc<dyn DeviceClient>,
        registry: Arc<MetricRegistry>,
        state: Arc<CollectorState>,
        options: CollectorOptions,
    ) -> Self {
        Self {
            client,
            registry,
            state,
            options,
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Start collecting from every monitored device.
    ///
    /// Spawns one poll task for all devices and one push task per device, then
    /// returns the number of monitored devices. Collection happens in the
    /// background until [`shutdown`](Self::shutdown). A collector starts at
    /// most once; later calls fail with [`CollectorError::AlreadyStarted`].
    pub async fn start(&self) -> Result<usize, CollectorError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(CollectorError::AlreadyStarted);
        }

        let devices = self
            .client
            .list_devices()
            .await
            .map_err(CollectorError::ListDevices)?;

        let adapters: Vec<_> = devices
            .into_iter()
            .filter(|device| {
                if device.active || self.options.include_inactive_devices {
                    true
                } else {
                    info!("Skipping inactive device {}", device);
                    false
                }
            })
            .map(|device| DeviceMetricsAdapter::new(Arc::clone(&self.registry), device))
            .collect();

        if adapters.is_empty() {
            info!("No devices to monitor");
            return Ok(0);
        }

        info!(
            "Starting collector for {} device(s) (poll interval: {}s)",
            adapters.len(),
            self.options.poll_interval.as_secs()
        );

        let mut handles = self.handles.lock();
        for adapter in &adapters {
            self.state.track(adapter.identity());
            handles.push(tokio::spawn(push_loop(
                Arc::clone(&self.client),
                adapter.clone(),
                Arc::clone(&self.state),
                self.options.reconnect.clone(),
                self.cancel.clone(),
            )));
        }

        let count = adapters.len();
        handles.push(tokio::spawn(poll_loop(
            Arc::clone(&self.client),
            adapters,
            Arc::clone(&self.state),
            self.options.clone(),
            self.cancel.clone(),
        )));
        self.state.set_running(true);

        Ok(count)
    }

    /// Stop all collector tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("Collector task ended abnormally: {}", e);
            }
        }
        self.state.set_running(false);
        info!("Collector stopped");
    }
}

async fn poll_loop(
    client: Arc<dyn DeviceClient>,
    adapters: Vec<DeviceMetricsAdapter>,
    state: Arc<CollectorState>,
    options: CollectorOptions,
    cancel: CancellationToken,
) {
    let mut timer = interval(options.poll_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = timer.tick() => {}
        }

        let polls = adapters
            .iter()
            .map(|adapter| poll_device(client.as_ref(), adapter, &state, options.request_timeout));

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = join_all(polls) => {}
        }
    }
    debug!("Poll task stopped");
}

async fn poll_device(
    client: &dyn DeviceClient,
    adapter: &DeviceMetricsAdapter,
    state: &CollectorState,
    request_timeout: Duration,
) {
    let identity = adapter.identity();
    let result = match timeout(request_timeout, client.get_snapshot(identity)).await {
        Ok(Ok(snapshot)) => adapter.apply(&snapshot).map_err(CollectorError::from),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(dyson_core::Error::timeout("get_snapshot", request_timeout).into()),
    };
    record(state, adapter, Trigger::Poll, result);
}

async fn push_loop(
    client: Arc<dyn DeviceClient>,
    adapter: DeviceMetricsAdapter,
    state: Arc<CollectorState>,
    reconnect: ReconnectOptions,
    cancel: CancellationToken,
) {
    let identity = adapter.identity();
    let mut attempt = 0u32;

    loop {
        let subscription = tokio::select! {
            _ = cancel.cancelled() => break,
            result = client.subscribe(identity) => result,
        };

        let ended = match subscription {
            Ok(mut stream) => {
                debug!("Subscribed to push updates from {}", identity);
                state.set_subscribed(&identity.serial, true);
                let ended = loop {
                    let item = tokio::select! {
                        _ = cancel.cancelled() => None,
                        item = stream.next() => Some(item),
                    };
                    match item {
                        None => {
                            stream.close();
                            state.set_subscribed(&identity.serial, false);
                            debug!("Push task for {} stopped", identity);
                            return;
                        }
                        Some(Some(Ok(snapshot))) => {
                            attempt = 0;
                            let result = adapter.apply(&snapshot).map_err(CollectorError::from);
                            record(&state, &adapter, Trigger::Push, result);
                        }
                        Some(Some(Err(e))) => break CollectorError::from(e),
                        Some(None) => {
                            break CollectorError::from(dyson_core::Error::PushStreamClosed(
                                identity.serial.clone(),
                            ));
                        }
                    }
                };
                state.set_subscribed(&identity.serial, false);
                ended
            }
            Err(e) => CollectorError::from(e),
        };

        record(&state, &adapter, Trigger::Push, Err(ended));

        if !reconnect.should_retry(attempt + 1) {
            error!(
                "Giving up on push updates from {} after {} attempts",
                identity,
                attempt + 1
            );
            break;
        }
        let delay = reconnect.delay_for_attempt(attempt);
        attempt += 1;
        debug!("Re-subscribing to {} in {:?}", identity, delay);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(delay) => {}
        }
    }
}

/// Record the outcome of an update and log it.
///
/// Failures are logged as warnings for the first three in a row, once as an
/// error on the fourth, then silently until the device recovers.
fn record(
    state: &CollectorState,
    adapter: &DeviceMetricsAdapter,
    trigger: Trigger,
    result: Result<usize, CollectorError>,
) {
    let identity = adapter.identity();
    match result {
        Ok(written) => {
            if state.record_success(&identity.serial, trigger) {
                info!("{} connected ({} metrics from {})", identity, written, trigger);
            } else {
                debug!("Applied {} update from {}: {} metrics", trigger, identity, written);
            }
        }
        Err(e) => {
            let failures = state.record_failure(&identity.serial, trigger, &e.to_string());
            if failures <= 3 {
                warn!(
                    "Failed {} update from {}: {} (attempt {})",
                    trigger, identity, e, failures
                );
            } else if failures == 4 {
                error!(
                    "Failed to update {} after {} attempts, will continue trying silently",
                    identity, failures
                );
            }
        }
    }
}
