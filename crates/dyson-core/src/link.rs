//! Device client over the devices' local MQTT broker.
//!
//! Every Dyson Link device runs its own broker on port 1883. [`LinkClient`]
//! keeps one connection per device, opened lazily on first use:
//!
//! 1. The broker address comes from the configured host overrides, or from
//!    an mDNS browse when no override exists.
//! 2. The client authenticates with the serial as username and the local
//!    credential as password, then subscribes to the status topic.
//! 3. Each incoming message is merged into a [`DeviceView`] and the full
//!    merged snapshot is broadcast to subscribers.
//!
//! A connection that fails is torn down; push streams built on it end with
//! [`Error::PushStreamClosed`] and the next call opens a fresh connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dyson_types::{DeviceIdentity, DeviceStateSnapshot};

use crate::discovery::{self, DEFAULT_DISCOVERY_TIMEOUT};
use crate::error::{Error, Result};
use crate::protocol::{self, DeviceView, MQTT_PORT, Request};
use crate::streaming::{DEFAULT_BUFFER_SIZE, SnapshotStream};
use crate::traits::DeviceClient;

/// Capacity of the rumqttc request channel per connection.
const REQUEST_CHANNEL_CAPACITY: usize = 32;

/// A configured device together with its local broker credential.
#[derive(Debug, Clone)]
pub struct LinkDevice {
    /// Device identity.
    pub identity: DeviceIdentity,
    /// Local MQTT password from the device cache.
    pub credential: String,
}

/// Connection options for [`LinkClient`].
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Broker port on the device.
    pub port: u16,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// How long `get_snapshot` waits for the device to answer.
    pub request_timeout: Duration,
    /// How long to browse mDNS for a device without a host override.
    pub discovery_timeout: Duration,
    /// Buffer size of push subscription streams.
    pub buffer_size: usize,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            port: MQTT_PORT,
            keep_alive: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl LinkOptions {
    /// Set the request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the mDNS discovery timeout.
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "request_timeout must be > 0".to_string(),
            ));
        }
        if self.keep_alive < Duration::from_secs(5) {
            return Err(Error::InvalidConfig(
                "keep_alive must be at least 5 seconds".to_string(),
            ));
        }
        Ok(())
    }
}

struct Connection {
    client: AsyncClient,
    updates: broadcast::Sender<DeviceStateSnapshot>,
    view: Mutex<DeviceView>,
    alive: AtomicBool,
    cancel: CancellationToken,
}

impl Connection {
    fn open(device: &LinkDevice, host: String, options: &LinkOptions) -> Arc<Self> {
        let identity = &device.identity;
        let mut mqtt_options =
            MqttOptions::new(format!("dyson-exporter-{}", identity.serial), host, options.port);
        mqtt_options.set_keep_alive(options.keep_alive);
        mqtt_options.set_credentials(&identity.serial, &device.credential);

        let (client, eventloop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (updates, _) = broadcast::channel(options.buffer_size.max(1));

        let connection = Arc::new(Self {
            client,
            updates,
            view: Mutex::new(DeviceView::new()),
            alive: AtomicBool::new(true),
            cancel: CancellationToken::new(),
        });

        tokio::spawn(run_event_loop(
            Arc::clone(&connection),
            identity.clone(),
            eventloop,
        ));
        connection
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.cancel.is_cancelled()
    }

    fn close(&self) {
        self.alive.store(false, Ordering::Release);
        self.cancel.cancel();
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect request not queued: {}", e);
        }
    }

    /// Queue read-only refresh requests.
    fn request(&self, identity: &DeviceIdentity) -> Result<()> {
        let topic = protocol::command_topic(&identity.product_type, &identity.serial);
        let now = OffsetDateTime::now_utc();
        for request in [Request::CurrentState, Request::EnvironmentalData] {
            self.client
                .try_publish(&topic, QoS::AtMostOnce, false, request.encode(now)?)?;
        }
        Ok(())
    }

    fn handle_payload(&self, identity: &DeviceIdentity, payload: &[u8]) {
        let message = match protocol::decode(identity.generation, payload) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping undecodable message from {}: {}", identity, e);
                return;
            }
        };

        let snapshot = {
            let mut view = self.view.lock();
            if !view.apply(message, OffsetDateTime::now_utc()) {
                return;
            }
            view.snapshot()
        };
        // No receivers is fine: nobody is waiting right now.
        let _ = self.updates.send(snapshot);
    }
}

async fn run_event_loop(connection: Arc<Connection>, identity: DeviceIdentity, mut eventloop: EventLoop) {
    let status_topic = protocol::status_topic(&identity.product_type, &identity.serial);

    loop {
        let event = tokio::select! {
            _ = connection.cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to {}", identity);
                if let Err(e) = connection.client.try_subscribe(&status_topic, QoS::AtMostOnce) {
                    warn!("Failed to subscribe to {}: {}", status_topic, e);
                }
                if let Err(e) = connection.request(&identity) {
                    warn!("Failed to request state from {}: {}", identity, e);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                connection.handle_payload(&identity, &publish.payload);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Connection to {} lost: {}", identity, e);
                break;
            }
        }
    }

    connection.alive.store(false, Ordering::Release);
    connection.cancel.cancel();
    debug!("Event loop for {} stopped", identity);
}

/// [`DeviceClient`] talking to devices over their local MQTT broker.
pub struct LinkClient {
    devices: Vec<LinkDevice>,
    hosts: HashMap<String, String>,
    options: LinkOptions,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
}

impl LinkClient {
    /// Create a client for `devices`.
    ///
    /// `hosts` maps serials (any case) to broker addresses and bypasses mDNS
    /// discovery for those devices.
    pub fn new(
        devices: Vec<LinkDevice>,
        hosts: HashMap<String, String>,
        options: LinkOptions,
    ) -> Result<Self> {
        options.validate()?;
        let hosts = hosts
            .into_iter()
            .map(|(serial, host)| (serial.to_ascii_uppercase(), host))
            .collect();

        Ok(Self {
            devices,
            hosts,
            options,
            connections: Mutex::new(HashMap::new()),
        })
    }

    fn device(&self, identity: &DeviceIdentity) -> Result<&LinkDevice> {
        self.devices
            .iter()
            .find(|d| d.identity.serial.eq_ignore_ascii_case(&identity.serial))
            .ok_or_else(|| Error::NotConfigured(identity.serial.clone()))
    }

    /// Broker address for a device: host override first, then mDNS.
    async fn resolve_host(&self, serial: &str) -> Result<String> {
        if let Some(host) = self.hosts.get(&serial.to_ascii_uppercase()) {
            return Ok(host.clone());
        }
        let addr = discovery::resolve_host(serial, self.options.discovery_timeout).await?;
        Ok(addr.to_string())
    }

    async fn connection(&self, identity: &DeviceIdentity) -> Result<Arc<Connection>> {
        let key = identity.serial.to_ascii_uppercase();
        let existing = self
            .connections
            .lock()
            .get(&key)
            .filter(|c| c.is_alive())
            .cloned();
        if let Some(existing) = existing {
            return Ok(existing);
        }

        let device = self.device(identity)?;
        // Resolved without holding the map lock; discovery can take seconds.
        let host = self.resolve_host(&identity.serial).await?;
        debug!("Opening connection to {} at {}", identity, host);
        let connection = Connection::open(device, host, &self.options);

        let mut connections = self.connections.lock();
        match connections.get(&key) {
            Some(existing) if existing.is_alive() => {
                connection.close();
                Ok(Arc::clone(existing))
            }
            _ => {
                if let Some(stale) = connections.insert(key, Arc::clone(&connection)) {
                    stale.close();
                }
                Ok(connection)
            }
        }
    }
}

#[async_trait]
impl DeviceClient for LinkClient {
    async fn list_devices(&self) -> Result<Vec<DeviceIdentity>> {
        Ok(self.devices.iter().map(|d| d.identity.clone()).collect())
    }

    async fn get_snapshot(&self, device: &DeviceIdentity) -> Result<DeviceStateSnapshot> {
        let connection = self.connection(device).await?;
        let mut updates = connection.updates.subscribe();
        let requested_at = OffsetDateTime::now_utc();
        connection.request(device)?;

        let wait = async {
            loop {
                match updates.recv().await {
                    Ok(snapshot)
                        if snapshot.state_updated_at.is_some()
                            && snapshot
                                .environment_updated_at
                                .is_some_and(|at| at >= requested_at) =>
                    {
                        return Ok(snapshot);
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => {
                        return Err(Error::unreachable(&device.serial, "connection closed"));
                    }
                }
            }
        };

        let timeout = self.options.request_timeout;
        tokio::select! {
            _ = connection.cancel.cancelled() => {
                Err(Error::unreachable(&device.serial, "connection lost"))
            }
            result = tokio::time::timeout(timeout, wait) => {
                result.map_err(|_| Error::timeout("get_snapshot", timeout))?
            }
        }
    }

    async fn subscribe(&self, device: &DeviceIdentity) -> Result<SnapshotStream> {
        let connection = self.connection(device).await?;
        let (tx, stream) = SnapshotStream::channel(self.options.buffer_size);
        let mut updates = connection.updates.subscribe();
        let serial = device.serial.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = connection.cancel.cancelled() => {
                        tx.try_send(Err(Error::PushStreamClosed(serial.clone())));
                        break;
                    }
                    update = updates.recv() => match update {
                        Ok(snapshot) => {
                            if !tx.send(Ok(snapshot)).await {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!("Push subscription for {} lagged, skipped {} updates", serial, n);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("Push forwarding for {} stopped", serial);
        });

        Ok(stream)
    }

    async fn disconnect_all(&self) {
        let connections: Vec<_> = self.connections.lock().drain().collect();
        for (serial, connection) in connections {
            debug!("Closing connection to {}", serial);
            connection.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(serial: &str) -> LinkDevice {
        LinkDevice {
            identity: DeviceIdentity::new(serial, "Bedroom", "438", true).unwrap(),
            credential: "secret".to_string(),
        }
    }

    #[test]
    fn test_default_options() {
        let opts = LinkOptions::default();
        assert_eq!(opts.port, 1883);
        assert_eq!(opts.request_timeout, Duration::from_secs(10));
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_invalid_options_rejected() {
        let opts = LinkOptions::default().request_timeout(Duration::ZERO);
        let result = LinkClient::new(vec![], HashMap::new(), opts);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));

        let opts = LinkOptions {
            keep_alive: Duration::from_secs(1),
            ..Default::default()
        };
        let result = LinkClient::new(vec![], HashMap::new(), opts);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_list_devices() {
        let client = LinkClient::new(
            vec![device("AAA-1"), device("BBB-2")],
            HashMap::new(),
            LinkOptions::default(),
        )
        .unwrap();
        let serials: Vec<_> = client
            .list_devices()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.serial)
            .collect();
        assert_eq!(serials, vec!["AAA-1", "BBB-2"]);
    }

    #[tokio::test]
    async fn test_host_override_is_case_insensitive() {
        let hosts = HashMap::from([("aaa-1".to_string(), "192.168.1.20".to_string())]);
        let client = LinkClient::new(vec![device("AAA-1")], hosts, LinkOptions::default()).unwrap();
        assert_eq!(client.resolve_host("AAA-1").await.unwrap(), "192.168.1.20");
    }

    #[tokio::test]
    async fn test_unconfigured_device() {
        let client = LinkClient::new(vec![], HashMap::new(), LinkOptions::default()).unwrap();
        let stranger = DeviceIdentity::new("ZZZ-9", "Stranger", "475", true).unwrap();
        let err = client.get_snapshot(&stranger).await.unwrap_err();
        assert!(matches!(err, Error::NotConfigured(_)));
        assert!(client.connections.lock().is_empty());
    }
}
