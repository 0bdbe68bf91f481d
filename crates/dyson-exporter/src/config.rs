//! Exporter configuration.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8091"
//!
//! [collector]
//! poll_interval = 30      # seconds
//! request_timeout = 10    # seconds
//! include_inactive_devices = false
//! resubscribe_initial_delay = 1   # seconds, doubled per failed attempt
//! resubscribe_max_delay = 60      # seconds
//!
//! [hosts]
//! "AB1-UK-AAA0111A" = "192.168.1.2"
//!
//! [[devices]]
//! name = "Living room"
//! serial = "AB1-UK-AAA0111A"
//! localcredentials = "..."
//! producttype = "475"
//! active = true
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use dyson_core::{LinkDevice, LinkOptions, ReconnectOptions};
use dyson_types::{DeviceIdentity, ParseError, ProductType};

/// Exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Poll and push settings.
    pub collector: CollectorConfig,
    /// Serial to broker address overrides; bypasses mDNS discovery.
    pub hosts: BTreeMap<String, String>,
    /// Devices to export.
    pub devices: Vec<DeviceConfig>,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    ///
    /// Host override keys are upper-cased.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        let mut config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        config.hosts = std::mem::take(&mut config.hosts)
            .into_iter()
            .map(|(serial, host)| (serial.to_ascii_uppercase(), host))
            .collect();
        Ok(config)
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - Server bind address is valid (host:port format)
    /// - Poll interval and request timeout are within bounds
    /// - Devices have a name, serial, credential and supported product type
    /// - No duplicate serials
    ///
    /// Unknown product types are accepted (treated as V1) with a warning.
    ///
    /// # Example
    ///
    /// ```
    /// use dyson_exporter::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.collector.validate());

        for (serial, host) in &self.hosts {
            if host.trim().is_empty() {
                errors.push(ValidationError {
                    field: format!("hosts.{}", serial),
                    message: "host cannot be empty".to_string(),
                });
            }
        }

        let mut seen_serials = HashSet::new();
        for (i, device) in self.devices.iter().enumerate() {
            let prefix = format!("devices[{}]", i);
            errors.extend(device.validate(&prefix));

            if !seen_serials.insert(device.serial.to_ascii_uppercase()) {
                errors.push(ValidationError {
                    field: format!("{}.serial", prefix),
                    message: format!("duplicate device serial '{}'", device.serial),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Devices with their broker credentials, ready for the link client.
    pub fn link_devices(&self) -> Result<Vec<LinkDevice>, ConfigError> {
        self.devices
            .iter()
            .map(|device| {
                Ok(LinkDevice {
                    identity: device.identity()?,
                    credential: device.localcredentials.clone(),
                })
            })
            .collect()
    }

    /// Link client options derived from the collector settings.
    pub fn link_options(&self) -> LinkOptions {
        LinkOptions::default()
            .request_timeout(self.collector.request_timeout())
            .discovery_timeout(Duration::from_secs(self.collector.discovery_timeout))
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8091").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8091".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: "bind address cannot be empty".to_string(),
            });
            return errors;
        }

        let Some((_, port)) = self.bind.rsplit_once(':') else {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            });
            return errors;
        };

        match port.parse::<u16>() {
            Ok(0) => errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: "port cannot be 0".to_string(),
            }),
            Err(_) => errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: format!("invalid port '{}': must be a number 1-65535", port),
            }),
            Ok(_) => {}
        }

        errors
    }

    /// Replace the port of the bind address.
    pub fn set_port(&mut self, port: u16) {
        let host = self
            .bind
            .rsplit_once(':')
            .map_or("0.0.0.0", |(host, _)| host);
        self.bind = format!("{}:{}", host, port);
    }
}

/// Minimum poll interval in seconds.
pub const MIN_POLL_INTERVAL: u64 = 5;
/// Maximum poll interval in seconds (1 hour).
pub const MAX_POLL_INTERVAL: u64 = 3600;

/// Collector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Seconds between polls of every device.
    pub poll_interval: u64,
    /// Seconds to wait for a device to answer a poll.
    pub request_timeout: u64,
    /// Seconds to browse mDNS for a device without a host override.
    pub discovery_timeout: u64,
    /// Also monitor devices marked inactive in the device cache.
    pub include_inactive_devices: bool,
    /// Seconds to wait before the first re-subscribe after a push stream ends.
    pub resubscribe_initial_delay: u64,
    /// Upper bound in seconds for the re-subscribe delay.
    pub resubscribe_max_delay: u64,
    /// Growth factor of the re-subscribe delay.
    pub resubscribe_backoff_multiplier: f64,
    /// Give up after this many failed re-subscribes in a row (unset = never).
    pub resubscribe_max_attempts: Option<u32>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            poll_interval: 30,
            request_timeout: 10,
            discovery_timeout: 5,
            include_inactive_devices: false,
            resubscribe_initial_delay: 1,
            resubscribe_max_delay: 60,
            resubscribe_backoff_multiplier: 2.0,
            resubscribe_max_attempts: None,
        }
    }
}

impl CollectorConfig {
    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Backoff used to re-subscribe to push updates.
    pub fn reconnect(&self) -> ReconnectOptions {
        let options = ReconnectOptions::new()
            .initial_delay(Duration::from_secs(self.resubscribe_initial_delay))
            .max_delay(Duration::from_secs(self.resubscribe_max_delay))
            .backoff_multiplier(self.resubscribe_backoff_multiplier);
        match self.resubscribe_max_attempts {
            Some(attempts) => options.max_attempts(attempts),
            None => options,
        }
    }

    /// Validate collector configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.poll_interval < MIN_POLL_INTERVAL {
            errors.push(ValidationError {
                field: "collector.poll_interval".to_string(),
                message: format!(
                    "poll interval {} is too short (minimum {} seconds)",
                    self.poll_interval, MIN_POLL_INTERVAL
                ),
            });
        } else if self.poll_interval > MAX_POLL_INTERVAL {
            errors.push(ValidationError {
                field: "collector.poll_interval".to_string(),
                message: format!(
                    "poll interval {} is too long (maximum {} seconds / 1 hour)",
                    self.poll_interval, MAX_POLL_INTERVAL
                ),
            });
        }

        if self.request_timeout == 0 {
            errors.push(ValidationError {
                field: "collector.request_timeout".to_string(),
                message: "request timeout must be at least 1 second".to_string(),
            });
        } else if self.request_timeout > self.poll_interval {
            errors.push(ValidationError {
                field: "collector.request_timeout".to_string(),
                message: format!(
                    "request timeout {} exceeds poll interval {}",
                    self.request_timeout, self.poll_interval
                ),
            });
        }

        if let Err(e) = self.reconnect().validate() {
            errors.push(ValidationError {
                field: "collector.resubscribe".to_string(),
                message: e.to_string(),
            });
        }
        if self.resubscribe_max_attempts == Some(0) {
            errors.push(ValidationError {
                field: "collector.resubscribe_max_attempts".to_string(),
                message: "max attempts must be at least 1".to_string(),
            });
        }

        if self.discovery_timeout == 0 {
            errors.push(ValidationError {
                field: "collector.discovery_timeout".to_string(),
                message: "discovery timeout must be at least 1 second".to_string(),
            });
        }

        errors
    }
}

/// A device entry, as found in the Dyson device cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Display name.
    pub name: String,
    /// Serial number.
    pub serial: String,
    /// Local MQTT credential.
    pub localcredentials: String,
    /// Product type code, e.g. "475".
    pub producttype: String,
    /// Whether the device is active in the Dyson account.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl DeviceConfig {
    /// Classify this entry into a device identity.
    pub fn identity(&self) -> Result<DeviceIdentity, ParseError> {
        DeviceIdentity::new(&self.serial, &self.name, &self.producttype, self.active)
    }

    /// Validate device configuration.
    pub fn validate(&self, prefix: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for (field, value) in [
            ("name", &self.name),
            ("serial", &self.serial),
            ("localcredentials", &self.localcredentials),
        ] {
            if value.trim().is_empty() {
                errors.push(ValidationError {
                    field: format!("{}.{}", prefix, field),
                    message: format!("{} cannot be empty", field),
                });
            }
        }

        match ProductType::from_code(&self.producttype) {
            Ok(Some(_)) => {}
            Ok(None) => warn!(
                "{}: unknown product type '{}' for {}, treating it as a V1 device",
                prefix, self.producttype, self.serial
            ),
            Err(e) => errors.push(ValidationError {
                field: format!("{}.producttype", prefix),
                message: e.to_string(),
            }),
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error(transparent)]
    Device(#[from] ParseError),
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `devices[0].serial`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dyson-exporter")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use dyson_types::Generation;

    fn device(serial: &str, producttype: &str) -> DeviceConfig {
        DeviceConfig {
            name: "Office".to_string(),
            serial: serial.to_string(),
            localcredentials: "secret".to_string(),
            producttype: producttype.to_string(),
            active: true,
        }
    }

    fn field_errors(config: &Config) -> Vec<String> {
        match config.validate() {
            Err(ConfigError::Validation(errors)) => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.bind, "0.0.0.0:8091");
        assert_eq!(config.collector.poll_interval, 30);
        assert!(!config.collector.include_inactive_devices);
        assert!(config.devices.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_full_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [server]
            bind = "127.0.0.1:9000"

            [collector]
            poll_interval = 60
            include_inactive_devices = true

            [hosts]
            "ab1-uk-aaa0111a" = "192.168.1.2"

            [[devices]]
            name = "Living room"
            serial = "AB1-UK-AAA0111A"
            localcredentials = "abc=="
            producttype = "475"

            [[devices]]
            name = "Bedroom"
            serial = "XY2-EU-BBB2222B"
            localcredentials = "def=="
            producttype = "438"
            active = false
            "#
        )
        .unwrap();

        let config = Config::load_validated(file.path()).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert_eq!(config.collector.poll_interval, 60);
        assert_eq!(config.collector.request_timeout, 10);
        assert!(config.collector.include_inactive_devices);
        assert_eq!(
            config.hosts.get("AB1-UK-AAA0111A").map(String::as_str),
            Some("192.168.1.2")
        );
        assert_eq!(config.devices.len(), 2);
        assert!(config.devices[0].active);
        assert!(!config.devices[1].active);

        let devices = config.link_devices().unwrap();
        assert_eq!(devices[0].identity.generation, Generation::V1);
        assert_eq!(devices[1].identity.generation, Generation::V2);
        assert_eq!(devices[1].credential, "def==");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[server\nbind = 1").unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_robot_vacuum_rejected() {
        let config = Config {
            devices: vec![device("ROBOT-1", "N223")],
            ..Default::default()
        };
        assert_eq!(field_errors(&config), vec!["devices[0].producttype"]);
    }

    #[test]
    fn test_unknown_product_accepted() {
        let config = Config {
            devices: vec![device("ODD-1", "999")],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_serials() {
        let config = Config {
            devices: vec![device("AAA-1", "475"), device("aaa-1", "438")],
            ..Default::default()
        };
        assert_eq!(field_errors(&config), vec!["devices[1].serial"]);
    }

    #[test]
    fn test_empty_fields() {
        let mut entry = device("", "475");
        entry.localcredentials = " ".to_string();
        let config = Config {
            devices: vec![entry],
            ..Default::default()
        };
        assert_eq!(
            field_errors(&config),
            vec!["devices[0].serial", "devices[0].localcredentials"]
        );
    }

    #[test]
    fn test_collector_bounds() {
        let config = Config {
            collector: CollectorConfig {
                poll_interval: 1,
                request_timeout: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            field_errors(&config),
            vec!["collector.poll_interval", "collector.request_timeout"]
        );

        let config = Config {
            collector: CollectorConfig {
                poll_interval: 10,
                request_timeout: 20,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(field_errors(&config), vec!["collector.request_timeout"]);
    }

    #[test]
    fn test_resubscribe_backoff() {
        let collector = CollectorConfig {
            resubscribe_initial_delay: 2,
            resubscribe_max_delay: 30,
            resubscribe_backoff_multiplier: 3.0,
            resubscribe_max_attempts: Some(5),
            ..Default::default()
        };
        assert!(collector.validate().is_empty());

        let reconnect = collector.reconnect();
        assert_eq!(reconnect.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(reconnect.delay_for_attempt(1), Duration::from_secs(6));
        assert_eq!(reconnect.delay_for_attempt(3), Duration::from_secs(30));
        assert!(reconnect.should_retry(4));
        assert!(!reconnect.should_retry(5));

        assert!(CollectorConfig::default().reconnect().should_retry(u32::MAX - 1));
    }

    #[test]
    fn test_resubscribe_validation() {
        for collector in [
            CollectorConfig {
                resubscribe_initial_delay: 0,
                ..Default::default()
            },
            CollectorConfig {
                resubscribe_initial_delay: 10,
                resubscribe_max_delay: 5,
                ..Default::default()
            },
            CollectorConfig {
                resubscribe_backoff_multiplier: 0.5,
                ..Default::default()
            },
        ] {
            let config = Config {
                collector,
                ..Default::default()
            };
            assert_eq!(field_errors(&config), vec!["collector.resubscribe"]);
        }

        let config = Config {
            collector: CollectorConfig {
                resubscribe_max_attempts: Some(0),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            field_errors(&config),
            vec!["collector.resubscribe_max_attempts"]
        );
    }

    #[test]
    fn test_server_bind_validation() {
        for bind in ["", "localhost", "0.0.0.0:0", "0.0.0.0:http"] {
            let config = Config {
                server: ServerConfig {
                    bind: bind.to_string(),
                },
                ..Default::default()
            };
            assert_eq!(field_errors(&config), vec!["server.bind"], "bind {:?}", bind);
        }
    }

    #[test]
    fn test_set_port() {
        let mut server = ServerConfig::default();
        server.set_port(9100);
        assert_eq!(server.bind, "0.0.0.0:9100");

        let mut server = ServerConfig {
            bind: "[::1]:80".to_string(),
        };
        server.set_port(8080);
        assert_eq!(server.bind, "[::1]:8080");
    }

    #[test]
    fn test_validation_error_display() {
        let err = ConfigError::Validation(vec![ValidationError {
            field: "server.bind".to_string(),
            message: "port cannot be 0".to_string(),
        }]);
        assert!(err.to_string().contains("  - server.bind: port cannot be 0"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("dyson-exporter/config.toml"));
    }
}
