//! Decoding of the JSON messages Dyson devices publish on their local broker.
//!
//! Devices publish on `{product_type}/{serial}/status/current` and accept
//! requests on `{product_type}/{serial}/command`. Three message kinds carry
//! state:
//!
//! | `msg` | Payload key | Meaning |
//! |-------|-------------|---------|
//! | `CURRENT-STATE` | `product-state` | Full operational state |
//! | `STATE-CHANGE` | `product-state` | Changed fields as `[old, new]` pairs |
//! | `ENVIRONMENTAL-CURRENT-SENSOR-DATA` | `data` | Sensor readings |
//!
//! All values are strings. Sensor readings use `OFF` and `FAIL` for "no
//! reading" and `INIT` while the sensor warms up; temperatures are in tenths
//! of a Kelvin.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use dyson_types::{DeviceStateSnapshot, FanMode, FanSpeed, Generation, OscillationState};

use crate::error::{Error, Result};

/// TCP port of the broker running on each device.
pub const MQTT_PORT: u16 = 1883;

/// Offset applied to Kelvin readings.
///
/// Devices round 0 K to -273 °C rather than -273.15 °C; using the same
/// constant keeps readings identical to the device's own display.
pub const KELVIN_TO_CELSIUS: f64 = -273.0;

/// Topic the device publishes its state on.
pub fn status_topic(product_type: &str, serial: &str) -> String {
    format!("{}/{}/status/current", product_type, serial)
}

/// Topic the device listens for requests on.
pub fn command_topic(product_type: &str, serial: &str) -> String {
    format!("{}/{}/command", product_type, serial)
}

/// Read-only requests the exporter sends to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Ask for a `CURRENT-STATE` message.
    CurrentState,
    /// Ask for an `ENVIRONMENTAL-CURRENT-SENSOR-DATA` message.
    EnvironmentalData,
}

impl Request {
    /// The `msg` field of the request.
    pub fn msg(&self) -> &'static str {
        match self {
            Request::CurrentState => "REQUEST-CURRENT-STATE",
            Request::EnvironmentalData => "REQUEST-PRODUCT-ENVIRONMENT-CURRENT-SENSOR-DATA",
        }
    }

    /// Encode the request payload.
    pub fn encode(&self, at: OffsetDateTime) -> Result<Vec<u8>> {
        let at = at.replace_nanosecond(0).unwrap_or(at);
        let time = at
            .format(&Rfc3339)
            .map_err(|e| Error::InvalidMessage(e.to_string()))?;
        let payload = serde_json::json!({ "msg": self.msg(), "time": time });
        Ok(serde_json::to_vec(&payload)?)
    }
}

/// A decoded device message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Operational fields only; environmental fields are `None`.
    State(DeviceStateSnapshot),
    /// Environmental fields only; operational fields are `None`.
    Environment(DeviceStateSnapshot),
    /// A message kind that carries no state (e.g. `LOCATION`).
    Other(String),
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    msg: String,
    #[serde(rename = "product-state", default)]
    product_state: HashMap<String, Value>,
    #[serde(default)]
    data: HashMap<String, Value>,
}

/// Decode a payload received on the status topic.
pub fn decode(generation: Generation, payload: &[u8]) -> Result<Message> {
    let raw: RawMessage = serde_json::from_slice(payload)?;
    let fields = Fields(&raw.product_state);

    match raw.msg.as_str() {
        "CURRENT-STATE" | "STATE-CHANGE" => Ok(Message::State(match generation {
            Generation::V1 => decode_v1_state(&fields),
            Generation::V2 => decode_v2_state(&fields),
        })),
        "ENVIRONMENTAL-CURRENT-SENSOR-DATA" => {
            let data = Fields(&raw.data);
            Ok(Message::Environment(match generation {
                Generation::V1 => decode_v1_environment(&data),
                Generation::V2 => decode_v2_environment(&data),
            }))
        }
        other => Ok(Message::Other(other.to_string())),
    }
}

struct Fields<'a>(&'a HashMap<String, Value>);

impl Fields<'_> {
    /// Raw string value; for `[old, new]` pairs the new value.
    fn get(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.as_str()),
            Value::Array(pair) => pair.last().and_then(Value::as_str),
            _ => None,
        }
    }

    fn parsed<T>(&self, key: &'static str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let raw = self.get(key)?;
        let value = parse(raw);
        if value.is_none() {
            debug!("Ignoring unrecognised value {:?} for field {}", raw, key);
        }
        value
    }

    fn on_off(&self, key: &'static str) -> Option<bool> {
        self.parsed(key, |raw| match raw {
            "ON" | "OION" => Some(true),
            "OFF" | "OIOF" => Some(false),
            _ => None,
        })
    }

    fn flag(&self, key: &'static str, on: &'static str) -> Option<bool> {
        self.parsed(key, |raw| match raw {
            "OFF" => Some(false),
            v if v == on => Some(true),
            _ => None,
        })
    }

    fn number<T: std::str::FromStr>(&self, key: &'static str) -> Option<T> {
        self.parsed(key, |raw| raw.parse().ok())
    }

    fn celsius(&self, key: &'static str) -> Option<f64> {
        self.parsed(key, |raw| raw.parse::<f64>().ok().map(kelvin_tenths_to_celsius))
    }

    /// Sensor reading honouring the `OFF`/`FAIL`/`INIT` sentinels.
    fn reading(&self, key: &'static str, convert: impl FnOnce(f64) -> f64) -> Option<f64> {
        match self.get(key)? {
            "OFF" | "FAIL" => None,
            "INIT" => Some(0.0),
            raw => match raw.parse::<f64>() {
                Ok(value) => Some(convert(value)),
                Err(_) => {
                    debug!("Ignoring unrecognised reading {:?} for field {}", raw, key);
                    None
                }
            },
        }
    }
}

fn kelvin_tenths_to_celsius(raw: f64) -> f64 {
    round_tenth(raw / 10.0 + KELVIN_TO_CELSIUS)
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn decode_common_state(fields: &Fields<'_>) -> DeviceStateSnapshot {
    DeviceStateSnapshot {
        fan_state: fields.flag("fnst", "FAN"),
        fan_speed: fields.parsed("fnsp", |raw| raw.parse::<FanSpeed>().ok()),
        oscillation: fields.on_off("oson"),
        night_mode: fields.on_off("nmod"),
        continuous_monitoring: fields.on_off("rhtm"),
        heat_mode: fields.flag("hmod", "HEAT"),
        heat_state: fields.flag("hsta", "HEAT"),
        heat_target: fields.celsius("hmax"),
        ..Default::default()
    }
}

fn decode_v1_state(fields: &Fields<'_>) -> DeviceStateSnapshot {
    let fan_mode = fields.parsed("fmod", |raw| raw.parse::<FanMode>().ok());
    DeviceStateSnapshot {
        power: fan_mode.map(|mode| mode != FanMode::Off),
        fan_mode,
        focus_mode: fields.on_off("ffoc"),
        air_quality_target: fields.number("qtar"),
        filter_life: fields
            .number::<u64>("filf")
            .map(|hours| Duration::from_secs(hours * 60 * 60)),
        ..decode_common_state(fields)
    }
}

fn decode_v2_state(fields: &Fields<'_>) -> DeviceStateSnapshot {
    let percent = |key: &'static str| fields.parsed(key, |raw| if raw == "INV" { None } else { raw.parse::<u8>().ok() });
    DeviceStateSnapshot {
        power: fields.on_off("fpwr"),
        auto_mode: fields.on_off("auto"),
        oscillation_state: fields.parsed("oscs", |raw| raw.parse::<OscillationState>().ok()),
        oscillation_angle_low: fields.number("osal"),
        oscillation_angle_high: fields.number("osau"),
        night_mode_speed: fields.number("nmdv"),
        front_airflow: fields.on_off("fdir"),
        carbon_filter_life: percent("cflr"),
        hepa_filter_life: percent("hflr"),
        ..decode_common_state(fields)
    }
}

fn decode_common_environment(data: &Fields<'_>) -> DeviceStateSnapshot {
    DeviceStateSnapshot {
        humidity: data.reading("hact", |v| v),
        temperature: data.reading("tact", kelvin_tenths_to_celsius),
        ..Default::default()
    }
}

fn decode_v1_environment(data: &Fields<'_>) -> DeviceStateSnapshot {
    DeviceStateSnapshot {
        dust: data.reading("pact", |v| v),
        voc: data.reading("vact", |v| v),
        ..decode_common_environment(data)
    }
}

fn decode_v2_environment(data: &Fields<'_>) -> DeviceStateSnapshot {
    // VOC and NOx arrive in [0, 100]; rescale to the [0, 10] range V1 uses.
    DeviceStateSnapshot {
        pm25: data.reading("pm25", |v| v),
        pm10: data.reading("pm10", |v| v),
        voc: data.reading("va10", |v| v / 10.0),
        nox: data.reading("noxl", |v| v / 10.0),
        formaldehyde: data.reading("hchr", |v| v / 1000.0),
        ..decode_common_environment(data)
    }
}

/// Latest known state of one device, merged from individual messages.
#[derive(Debug, Clone, Default)]
pub struct DeviceView {
    state: DeviceStateSnapshot,
    environment: DeviceStateSnapshot,
}

macro_rules! overlay {
    ($dst:expr, $src:expr; $($field:ident),+ $(,)?) => {
        $( if $src.$field.is_some() { $dst.$field = $src.$field; } )+
    };
}

impl DeviceView {
    /// Create an empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a decoded message received at `at`.
    ///
    /// State messages overlay the fields they carry; environmental messages
    /// replace all readings, since each one is a complete sensor report.
    /// Returns `true` if the view changed.
    pub fn apply(&mut self, message: Message, at: OffsetDateTime) -> bool {
        match message {
            Message::State(update) => {
                overlay!(self.state, update;
                    power, fan_mode, auto_mode, fan_state, fan_speed, oscillation,
                    oscillation_state, oscillation_angle_low, oscillation_angle_high,
                    night_mode, night_mode_speed, heat_mode, heat_state, heat_target,
                    focus_mode, front_airflow, air_quality_target, filter_life,
                    carbon_filter_life, hepa_filter_life, continuous_monitoring,
                );
                self.state.state_updated_at = Some(at);
                true
            }
            Message::Environment(update) => {
                self.environment = DeviceStateSnapshot {
                    environment_updated_at: Some(at),
                    ..update
                };
                true
            }
            Message::Other(_) => false,
        }
    }

    /// Whether any state message has been merged yet.
    pub fn has_state(&self) -> bool {
        self.state.state_updated_at.is_some()
    }

    /// Combined snapshot of state and environment.
    pub fn snapshot(&self) -> DeviceStateSnapshot {
        let env = &self.environment;
        DeviceStateSnapshot {
            humidity: env.humidity,
            temperature: env.temperature,
            voc: env.voc,
            dust: env.dust,
            pm25: env.pm25,
            pm10: env.pm10,
            nox: env.nox,
            formaldehyde: env.formaldehyde,
            environment_updated_at: env.environment_updated_at,
            ..self.state.clone()
        }
    }
}
