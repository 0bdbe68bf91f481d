//! Point-in-time device state.
//!
//! A [`DeviceStateSnapshot`] is produced by a device client every time it
//! learns something new about a device (poll response or push notification).
//! Every field is optional: a field that does not apply to the device's
//! generation, or that the device has not reported yet, is `None` rather than
//! a placeholder zero.

use core::fmt;
use core::str::FromStr;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;

/// Fan mode as reported by V1 devices (and synthesized for V2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FanMode {
    Off,
    Fan,
    Auto,
}

impl FanMode {
    /// All states in exposition order.
    pub const ALL: [FanMode; 3] = [FanMode::Off, FanMode::Fan, FanMode::Auto];

    /// Wire/metric label for this state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FanMode::Off => "OFF",
            FanMode::Fan => "FAN",
            FanMode::Auto => "AUTO",
        }
    }
}

impl FromStr for FanMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OFF" => Ok(FanMode::Off),
            "FAN" => Ok(FanMode::Fan),
            "AUTO" => Ok(FanMode::Auto),
            other => Err(ParseError::invalid("fmod", other)),
        }
    }
}

impl fmt::Display for FanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the oscillation motor is actually moving.
///
/// `Idle` means oscillation is requested but auto mode has paused the fan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OscillationState {
    Off,
    On,
    Idle,
}

impl OscillationState {
    /// All states in exposition order.
    pub const ALL: [OscillationState; 3] = [
        OscillationState::Off,
        OscillationState::On,
        OscillationState::Idle,
    ];

    /// Wire/metric label for this state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OscillationState::Off => "OFF",
            OscillationState::On => "ON",
            OscillationState::Idle => "IDLE",
        }
    }
}

impl FromStr for OscillationState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OFF" => Ok(OscillationState::Off),
            "ON" => Ok(OscillationState::On),
            "IDLE" => Ok(OscillationState::Idle),
            other => Err(ParseError::invalid("oscs", other)),
        }
    }
}

impl fmt::Display for OscillationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fan speed setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FanSpeed {
    /// The device picks the speed itself.
    Auto,
    /// Fixed speed level (1-10).
    Level(u8),
}

impl FanSpeed {
    /// Numeric gauge value, `-1` standing in for automatic speed.
    #[must_use]
    pub fn units(&self) -> f64 {
        match self {
            FanSpeed::Auto => -1.0,
            FanSpeed::Level(level) => f64::from(*level),
        }
    }
}

impl FromStr for FanSpeed {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "AUTO" {
            return Ok(FanSpeed::Auto);
        }
        s.parse::<u8>()
            .map(FanSpeed::Level)
            .map_err(|_| ParseError::invalid("fnsp", s))
    }
}

/// Immutable point-in-time state of one device.
///
/// Construct with struct update syntax over [`Default`]:
///
/// ```
/// use dyson_types::{DeviceStateSnapshot, FanMode, FanSpeed};
///
/// let snapshot = DeviceStateSnapshot {
///     power: Some(true),
///     fan_mode: Some(FanMode::Auto),
///     fan_speed: Some(FanSpeed::Auto),
///     ..Default::default()
/// };
/// assert!(snapshot.humidity.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceStateSnapshot {
    // --- Environmental readings ---
    /// Relative humidity (%).
    pub humidity: Option<f64>,
    /// Ambient temperature (°C).
    pub temperature: Option<f64>,
    /// Volatile organic compounds index, normalised to [0, 10].
    pub voc: Option<f64>,
    /// Dust index (V1).
    pub dust: Option<f64>,
    /// PM2.5 particulate level (V2).
    pub pm25: Option<f64>,
    /// PM10 particulate level (V2).
    pub pm10: Option<f64>,
    /// Nitrogen oxides index, normalised to [0, 10] (V2).
    pub nox: Option<f64>,
    /// Formaldehyde level (V2 formaldehyde units).
    pub formaldehyde: Option<f64>,

    // --- Operational state ---
    /// Whether the fan is powered on. Required for a usable snapshot.
    pub power: Option<bool>,
    /// Fan mode (V1 native).
    pub fan_mode: Option<FanMode>,
    /// Auto mode (V2 native).
    pub auto_mode: Option<bool>,
    /// Whether the fan motor is currently running.
    pub fan_state: Option<bool>,
    /// Fan speed setting.
    pub fan_speed: Option<FanSpeed>,
    /// Whether oscillation is requested.
    pub oscillation: Option<bool>,
    /// Oscillation motor state (V2 native).
    pub oscillation_state: Option<OscillationState>,
    /// Lower oscillation angle in degrees (V2).
    pub oscillation_angle_low: Option<u16>,
    /// Upper oscillation angle in degrees (V2).
    pub oscillation_angle_high: Option<u16>,
    /// Night mode.
    pub night_mode: Option<bool>,
    /// Maximum fan speed in night mode (V2).
    pub night_mode_speed: Option<u8>,
    /// Heat mode requested (heating units).
    pub heat_mode: Option<bool>,
    /// Heater currently running (heating units).
    pub heat_state: Option<bool>,
    /// Heat target (°C, heating units).
    pub heat_target: Option<f64>,
    /// Focus (narrow airflow) mode (V1 heating units).
    pub focus_mode: Option<bool>,
    /// Front airflow direction (V2).
    pub front_airflow: Option<bool>,
    /// Air quality target (V1).
    pub air_quality_target: Option<u8>,
    /// Remaining HEPA filter life (V1).
    pub filter_life: Option<Duration>,
    /// Remaining carbon filter life in percent (V2).
    pub carbon_filter_life: Option<u8>,
    /// Remaining HEPA filter life in percent (V2).
    pub hepa_filter_life: Option<u8>,
    /// Continuous air quality monitoring while off.
    pub continuous_monitoring: Option<bool>,

    // --- Provenance ---
    /// When the operational state was last received.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339::option"))]
    pub state_updated_at: Option<OffsetDateTime>,
    /// When the environmental readings were last received.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339::option"))]
    pub environment_updated_at: Option<OffsetDateTime>,
}

impl DeviceStateSnapshot {
    /// Whether the snapshot carries any environmental reading.
    #[must_use]
    pub fn has_environment(&self) -> bool {
        self.humidity.is_some()
            || self.temperature.is_some()
            || self.voc.is_some()
            || self.dust.is_some()
            || self.pm25.is_some()
            || self.pm10.is_some()
            || self.nox.is_some()
            || self.formaldehyde.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_mode_round_trip_labels() {
        for mode in FanMode::ALL {
            assert_eq!(mode.as_str().parse::<FanMode>().unwrap(), mode);
        }
        assert!("ON".parse::<FanMode>().is_err());
    }

    #[test]
    fn test_oscillation_state_parse() {
        assert_eq!("IDLE".parse::<OscillationState>().unwrap(), OscillationState::Idle);
        let err = "WOBBLE".parse::<OscillationState>().unwrap_err();
        assert!(err.to_string().contains("oscs"));
    }

    #[test]
    fn test_fan_speed_parse() {
        assert_eq!("AUTO".parse::<FanSpeed>().unwrap(), FanSpeed::Auto);
        assert_eq!("0004".parse::<FanSpeed>().unwrap(), FanSpeed::Level(4));
        assert!("fast".parse::<FanSpeed>().is_err());
    }

    #[test]
    fn test_fan_speed_units() {
        assert_eq!(FanSpeed::Auto.units(), -1.0);
        assert_eq!(FanSpeed::Level(7).units(), 7.0);
    }

    #[test]
    fn test_default_snapshot_is_empty() {
        let snapshot = DeviceStateSnapshot::default();
        assert!(snapshot.power.is_none());
        assert!(!snapshot.has_environment());
    }

    #[test]
    fn test_has_environment() {
        let snapshot = DeviceStateSnapshot {
            pm25: Some(3.0),
            ..Default::default()
        };
        assert!(snapshot.has_environment());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_snapshot_serialization() {
        let snapshot = DeviceStateSnapshot {
            power: Some(true),
            fan_speed: Some(FanSpeed::Level(3)),
            ..Default::default()
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"power\":true"));
        let back: DeviceStateSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
