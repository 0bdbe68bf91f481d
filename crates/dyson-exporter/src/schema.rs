//! The exported metric surface.
//!
//! Metric names, help strings and enum state sets are a public contract:
//! dashboards and alerts depend on them. Every metric carries the labels
//! `name` and `serial`.

use crate::registry::{MetricKind, MetricRegistry, RegistryError};

/// Label keys shared by every metric.
pub const LABEL_KEYS: &[&str] = &["name", "serial"];

/// States of binary modes (power, auto, oscillation, night, front airflow).
pub const OFF_ON: &[&str] = &["OFF", "ON"];
/// States of the fan motor.
pub const OFF_FAN: &[&str] = &["OFF", "FAN"];
/// States of the fan mode.
pub const OFF_FAN_AUTO: &[&str] = &["OFF", "FAN", "AUTO"];
/// States of the oscillation motor; `IDLE` while auto mode pauses it.
pub const OFF_ON_IDLE: &[&str] = &["OFF", "ON", "IDLE"];
/// States of the heater.
pub const OFF_HEAT: &[&str] = &["OFF", "HEAT"];

// Provenance
/// Unix time of the last operational state message.
pub const LAST_STATE_TIMESTAMP: &str = "dyson_last_state_timestamp_seconds";
/// Unix time of the last sensor message.
pub const LAST_ENVIRONMENTAL_TIMESTAMP: &str = "dyson_last_environmental_timestamp_seconds";

// Environmental (all generations)
/// Relative humidity in percent.
pub const HUMIDITY: &str = "dyson_humidity_percent";
/// Ambient temperature in degrees Celsius.
pub const TEMPERATURE: &str = "dyson_temperature_celsius";
/// Volatile organic compounds index.
pub const VOC: &str = "dyson_volatile_organic_compounds_units";

// Environmental (V1)
/// Dust index.
pub const DUST: &str = "dyson_dust_units";

// Environmental (V2)
/// PM2.5 level.
pub const PM25: &str = "dyson_pm25_units";
/// PM10 level.
pub const PM10: &str = "dyson_pm10_units";
/// Nitrogen oxides index.
pub const NOX: &str = "dyson_nitrogen_oxide_units";
/// Formaldehyde level, formaldehyde-capable units only.
pub const FORMALDEHYDE: &str = "dyson_formaldehyde_units";

// Operational (all generations)
/// Fan mode, one of [`OFF_FAN_AUTO`].
pub const FAN_MODE: &str = "dyson_fan_mode";
/// Whether the fan is powered on.
pub const FAN_POWER: &str = "dyson_fan_power_mode";
/// Whether auto mode is on.
pub const AUTO_MODE: &str = "dyson_fan_auto_mode";
/// Whether the fan motor is running.
pub const FAN_STATE: &str = "dyson_fan_state";
/// Fan speed setting, `-1` for automatic speed.
pub const FAN_SPEED: &str = "dyson_fan_speed_units";
/// Whether oscillation is requested.
pub const OSCILLATION: &str = "dyson_oscillation_mode";
/// Oscillation motor state, one of [`OFF_ON_IDLE`].
pub const OSCILLATION_STATE: &str = "dyson_oscillation_state";
/// Night mode.
pub const NIGHT_MODE: &str = "dyson_night_mode";
/// Heat mode requested, heating units only.
pub const HEAT_MODE: &str = "dyson_heat_mode";
/// Heater running, heating units only.
pub const HEAT_STATE: &str = "dyson_heat_state";
/// Heat target in degrees Celsius, heating units only.
pub const HEAT_TARGET: &str = "dyson_heat_target_celsius";
/// Air quality monitoring while the fan is off.
pub const CONTINUOUS_MONITORING: &str = "dyson_continuous_monitoring_mode";

// Operational (V1)
/// Focus mode, V1 heating units only.
pub const FOCUS_MODE: &str = "dyson_focus_mode";
/// Air quality target.
pub const QUALITY_TARGET: &str = "dyson_quality_target_units";
/// Remaining filter life in seconds.
pub const FILTER_LIFE: &str = "dyson_filter_life_seconds";

// Operational (V2)
/// Remaining carbon filter life in percent.
pub const CARBON_FILTER_LIFE: &str = "dyson_carbon_filter_life_percent";
/// Remaining HEPA filter life in percent.
pub const HEPA_FILTER_LIFE: &str = "dyson_hepa_filter_life_percent";
/// Maximum fan speed in night mode.
pub const NIGHT_MODE_SPEED: &str = "dyson_night_mode_fan_speed_units";
/// Lower oscillation bound in degrees.
pub const OSCILLATION_ANGLE_LOW: &str = "dyson_oscillation_angle_low_degrees";
/// Upper oscillation bound in degrees.
pub const OSCILLATION_ANGLE_HIGH: &str = "dyson_oscillation_angle_high_degrees";
/// Whether air is blown out of the front.
pub const FRONT_DIRECTION: &str = "dyson_front_direction_mode";

/// Declaration of one metric.
#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    /// Exported metric name.
    pub name: &'static str,
    /// `# HELP` text.
    pub help: &'static str,
    /// `None` for gauges, the ordered state set for enums.
    pub states: Option<&'static [&'static str]>,
}

const fn gauge(name: &'static str, help: &'static str) -> MetricDef {
    MetricDef {
        name,
        help,
        states: None,
    }
}

const fn enumeration(
    name: &'static str,
    help: &'static str,
    states: &'static [&'static str],
) -> MetricDef {
    MetricDef {
        name,
        help,
        states: Some(states),
    }
}

/// Every exported metric, in exposition order.
pub const METRICS: &[MetricDef] = &[
    gauge(LAST_STATE_TIMESTAMP, "Last Unix time we received a STATE update"),
    gauge(
        LAST_ENVIRONMENTAL_TIMESTAMP,
        "Last Unix timestamp we received an ENVIRONMENTAL update",
    ),
    gauge(HUMIDITY, "Relative humidity (percentage)"),
    gauge(TEMPERATURE, "Ambient temperature (celsius)"),
    gauge(VOC, "Level of Volatile organic compounds"),
    gauge(DUST, "Level of Dust (V1 units only)"),
    gauge(PM25, "Level of PM2.5 particulate matter (V2 units only)"),
    gauge(PM10, "Level of PM10 particulate matter (V2 units only)"),
    gauge(NOX, "Level of nitrogen oxides (NOx, V2 units only)"),
    gauge(
        FORMALDEHYDE,
        "Level of formaldehyde/H-CHO (Formaldehyde unit only)",
    ),
    enumeration(FAN_MODE, "Current mode of the fan", OFF_FAN_AUTO),
    enumeration(
        FAN_POWER,
        "Current power mode of the fan (like fan_mode but binary)",
        OFF_ON,
    ),
    enumeration(
        AUTO_MODE,
        "Current auto mode of the fan (like fan_mode but binary)",
        OFF_ON,
    ),
    enumeration(FAN_STATE, "Current running state of the fan", OFF_FAN),
    gauge(FAN_SPEED, "Current speed of fan (-1 = AUTO)"),
    enumeration(
        OSCILLATION,
        "Current oscillation mode (will the fan move?)",
        OFF_ON,
    ),
    enumeration(
        OSCILLATION_STATE,
        "Current oscillation state (is the fan moving?)",
        OFF_ON_IDLE,
    ),
    enumeration(NIGHT_MODE, "Night mode", OFF_ON),
    enumeration(HEAT_MODE, "Current heat mode", OFF_HEAT),
    enumeration(HEAT_STATE, "Current heat state", OFF_HEAT),
    gauge(HEAT_TARGET, "Heat target temperature (celsius)"),
    enumeration(
        CONTINUOUS_MONITORING,
        "Monitor air quality continuously",
        OFF_ON,
    ),
    enumeration(FOCUS_MODE, "Current focus mode (V1 units only)", OFF_ON),
    gauge(QUALITY_TARGET, "Quality target for fan (V1 units only)"),
    gauge(
        FILTER_LIFE,
        "Remaining HEPA filter life (seconds, V1 units only)",
    ),
    gauge(
        CARBON_FILTER_LIFE,
        "Percent remaining of carbon filter (V2 units only)",
    ),
    gauge(
        HEPA_FILTER_LIFE,
        "Percent remaining of HEPA filter (V2 units only)",
    ),
    gauge(NIGHT_MODE_SPEED, "Night mode fan speed (V2 units only)"),
    gauge(
        OSCILLATION_ANGLE_LOW,
        "Low oscillation angle (V2 units only)",
    ),
    gauge(
        OSCILLATION_ANGLE_HIGH,
        "High oscillation angle (V2 units only)",
    ),
    enumeration(
        FRONT_DIRECTION,
        "Airflow direction from front (V2 units only)",
        OFF_ON,
    ),
];

/// Declare every metric in `registry`.
///
/// Safe to call more than once on the same registry.
pub fn register_all(registry: &MetricRegistry) -> Result<(), RegistryError> {
    for def in METRICS {
        let kind = match def.states {
            Some(states) => MetricKind::states(states),
            None => MetricKind::Gauge,
        };
        registry.declare(def.name, def.help, kind, LABEL_KEYS)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use dyson_types::{FanMode, OscillationState};

    #[test]
    fn test_register_all_is_idempotent() {
        let registry = MetricRegistry::new();
        register_all(&registry).unwrap();
        register_all(&registry).unwrap();
        assert_eq!(registry.metric_names().len(), METRICS.len());
    }

    #[test]
    fn test_register_all_detects_conflict() {
        let registry = MetricRegistry::new();
        registry
            .declare(FAN_MODE, "", MetricKind::Gauge, LABEL_KEYS)
            .unwrap();
        assert_eq!(
            register_all(&registry),
            Err(RegistryError::SchemaConflict(FAN_MODE.to_string()))
        );
    }

    #[test]
    fn test_metric_names_are_unique() {
        let names: HashSet<_> = METRICS.iter().map(|m| m.name).collect();
        assert_eq!(names.len(), METRICS.len());
        assert!(METRICS.iter().all(|m| m.name.starts_with("dyson_")));
    }

    #[test]
    fn test_state_sets_match_types() {
        let fan_modes: Vec<_> = FanMode::ALL.iter().map(FanMode::as_str).collect();
        assert_eq!(fan_modes, OFF_FAN_AUTO);
        let osc: Vec<_> = OscillationState::ALL
            .iter()
            .map(OscillationState::as_str)
            .collect();
        assert_eq!(osc, OFF_ON_IDLE);
    }
}
