//! Mapping of device snapshots onto the metric schema.
//!
//! The mapping is split in two steps. [`plan`] is a pure function from a
//! device's identity and a snapshot to the list of metric writes it implies;
//! [`DeviceMetricsAdapter::apply`] performs those writes. A snapshot without
//! a power state is rejected before anything is written.
//!
//! Generation differences:
//!
//! | Metric | V1 | V2 |
//! |--------|----|----|
//! | `dyson_fan_mode` | reported | synthesized from auto mode and power |
//! | `dyson_fan_auto_mode` | synthesized (`fan_mode == AUTO`) | reported |
//! | `dyson_oscillation_state` | synthesized from oscillation, auto, fan state | reported |
//! | dust, quality target, filter life | yes | no |
//! | PM2.5, PM10, NOx, filter %, angles, night speed, front airflow | no | yes |
//!
//! Heat metrics are written only for heating units, focus mode only for V1
//! heating units, and formaldehyde only for V2 units with that sensor.

use std::sync::Arc;

use thiserror::Error;

use dyson_types::{DeviceIdentity, DeviceStateSnapshot, FanMode, Generation, OscillationState};

use crate::registry::{MetricRegistry, RegistryError};
use crate::schema::{self, OFF_FAN, OFF_FAN_AUTO, OFF_HEAT, OFF_ON, OFF_ON_IDLE};

/// Errors from applying a snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdapterError {
    /// The snapshot has no power state; nothing was written.
    #[error("Snapshot for {0} is missing the power state")]
    IncompleteSnapshot(String),

    /// The registry rejected a write (schema not registered).
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// One metric write implied by a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricUpdate {
    /// Set a gauge.
    Gauge {
        name: &'static str,
        value: f64,
    },
    /// Set the active state of an enum.
    State {
        name: &'static str,
        state: &'static str,
        states: &'static [&'static str],
    },
}

impl MetricUpdate {
    /// Metric this update writes.
    pub fn name(&self) -> &'static str {
        match self {
            MetricUpdate::Gauge { name, .. } | MetricUpdate::State { name, .. } => *name,
        }
    }
}

#[derive(Default)]
struct Plan(Vec<MetricUpdate>);

impl Plan {
    fn gauge(&mut self, name: &'static str, value: Option<f64>) {
        if let Some(value) = value {
            self.0.push(MetricUpdate::Gauge { name, value });
        }
    }

    fn state(
        &mut self,
        name: &'static str,
        state: Option<&'static str>,
        states: &'static [&'static str],
    ) {
        if let Some(state) = state {
            self.0.push(MetricUpdate::State {
                name,
                state,
                states,
            });
        }
    }

    fn on_off(&mut self, name: &'static str, value: Option<bool>) {
        self.state(name, value.map(on_off), OFF_ON);
    }
}

fn on_off(value: bool) -> &'static str {
    if value { "ON" } else { "OFF" }
}

fn off_fan(value: bool) -> &'static str {
    if value { "FAN" } else { "OFF" }
}

fn off_heat(value: bool) -> &'static str {
    if value { "HEAT" } else { "OFF" }
}

/// Metric writes implied by `snapshot` for the device `identity`.
///
/// Optional fields that are absent produce no write. Fields that do not
/// apply to the device's generation or capabilities are ignored even when
/// present.
pub fn plan(
    identity: &DeviceIdentity,
    snapshot: &DeviceStateSnapshot,
) -> Result<Vec<MetricUpdate>, AdapterError> {
    let power = snapshot
        .power
        .ok_or_else(|| AdapterError::IncompleteSnapshot(identity.serial.clone()))?;

    let mut plan = Plan::default();

    plan.gauge(
        schema::LAST_STATE_TIMESTAMP,
        snapshot.state_updated_at.map(|at| at.unix_timestamp() as f64),
    );
    plan.gauge(
        schema::LAST_ENVIRONMENTAL_TIMESTAMP,
        snapshot
            .environment_updated_at
            .map(|at| at.unix_timestamp() as f64),
    );

    plan.gauge(schema::HUMIDITY, snapshot.humidity);
    plan.gauge(schema::TEMPERATURE, snapshot.temperature);
    plan.gauge(schema::VOC, snapshot.voc);

    plan.state(schema::FAN_POWER, Some(on_off(power)), OFF_ON);
    plan.state(schema::FAN_STATE, snapshot.fan_state.map(off_fan), OFF_FAN);
    plan.gauge(schema::FAN_SPEED, snapshot.fan_speed.map(|s| s.units()));
    plan.on_off(schema::OSCILLATION, snapshot.oscillation);
    plan.on_off(schema::NIGHT_MODE, snapshot.night_mode);
    plan.on_off(schema::CONTINUOUS_MONITORING, snapshot.continuous_monitoring);

    if identity.is_heating() {
        plan.gauge(schema::HEAT_TARGET, snapshot.heat_target);
        plan.state(schema::HEAT_MODE, snapshot.heat_mode.map(off_heat), OFF_HEAT);
        plan.state(schema::HEAT_STATE, snapshot.heat_state.map(off_heat), OFF_HEAT);
    }

    match identity.generation {
        Generation::V1 => plan_v1(&mut plan, identity, snapshot),
        Generation::V2 => plan_v2(&mut plan, identity, snapshot, power),
    }

    Ok(plan.0)
}

fn plan_v1(plan: &mut Plan, identity: &DeviceIdentity, snapshot: &DeviceStateSnapshot) {
    plan.gauge(schema::DUST, snapshot.dust);

    plan.state(
        schema::FAN_MODE,
        snapshot.fan_mode.map(|m| m.as_str()),
        OFF_FAN_AUTO,
    );
    let auto_mode = snapshot.fan_mode.map(|m| m == FanMode::Auto);
    plan.on_off(schema::AUTO_MODE, auto_mode);

    // V2 reports IDLE when auto mode has paused the fan mid-oscillation.
    let oscillation_state = snapshot.oscillation.map(|oscillating| {
        let paused = auto_mode == Some(true) && snapshot.fan_state == Some(false);
        match (oscillating, paused) {
            (true, true) => OscillationState::Idle,
            (true, false) => OscillationState::On,
            (false, _) => OscillationState::Off,
        }
    });
    plan.state(
        schema::OSCILLATION_STATE,
        oscillation_state.map(|s| s.as_str()),
        OFF_ON_IDLE,
    );

    plan.gauge(
        schema::QUALITY_TARGET,
        snapshot.air_quality_target.map(f64::from),
    );
    plan.gauge(
        schema::FILTER_LIFE,
        snapshot.filter_life.map(|d| d.as_secs() as f64),
    );

    if identity.is_heating() {
        plan.on_off(schema::FOCUS_MODE, snapshot.focus_mode);
    }
}

fn plan_v2(plan: &mut Plan, identity: &DeviceIdentity, snapshot: &DeviceStateSnapshot, power: bool) {
    plan.gauge(schema::PM25, snapshot.pm25);
    plan.gauge(schema::PM10, snapshot.pm10);
    plan.gauge(schema::NOX, snapshot.nox);
    if identity.capabilities.formaldehyde {
        plan.gauge(schema::FORMALDEHYDE, snapshot.formaldehyde);
    }

    let fan_mode = if snapshot.auto_mode == Some(true) {
        FanMode::Auto
    } else if power {
        FanMode::Fan
    } else {
        FanMode::Off
    };
    plan.state(schema::FAN_MODE, Some(fan_mode.as_str()), OFF_FAN_AUTO);
    plan.on_off(schema::AUTO_MODE, snapshot.auto_mode);
    plan.state(
        schema::OSCILLATION_STATE,
        snapshot.oscillation_state.map(|s| s.as_str()),
        OFF_ON_IDLE,
    );

    plan.gauge(
        schema::OSCILLATION_ANGLE_LOW,
        snapshot.oscillation_angle_low.map(f64::from),
    );
    plan.gauge(
        schema::OSCILLATION_ANGLE_HIGH,
        snapshot.oscillation_angle_high.map(f64::from),
    );
    plan.gauge(
        schema::NIGHT_MODE_SPEED,
        snapshot.night_mode_speed.map(f64::from),
    );
    plan.on_off(schema::FRONT_DIRECTION, snapshot.front_airflow);
    plan.gauge(
        schema::CARBON_FILTER_LIFE,
        snapshot.carbon_filter_life.map(f64::from),
    );
    plan.gauge(
        schema::HEPA_FILTER_LIFE,
        snapshot.hepa_filter_life.map(f64::from),
    );
}

/// Writes one device's snapshots into the shared registry.
#[derive(Debug, Clone)]
pub struct DeviceMetricsAdapter {
    registry: Arc<MetricRegistry>,
    identity: DeviceIdentity,
}

impl DeviceMetricsAdapter {
    /// Create an adapter for `identity`.
    pub fn new(registry: Arc<MetricRegistry>, identity: DeviceIdentity) -> Self {
        Self { registry, identity }
    }

    /// The device this adapter writes for.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Write every metric implied by `snapshot`.
    ///
    /// Returns the number of metrics written.
    pub fn apply(&self, snapshot: &DeviceStateSnapshot) -> Result<usize, AdapterError> {
        let updates = plan(&self.identity, snapshot)?;
        let labels = [
            ("name", self.identity.name.as_str()),
            ("serial", self.identity.serial.as_str()),
        ];

        for update in &updates {
            match update {
                MetricUpdate::Gauge { name, value } => {
                    self.registry.set_gauge(name, &labels, *value)?;
                }
                MetricUpdate::State {
                    name,
                    state,
                    states,
                } => {
                    self.registry.set_enum_state(name, &labels, state, states)?;
                }
            }
        }
        Ok(updates.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use dyson_types::FanSpeed;

    fn identity(product_type: &str) -> DeviceIdentity {
        DeviceIdentity::new("SER-1", "Study", product_type, true).unwrap()
    }

    fn names(updates: &[MetricUpdate]) -> Vec<&'static str> {
        updates.iter().map(MetricUpdate::name).collect()
    }

    fn state_of(updates: &[MetricUpdate], metric: &str) -> Option<&'static str> {
        updates.iter().find_map(|u| match u {
            MetricUpdate::State { name, state, .. } if *name == metric => Some(*state),
            _ => None,
        })
    }

    fn gauge_of(updates: &[MetricUpdate], metric: &str) -> Option<f64> {
        updates.iter().find_map(|u| match u {
            MetricUpdate::Gauge { name, value } if *name == metric => Some(*value),
            _ => None,
        })
    }

    #[test]
    fn test_missing_power_is_rejected() {
        let snapshot = DeviceStateSnapshot {
            humidity: Some(40.0),
            ..Default::default()
        };
        assert_eq!(
            plan(&identity("475"), &snapshot),
            Err(AdapterError::IncompleteSnapshot("SER-1".into()))
        );
    }

    #[test]
    fn test_power_only_snapshot() {
        let snapshot = DeviceStateSnapshot {
            power: Some(false),
            ..Default::default()
        };
        let updates = plan(&identity("475"), &snapshot).unwrap();
        assert_eq!(names(&updates), vec![schema::FAN_POWER]);
        assert_eq!(state_of(&updates, schema::FAN_POWER), Some("OFF"));
    }

    #[test]
    fn test_v1_synthesizes_auto_and_idle() {
        let snapshot = DeviceStateSnapshot {
            power: Some(true),
            fan_mode: Some(FanMode::Auto),
            fan_state: Some(false),
            oscillation: Some(true),
            fan_speed: Some(FanSpeed::Auto),
            ..Default::default()
        };
        let updates = plan(&identity("475"), &snapshot).unwrap();
        assert_eq!(state_of(&updates, schema::FAN_MODE), Some("AUTO"));
        assert_eq!(state_of(&updates, schema::AUTO_MODE), Some("ON"));
        assert_eq!(state_of(&updates, schema::OSCILLATION_STATE), Some("IDLE"));
        assert_eq!(gauge_of(&updates, schema::FAN_SPEED), Some(-1.0));
    }

    #[test]
    fn test_v1_oscillating_fan_running() {
        let snapshot = DeviceStateSnapshot {
            power: Some(true),
            fan_mode: Some(FanMode::Fan),
            fan_state: Some(true),
            oscillation: Some(true),
            ..Default::default()
        };
        let updates = plan(&identity("469"), &snapshot).unwrap();
        assert_eq!(state_of(&updates, schema::AUTO_MODE), Some("OFF"));
        assert_eq!(state_of(&updates, schema::OSCILLATION_STATE), Some("ON"));
    }

    #[test]
    fn test_v1_filter_life_in_seconds() {
        let snapshot = DeviceStateSnapshot {
            power: Some(true),
            filter_life: Some(Duration::from_secs(2 * 3600)),
            air_quality_target: Some(3),
            ..Default::default()
        };
        let updates = plan(&identity("475"), &snapshot).unwrap();
        assert_eq!(gauge_of(&updates, schema::FILTER_LIFE), Some(7200.0));
        assert_eq!(gauge_of(&updates, schema::QUALITY_TARGET), Some(3.0));
    }

    #[test]
    fn test_v1_ignores_v2_fields() {
        let snapshot = DeviceStateSnapshot {
            power: Some(true),
            pm25: Some(4.0),
            nox: Some(1.0),
            hepa_filter_life: Some(80),
            front_airflow: Some(true),
            oscillation_state: Some(OscillationState::On),
            ..Default::default()
        };
        let updates = plan(&identity("475"), &snapshot).unwrap();
        assert_eq!(names(&updates), vec![schema::FAN_POWER]);
    }

    #[test]
    fn test_v2_fan_mode_synthesis() {
        let cases = [
            (Some(true), true, "AUTO"),
            (Some(false), true, "FAN"),
            (None, true, "FAN"),
            (Some(false), false, "OFF"),
        ];
        for (auto_mode, power, expected) in cases {
            let snapshot = DeviceStateSnapshot {
                power: Some(power),
                auto_mode,
                ..Default::default()
            };
            let updates = plan(&identity("438"), &snapshot).unwrap();
            assert_eq!(
                state_of(&updates, schema::FAN_MODE),
                Some(expected),
                "auto={:?} power={}",
                auto_mode,
                power
            );
        }
    }

    #[test]
    fn test_v2_ignores_v1_fields() {
        let snapshot = DeviceStateSnapshot {
            power: Some(true),
            dust: Some(3.0),
            filter_life: Some(Duration::from_secs(3600)),
            air_quality_target: Some(4),
            focus_mode: Some(true),
            ..Default::default()
        };
        let updates = plan(&identity("527"), &snapshot).unwrap();
        assert_eq!(names(&updates), vec![schema::FAN_POWER, schema::FAN_MODE]);
    }

    #[test]
    fn test_zero_filter_percent_is_written() {
        let snapshot = DeviceStateSnapshot {
            power: Some(true),
            carbon_filter_life: Some(0),
            ..Default::default()
        };
        let updates = plan(&identity("438"), &snapshot).unwrap();
        assert_eq!(gauge_of(&updates, schema::CARBON_FILTER_LIFE), Some(0.0));
    }

    #[test]
    fn test_formaldehyde_requires_capability() {
        let snapshot = DeviceStateSnapshot {
            power: Some(true),
            formaldehyde: Some(0.004),
            ..Default::default()
        };
        let plain = plan(&identity("438"), &snapshot).unwrap();
        assert_eq!(gauge_of(&plain, schema::FORMALDEHYDE), None);
        let capable = plan(&identity("438K"), &snapshot).unwrap();
        assert_eq!(gauge_of(&capable, schema::FORMALDEHYDE), Some(0.004));
    }

    #[test]
    fn test_heating_metrics_require_capability() {
        let snapshot = DeviceStateSnapshot {
            power: Some(true),
            heat_mode: Some(true),
            heat_state: Some(false),
            heat_target: Some(23.0),
            focus_mode: Some(true),
            ..Default::default()
        };

        let cool = plan(&identity("475"), &snapshot).unwrap();
        assert_eq!(state_of(&cool, schema::HEAT_MODE), None);
        assert_eq!(state_of(&cool, schema::FOCUS_MODE), None);

        let hot_v1 = plan(&identity("455"), &snapshot).unwrap();
        assert_eq!(state_of(&hot_v1, schema::HEAT_MODE), Some("HEAT"));
        assert_eq!(state_of(&hot_v1, schema::HEAT_STATE), Some("OFF"));
        assert_eq!(gauge_of(&hot_v1, schema::HEAT_TARGET), Some(23.0));
        assert_eq!(state_of(&hot_v1, schema::FOCUS_MODE), Some("ON"));

        let hot_v2 = plan(&identity("527"), &snapshot).unwrap();
        assert_eq!(state_of(&hot_v2, schema::HEAT_MODE), Some("HEAT"));
        assert_eq!(state_of(&hot_v2, schema::FOCUS_MODE), None);
    }

    #[test]
    fn test_timestamps() {
        let at = time::OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let snapshot = DeviceStateSnapshot {
            power: Some(true),
            state_updated_at: Some(at),
            ..Default::default()
        };
        let updates = plan(&identity("438"), &snapshot).unwrap();
        assert_eq!(
            gauge_of(&updates, schema::LAST_STATE_TIMESTAMP),
            Some(1_700_000_000.0)
        );
        assert_eq!(gauge_of(&updates, schema::LAST_ENVIRONMENTAL_TIMESTAMP), None);
    }

    #[test]
    fn test_apply_requires_registered_schema() {
        let adapter = DeviceMetricsAdapter::new(Arc::new(MetricRegistry::new()), identity("438"));
        let snapshot = DeviceStateSnapshot {
            power: Some(true),
            ..Default::default()
        };
        assert!(matches!(
            adapter.apply(&snapshot),
            Err(AdapterError::Registry(RegistryError::UnknownMetric(_)))
        ));
    }

    #[test]
    fn test_apply_writes_labels() {
        let registry = Arc::new(MetricRegistry::new());
        schema::register_all(&registry).unwrap();
        let adapter = DeviceMetricsAdapter::new(Arc::clone(&registry), identity("438"));

        let written = adapter
            .apply(&DeviceStateSnapshot {
                power: Some(true),
                humidity: Some(45.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(written, 3);

        let humidity: Vec<_> = registry
            .export()
            .into_iter()
            .filter(|s| s.name == schema::HUMIDITY)
            .collect();
        assert_eq!(humidity.len(), 1);
        assert_eq!(humidity[0].label("name"), Some("Study"));
        assert_eq!(humidity[0].label("serial"), Some("SER-1"));
        assert_eq!(humidity[0].value, 45.0);
    }
}
