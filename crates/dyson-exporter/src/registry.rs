//! Process-wide metric registry.
//!
//! The registry holds the latest value of every metric series and renders
//! them in the Prometheus text exposition format (version 0.0.4).
//!
//! Two kinds of metric exist:
//!
//! | Kind | Storage | Exposition |
//! |------|---------|------------|
//! | Gauge | one `f64` per label set | one sample per label set |
//! | Enum | index of the active state per label set | one 0/1 sample per declared state |
//!
//! Enum states are exposed under an extra label named after the metric, e.g.
//! `dyson_fan_mode{name="Hall",serial="X",dyson_fan_mode="AUTO"} 1`. Because
//! only the active index is stored, readers can never observe zero or two
//! active states.
//!
//! # Locking
//!
//! Each metric family has its own lock, held only for a single read or write.
//! The family table is behind a separate read-mostly lock that is written only
//! while declaring metrics at startup.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

/// Content type of [`MetricRegistry::encode_text`] output.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Errors reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A metric was declared twice with a different kind or label keys.
    #[error("Metric {0} is already declared with a different kind or labels")]
    SchemaConflict(String),

    /// The metric has not been declared.
    #[error("Metric {0} is not declared")]
    UnknownMetric(String),

    /// A gauge write to an enum metric or vice versa, or a state set that
    /// differs from the declared one.
    #[error("Metric {name} is not a {expected}")]
    KindMismatch {
        /// Metric name.
        name: String,
        /// Kind the caller assumed.
        expected: &'static str,
    },

    /// The label keys do not match the declared ones.
    #[error("Metric {name} expects labels {expected:?}")]
    LabelMismatch {
        /// Metric name.
        name: String,
        /// Declared label keys.
        expected: Vec<String>,
    },

    /// The state is not one of the metric's declared states.
    #[error("State {state:?} is not declared for metric {name}")]
    UnknownState {
        /// Metric name.
        name: String,
        /// Offending state.
        state: String,
    },
}

/// Kind of a metric family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricKind {
    /// Single numeric value.
    Gauge,
    /// One of a fixed, ordered set of states.
    Enum(Vec<String>),
}

impl MetricKind {
    /// Enum kind with the given states, in exposition order.
    pub fn states(states: &[&str]) -> Self {
        MetricKind::Enum(states.iter().map(|s| s.to_string()).collect())
    }

    fn label(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Enum(_) => "enum",
        }
    }
}

/// One exported sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Metric name.
    pub name: String,
    /// Label pairs in declaration order; enum samples carry the state label last.
    pub labels: Vec<(String, String)>,
    /// Sample value.
    pub value: f64,
}

impl Sample {
    /// Value of the label `key`, if present.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
enum Value {
    Gauge(f64),
    State(usize),
}

#[derive(Debug)]
struct Family {
    name: String,
    help: String,
    kind: MetricKind,
    label_keys: Vec<String>,
    series: RwLock<BTreeMap<Vec<String>, Value>>,
}

impl Family {
    /// Label values in declared key order.
    fn label_values(&self, labels: &[(&str, &str)]) -> Result<Vec<String>, RegistryError> {
        let mismatch = || RegistryError::LabelMismatch {
            name: self.name.clone(),
            expected: self.label_keys.clone(),
        };
        if labels.len() != self.label_keys.len() {
            return Err(mismatch());
        }
        self.label_keys
            .iter()
            .map(|key| {
                labels
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.to_string())
                    .ok_or_else(mismatch)
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct FamilyTable {
    ordered: Vec<Arc<Family>>,
    by_name: HashMap<String, Arc<Family>>,
}

/// Thread-safe store of the latest value of every metric series.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    families: RwLock<FamilyTable>,
}

impl MetricRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a metric family.
    ///
    /// Declaring the same name again with the same kind and label keys is a
    /// no-op; anything else is a [`RegistryError::SchemaConflict`].
    pub fn declare(
        &self,
        name: &str,
        help: &str,
        kind: MetricKind,
        label_keys: &[&str],
    ) -> Result<(), RegistryError> {
        let mut table = self.families.write();
        if let Some(existing) = table.by_name.get(name) {
            if existing.kind == kind && existing.label_keys == label_keys {
                return Ok(());
            }
            return Err(RegistryError::SchemaConflict(name.to_string()));
        }

        let family = Arc::new(Family {
            name: name.to_string(),
            help: help.to_string(),
            kind,
            label_keys: label_keys.iter().map(|k| k.to_string()).collect(),
            series: RwLock::new(BTreeMap::new()),
        });
        table.ordered.push(Arc::clone(&family));
        table.by_name.insert(name.to_string(), family);
        Ok(())
    }

    fn family(&self, name: &str) -> Result<Arc<Family>, RegistryError> {
        self.families
            .read()
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownMetric(name.to_string()))
    }

    /// Set the value of a gauge series, creating it on first write.
    pub fn set_gauge(
        &self,
        name: &str,
        labels: &[(&str, &str)],
        value: f64,
    ) -> Result<(), RegistryError> {
        let family = self.family(name)?;
        if family.kind != MetricKind::Gauge {
            return Err(RegistryError::KindMismatch {
                name: name.to_string(),
                expected: MetricKind::Gauge.label(),
            });
        }
        let key = family.label_values(labels)?;
        family.series.write().insert(key, Value::Gauge(value));
        Ok(())
    }

    /// Make `active_state` the single active state of an enum series.
    ///
    /// `all_states` must equal the declared state set.
    pub fn set_enum_state(
        &self,
        name: &str,
        labels: &[(&str, &str)],
        active_state: &str,
        all_states: &[&str],
    ) -> Result<(), RegistryError> {
        let family = self.family(name)?;
        let MetricKind::Enum(states) = &family.kind else {
            return Err(RegistryError::KindMismatch {
                name: name.to_string(),
                expected: "enum",
            });
        };
        if states.iter().map(String::as_str).ne(all_states.iter().copied()) {
            return Err(RegistryError::KindMismatch {
                name: name.to_string(),
                expected: "enum with these states",
            });
        }
        let index = states
            .iter()
            .position(|s| s == active_state)
            .ok_or_else(|| RegistryError::UnknownState {
                name: name.to_string(),
                state: active_state.to_string(),
            })?;
        let key = family.label_values(labels)?;
        family.series.write().insert(key, Value::State(index));
        Ok(())
    }

    /// Names of all declared metrics, in declaration order.
    pub fn metric_names(&self) -> Vec<String> {
        self.families
            .read()
            .ordered
            .iter()
            .map(|f| f.name.clone())
            .collect()
    }

    /// Snapshot of every sample, ordered by declaration, then label values,
    /// then state.
    pub fn export(&self) -> Vec<Sample> {
        let families = self.families.read().ordered.clone();
        let mut samples = Vec::new();

        for family in families {
            let series = family.series.read().clone();
            for (values, value) in series {
                let labels: Vec<(String, String)> = family
                    .label_keys
                    .iter()
                    .cloned()
                    .zip(values)
                    .collect();
                match (value, &family.kind) {
                    (Value::Gauge(v), _) => samples.push(Sample {
                        name: family.name.clone(),
                        labels,
                        value: v,
                    }),
                    (Value::State(active), MetricKind::Enum(states)) => {
                        for (i, state) in states.iter().enumerate() {
                            let mut labels = labels.clone();
                            labels.push((family.name.clone(), state.clone()));
                            samples.push(Sample {
                                name: family.name.clone(),
                                labels,
                                value: if i == active { 1.0 } else { 0.0 },
                            });
                        }
                    }
                    (Value::State(_), MetricKind::Gauge) => {}
                }
            }
        }
        samples
    }

    /// Render every series in the Prometheus text format.
    ///
    /// Families without series are omitted.
    pub fn encode_text(&self) -> String {
        let mut output = String::with_capacity(4096);
        let mut current: Option<String> = None;
        let help: HashMap<String, String> = self
            .families
            .read()
            .ordered
            .iter()
            .map(|f| (f.name.clone(), f.help.clone()))
            .collect();

        for sample in self.export() {
            if current.as_deref() != Some(sample.name.as_str()) {
                let text = help.get(&sample.name).map(String::as_str).unwrap_or_default();
                let _ = writeln!(output, "# HELP {} {}", sample.name, escape_help(text));
                let _ = writeln!(output, "# TYPE {} gauge", sample.name);
                current = Some(sample.name.clone());
            }

            output.push_str(&sample.name);
            if !sample.labels.is_empty() {
                output.push('{');
                for (i, (key, value)) in sample.labels.iter().enumerate() {
                    if i > 0 {
                        output.push(',');
                    }
                    let _ = write!(output, "{}=\"{}\"", key, escape_label_value(value));
                }
                output.push('}');
            }
            let _ = writeln!(output, " {}", format_value(sample.value));
        }

        output
    }
}

/// Escape special characters in Prometheus label values.
fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn escape_help(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\n', "\\n")
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        let sign = if value > 0.0 { "+" } else { "-" };
        format!("{}Inf", sign)
    } else {
        value.to_string()
    }
}
