//! Metric entity and merge rules
//!
//! A [`MetricPoint`] is the only thing the store persists: a unique name and
//! the current value of one of two kinds.
//!
//! ## Merge rules
//!
//! - **Counter**: additive, `new = old + delta`
//! - **Gauge**: last write wins, `new = incoming`
//!
//! The kind of a stored point never changes. An incoming point of the other
//! kind is rejected with [`StorageError::InvalidMetric`].
//!
//! ## Wire shape
//!
//! Points travel (HTTP bodies, snapshot files) as
//! `{"id": "requests", "type": "counter", "delta": 5}` or
//! `{"id": "temp", "type": "gauge", "value": 36.6}`. Exactly one of
//! `delta`/`value` must be present and it must match `type`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};

/// Kind of a metric, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Cumulative value, updated with deltas
    Counter,

    /// Absolute value, updated by overwrite
    Gauge,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            other => Err(StorageError::InvalidMetric(format!(
                "unknown metric type: {other}"
            ))),
        }
    }
}

/// Value carried by a point; the variant determines the kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Counter(i64),
    Gauge(f64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Gauge(_) => MetricKind::Gauge,
        }
    }
}

/// The persisted record for one named metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireMetric", into = "WireMetric")]
pub struct MetricPoint {
    /// Globally unique name (primary key across kinds)
    pub name: String,

    /// Current value, or the incoming delta/value on writes
    pub value: MetricValue,
}

impl MetricPoint {
    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Counter(delta),
        }
    }

    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    /// Counter value, `None` for gauges
    pub fn delta(&self) -> Option<i64> {
        match self.value {
            MetricValue::Counter(delta) => Some(delta),
            MetricValue::Gauge(_) => None,
        }
    }

    /// Gauge value, `None` for counters
    pub fn gauge_value(&self) -> Option<f64> {
        match self.value {
            MetricValue::Gauge(value) => Some(value),
            MetricValue::Counter(_) => None,
        }
    }

    /// Rebuild a point from its nullable column representation
    ///
    /// Used for database rows and wire records. Exactly one of `delta` and
    /// `value` must be set, and it must be the one matching `kind`.
    pub fn from_columns(
        name: String,
        kind: MetricKind,
        delta: Option<i64>,
        value: Option<f64>,
    ) -> StorageResult<Self> {
        let value = match (kind, delta, value) {
            (MetricKind::Counter, Some(delta), None) => MetricValue::Counter(delta),
            (MetricKind::Gauge, None, Some(value)) => MetricValue::Gauge(value),
            (_, None, None) => {
                return Err(StorageError::InvalidMetric(format!(
                    "{name}: neither delta nor value is set"
                )));
            }
            (_, Some(_), Some(_)) => {
                return Err(StorageError::InvalidMetric(format!(
                    "{name}: both delta and value are set"
                )));
            }
            (kind, _, _) => {
                return Err(StorageError::InvalidMetric(format!(
                    "{name}: value does not match metric type {kind}"
                )));
            }
        };

        Ok(Self { name, value })
    }

    /// Reject points no backend can store faithfully
    ///
    /// SQLite turns NaN into NULL, so non-finite gauges are refused everywhere
    /// to keep backends interchangeable.
    pub fn validate(&self) -> StorageResult<()> {
        if self.name.is_empty() {
            return Err(StorageError::InvalidMetric("empty metric name".to_string()));
        }
        if let MetricValue::Gauge(value) = self.value
            && !value.is_finite()
        {
            return Err(StorageError::InvalidMetric(format!(
                "{}: gauge value {} is not finite",
                self.name, value
            )));
        }
        Ok(())
    }
}

/// Combine a stored point with an incoming update according to its kind
///
/// Pure: neither argument is modified. Fails with `InvalidMetric` when the
/// names differ, the kinds differ, or a counter would overflow.
pub fn merge(existing: &MetricPoint, incoming: &MetricPoint) -> StorageResult<MetricPoint> {
    if existing.name != incoming.name {
        return Err(StorageError::InvalidMetric(format!(
            "cannot merge {} into {}",
            incoming.name, existing.name
        )));
    }

    let value = match (existing.value, incoming.value) {
        (MetricValue::Counter(old), MetricValue::Counter(delta)) => {
            let sum = old.checked_add(delta).ok_or_else(|| {
                StorageError::InvalidMetric(format!("{}: counter overflow", existing.name))
            })?;
            MetricValue::Counter(sum)
        }
        (MetricValue::Gauge(_), MetricValue::Gauge(value)) => MetricValue::Gauge(value),
        (old, new) => {
            return Err(StorageError::InvalidMetric(format!(
                "{}: stored as {}, got {}",
                existing.name,
                old.kind(),
                new.kind()
            )));
        }
    };

    Ok(MetricPoint {
        name: existing.name.clone(),
        value,
    })
}

/// Serialized form of a point
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMetric {
    id: String,

    #[serde(rename = "type")]
    kind: MetricKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    delta: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
}

impl TryFrom<WireMetric> for MetricPoint {
    type Error = StorageError;

    fn try_from(wire: WireMetric) -> Result<Self, Self::Error> {
        MetricPoint::from_columns(wire.id, wire.kind, wire.delta, wire.value)
    }
}

impl From<MetricPoint> for WireMetric {
    fn from(point: MetricPoint) -> Self {
        WireMetric {
            kind: point.kind(),
            delta: point.delta(),
            value: point.gauge_value(),
            id: point.name,
        }
    }
}
