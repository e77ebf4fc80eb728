//! Observers exposing one measurement each.

use std::fmt;
use std::fmt::Display;

use serde::Serialize;

use crate::coordinator::{PollingCoordinator, SnapshotView};
use crate::snapshot::Snapshot;

/// Quantity an observer reports.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Measurement {
    /// Bus voltage
    Voltage,
    /// Shunt current
    Current,
    /// Power
    Power,
}

impl Measurement {
    /// Every measurement, in reporting order.
    pub const ALL: [Measurement; 3] = [Measurement::Voltage, Measurement::Current, Measurement::Power];

    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            Measurement::Voltage => "Voltage",
            Measurement::Current => "Current",
            Measurement::Power => "Power",
        }
    }

    /// Unit of the value in a [`Snapshot`].
    pub fn unit(&self) -> &'static str {
        match self {
            Measurement::Voltage => "V",
            Measurement::Current => "A",
            Measurement::Power => "W",
        }
    }

    /// Pick this measurement out of a snapshot.
    pub fn extract(&self, snapshot: &Snapshot) -> f64 {
        match self {
            Measurement::Voltage => snapshot.voltage(),
            Measurement::Current => snapshot.current(),
            Measurement::Power => snapshot.power(),
        }
    }
}

/// Read-only consumer of a coordinator's snapshot, interested in one field.
#[derive(Clone, Debug)]
pub struct Observer {
    measurement: Measurement,
    unique_id: String,
    view: SnapshotView,
}

impl Observer {
    /// Bind an observer to a coordinator.
    pub fn new(coordinator: &PollingCoordinator, measurement: Measurement) -> Observer {
        let unique_id = format!("{}_{}",
                                coordinator.config().unique_id(),
                                measurement.name().to_lowercase());
        Observer {
            measurement,
            unique_id,
            view: coordinator.view(),
        }
    }

    /// Measurement this observer reports.
    pub fn measurement(&self) -> Measurement {
        self.measurement
    }

    /// Identifier unique to the device and measurement.
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Latest value, or `None` when no refresh has ever succeeded.
    pub fn value(&self) -> Option<f64> {
        self.view.current_snapshot()
            .map(|snapshot| self.measurement.extract(&snapshot))
    }

    /// Returns true if the latest refresh failed and the value is left over from an earlier one.
    pub fn is_stale(&self) -> bool {
        self.view.last_error().is_some()
    }
}

impl Display for Observer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.value() {
            Some(value) => write!(f, "{}: {:.3} {}",
                                  self.measurement.name(),
                                  value,
                                  self.measurement.unit()),
            None => write!(f, "{}: unavailable", self.measurement.name()),
        }
    }
}

/// Bind one observer per measurement.
pub fn bind_all(coordinator: &PollingCoordinator) -> Vec<Observer> {
    Measurement::ALL.iter()
        .map(|measurement| Observer::new(coordinator, *measurement))
        .collect()
}
