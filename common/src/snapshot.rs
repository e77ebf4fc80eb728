//! Measurement snapshots and refresh state.

use std::fmt;
use std::fmt::Display;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::channel::ChannelError;

/// Why a refresh cycle did not produce a snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail")]
pub enum RefreshError {
    /// Device unreachable or failed to configure at start-up.
    #[error("cannot connect to device: {0}")]
    Connection(String),
    /// A measured quantity exceeded the configured range.
    #[error("measurement out of device range: {0}")]
    RangeExceeded(String),
    /// Transient I/O failure.
    #[error("error communicating with device: {0}")]
    Communication(String),
}

impl RefreshError {
    /// Classify a failure from the channel during a background cycle.
    ///
    /// Only range violations keep their identity; a connection failure after
    /// start-up is reported the same way as any other I/O failure.
    pub fn classify(e: ChannelError) -> RefreshError {
        match e {
            ChannelError::RangeExceeded(msg) => RefreshError::RangeExceeded(msg),
            ChannelError::Connection(msg)
                | ChannelError::Communication(msg) => RefreshError::Communication(msg),
        }
    }

    /// Classify a failure of the initial refresh; every failure means setup cannot go on.
    pub fn at_startup(e: ChannelError) -> RefreshError {
        match e {
            ChannelError::Connection(msg) => RefreshError::Connection(msg),
            other => RefreshError::Connection(other.to_string()),
        }
    }

    /// Returns true for [`RefreshError::RangeExceeded`].
    pub fn is_range_exceeded(&self) -> bool {
        matches!(self, RefreshError::RangeExceeded(_))
    }
}

/// One complete voltage/current/power reading.
///
/// A snapshot is only ever built from all three quantities of a single
/// cycle and is never modified afterwards.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Snapshot {
    voltage: f64,
    current: f64,
    power: f64,
    timestamp: DateTime<Utc>,
}

impl Snapshot {
    /// Create a snapshot from base-unit values (volts, amps, watts).
    pub fn new(voltage: f64, current: f64, power: f64, timestamp: DateTime<Utc>) -> Snapshot {
        Snapshot {
            voltage,
            current,
            power,
            timestamp,
        }
    }

    /// Bus voltage in volts.
    pub fn voltage(&self) -> f64 {
        self.voltage
    }

    /// Current in amps.
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Power in watts.
    pub fn power(&self) -> f64 {
        self.power
    }

    /// Time the cycle producing this snapshot completed.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns true when both snapshots carry the same measurements.
    pub fn same_values(&self, other: &Snapshot) -> bool {
        self.voltage == other.voltage
            && self.current == other.current
            && self.power == other.power
    }
}

impl Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:.3} V, {:.3} A, {:.3} W @ {}",
               self.voltage,
               self.current,
               self.power,
               self.timestamp.to_rfc3339())
    }
}

/// Outcome of the most recent refresh cycle.
#[derive(Clone, Debug, PartialEq)]
pub enum RefreshState {
    /// No cycle has completed yet.
    Uninitialized,
    /// The latest cycle succeeded.
    Ready(Arc<Snapshot>),
    /// The latest cycle failed; the last good snapshot is kept if there was one.
    Failed(RefreshError, Option<Arc<Snapshot>>),
}

impl RefreshState {
    /// Most recent snapshot, whether or not the latest cycle succeeded.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        match self {
            RefreshState::Uninitialized => None,
            RefreshState::Ready(snapshot) => Some(Arc::clone(snapshot)),
            RefreshState::Failed(_e, last_known) => last_known.clone(),
        }
    }

    /// Failure of the latest cycle, if it failed.
    pub fn error(&self) -> Option<RefreshError> {
        match self {
            RefreshState::Failed(e, _last_known) => Some(e.clone()),
            _ => None,
        }
    }

    /// State after a successful cycle.
    pub(crate) fn succeeded(snapshot: Snapshot) -> RefreshState {
        RefreshState::Ready(Arc::new(snapshot))
    }

    /// State after a failed cycle; previously cached data is carried over.
    pub(crate) fn failed(&self, e: RefreshError) -> RefreshState {
        RefreshState::Failed(e, self.snapshot())
    }
}

impl Default for RefreshState {
    fn default() -> Self {
        RefreshState::Uninitialized
    }
}
