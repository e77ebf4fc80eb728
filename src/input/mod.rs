//! Pluggable sources of monitor configuration.

use std::fmt::Debug;
use std::time::Duration;

use powerwatch_common::config::DeviceConfig;

pub mod error;
pub mod hard_code;
pub mod json;

type Result<T> = std::result::Result<T, error::Error>;

/// Settings read from a configuration source, before command-line overrides.
#[derive(Clone, Debug, PartialEq)]
pub struct MonitorConfig {
    /// Device to monitor.
    pub device: DeviceConfig,
    /// Refresh period.
    pub interval: Duration,
}

/// Configuration reader producing monitor settings from an input source.
pub trait MonitorConfigReader: Debug {
    /// Read the monitor settings.
    fn read(&self) -> Result<MonitorConfig>;
}
