//! Device channel port.
//!
//! A device channel is the only way measurements leave the hardware.
//! The coordinator owns exactly one channel and is the only caller of it.

use std::fmt::Debug;

/// Result type for device channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Failures reported by a device channel.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ChannelError {
    /// Device is absent, unreachable, or rejected its configuration.
    #[error("cannot connect to device: {0}")]
    Connection(String),
    /// A measured quantity is beyond the configured measurement range.
    #[error("measurement out of device range: {0}")]
    RangeExceeded(String),
    /// Any other I/O failure while talking to the device.
    #[error("error communicating with device: {0}")]
    Communication(String),
}

/// A fallible, stateful handle to a voltage/current/power transducer.
///
/// `configure` must succeed once before any read. Current and power are
/// reported in the device's native milli-units.
pub trait DeviceChannel: Debug + Send {
    /// Apply operating range and gain settings.
    fn configure(&mut self) -> Result<()>;

    /// Bus voltage in volts.
    fn read_voltage(&mut self) -> Result<f64>;

    /// Current through the shunt in milliamps.
    fn read_current_milliamps(&mut self) -> Result<f64>;

    /// Power in milliwatts.
    fn read_power_milliwatts(&mut self) -> Result<f64>;
}
