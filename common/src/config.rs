//! Device configuration.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Result type for configuration checks.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Default I2C bus (`/dev/i2c-1` on a Raspberry Pi).
pub const DEFAULT_BUS_ID: u8 = 1;
/// Default INA219 address with A0 and A1 tied to ground.
pub const DEFAULT_ADDRESS: u8 = 0x40;
/// Default shunt resistor found on most breakout boards.
pub const DEFAULT_SHUNT_OHMS: f64 = 0.1;
/// Default upper bound on the current expected through the shunt.
pub const DEFAULT_MAX_EXPECTED_AMPS: f64 = 3.2;

const ADDRESS_RANGE: RangeInclusive<u8> = 0x00..=0x7F;
const SHUNT_OHMS_RANGE: RangeInclusive<f64> = 0.001..=1.0;
const MAX_EXPECTED_AMPS_RANGE: RangeInclusive<f64> = 0.1..=10.0;

/// Configuration values outside of what the hardware supports.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// I2C addresses are seven bits wide.
    #[error("I2C address {0:#04x} is outside 0x00-0x7F")]
    Address(u8),
    /// Shunt resistance is not within 0.001-1.0 ohms.
    #[error("shunt resistance {0} ohms is outside 0.001-1.0")]
    ShuntResistance(f64),
    /// Maximum expected current is not within 0.1-10.0 amps.
    #[error("maximum expected current {0} A is outside 0.1-10.0")]
    MaxExpectedCurrent(f64),
}

/// Identifies one physical device and its measurement range.
///
/// Values are fixed once a coordinator has been built from them.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// I2C bus number.
    pub bus_id: u8,
    /// Seven-bit I2C address of the device.
    pub address: u8,
    /// Resistance of the shunt resistor in ohms.
    pub shunt_resistance_ohms: f64,
    /// Largest current expected through the shunt in amps.
    pub max_expected_current_amps: f64,
}

impl DeviceConfig {
    /// Create a new device configuration.
    pub fn new(bus_id: u8,
               address: u8,
               shunt_resistance_ohms: f64,
               max_expected_current_amps: f64) -> DeviceConfig
    {
        DeviceConfig {
            bus_id,
            address,
            shunt_resistance_ohms,
            max_expected_current_amps,
        }
    }

    /// Check every value against the ranges the hardware supports.
    pub fn validate(&self) -> Result<()> {
        if !ADDRESS_RANGE.contains(&self.address) {
            return Err(ConfigError::Address(self.address));
        }
        if !SHUNT_OHMS_RANGE.contains(&self.shunt_resistance_ohms) {
            return Err(ConfigError::ShuntResistance(self.shunt_resistance_ohms));
        }
        if !MAX_EXPECTED_AMPS_RANGE.contains(&self.max_expected_current_amps) {
            return Err(ConfigError::MaxExpectedCurrent(self.max_expected_current_amps));
        }

        Ok(())
    }

    /// Human-readable name of the device.
    pub fn title(&self) -> String {
        format!("INA219 (0x{:02X})", self.address)
    }

    /// Identifier unique to one bus/address pair.
    pub fn unique_id(&self) -> String {
        format!("{}_{}", self.bus_id, self.address)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig::new(DEFAULT_BUS_ID,
                          DEFAULT_ADDRESS,
                          DEFAULT_SHUNT_OHMS,
                          DEFAULT_MAX_EXPECTED_AMPS)
    }
}
