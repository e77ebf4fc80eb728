//! Monitor settings compiled into the binary.

use powerwatch_common::config::DeviceConfig;
use powerwatch_common::coordinator::DEFAULT_INTERVAL;

use super::{MonitorConfig, MonitorConfigReader, Result};

/// Defaults for a breakout board at 0x40 on `/dev/i2c-1`.
#[derive(Debug, Default)]
pub struct HardCodedConfig;

impl HardCodedConfig {
    pub fn new() -> HardCodedConfig {
        HardCodedConfig
    }
}

impl MonitorConfigReader for HardCodedConfig {
    fn read(&self) -> Result<MonitorConfig> {
        Ok(MonitorConfig {
            device: DeviceConfig::default(),
            interval: DEFAULT_INTERVAL,
        })
    }
}
