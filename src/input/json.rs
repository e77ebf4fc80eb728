use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value as JSONValue;

use powerwatch_common::config::DeviceConfig;
use powerwatch_common::coordinator::DEFAULT_INTERVAL;

use super::{MonitorConfig, MonitorConfigReader, Result};
use super::error::Error;

const CONFIG_VERSION: i64 = 1;

/// Reads monitor settings from a JSON file.
///
/// ```json
/// {
///     "_version": 1,
///     "device": { "bus_id": 1, "address": 64, "shunt_resistance_ohms": 0.1 },
///     "interval": 30
/// }
/// ```
#[derive(Debug)]
pub struct JSONConfigParser {
    config_path: PathBuf,
}

impl JSONConfigParser {
    pub fn new(config_path: &Path) -> JSONConfigParser {
        JSONConfigParser {
            config_path: config_path.to_path_buf(),
        }
    }
}

impl MonitorConfigReader for JSONConfigParser {
    fn read(&self) -> Result<MonitorConfig> {
        let mut text = String::new();
        let mut file = File::open(self.config_path.as_path())?;
        file.read_to_string(&mut text)?;

        parse(&text)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    _version: i64,
    #[serde(default)]
    device: DeviceConfig,
    interval: Option<f64>,
}

/// Parse monitor settings from JSON text.
pub fn parse(text: &str) -> Result<MonitorConfig> {
    let json: JSONValue = serde_json::from_str(text)?;

    // Check file version.
    json["_version"].as_i64()
        .ok_or(Error::Format("Missing '_version' specifier.".to_string()))
        .and_then(|ver| if ver == CONFIG_VERSION {
            Ok(())
        } else {
            let msg = format!(
                "Configuration not compatible (provided: {}, required: {}).",
                ver,
                CONFIG_VERSION);
            Err(Error::Format(msg))
        })?;

    let config: FileConfig = serde_json::from_value(json)
        .map_err(|e| Error::Format(format!("configuration parsing failed: {}", e)))?;

    let interval = match config.interval {
        Some(secs) => match Duration::try_from_secs_f64(secs) {
            Ok(interval) if !interval.is_zero() => interval,
            _ => return Err(Error::Format(format!("'interval' must be a positive number of seconds, not {}", secs))),
        },
        None => DEFAULT_INTERVAL,
    };

    Ok(MonitorConfig {
        device: config.device,
        interval,
    })
}
