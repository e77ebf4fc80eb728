//! Runtime configuration options.

use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use getopts::{Matches, Options};

use powerwatch_common::config::{ConfigError, DeviceConfig};

use crate::input;
use crate::input::MonitorConfigReader;
use crate::input::hard_code::HardCodedConfig;
use crate::input::json::JSONConfigParser;
use crate::output::{JSONLinesWriter, ReportWriter, TextWriter};

type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Parsing command line failed.
    #[error("{0}")]
    CLI(#[from] getopts::Fail),
    /// Device settings are outside what the hardware supports.
    #[error("invalid device configuration: {0}")]
    Config(#[from] ConfigError),
    /// User requested to see help, not run the program.
    #[error("Program help:\n{0}")]
    Help(String),
    /// Configuration file could not be used.
    #[error("configuration file: {0}")]
    Input(#[from] input::error::Error),
    /// User passed an invalid option.
    #[error("Invalid option: {0}")]
    Invalid(String),
}

#[derive(Debug)]
pub struct Configuration {
    device: DeviceConfig,
    interval: Duration,
    count: Option<u64>,
    writer: Box<dyn ReportWriter>,
}

impl Configuration {
    pub fn get_device(&self) -> &DeviceConfig {
        &self.device
    }

    pub fn get_interval(&self) -> Duration {
        self.interval
    }

    /// Number of reports to print before exiting; unbounded if `None`.
    pub fn get_count(&self) -> Option<u64> {
        self.count
    }

    pub fn get_writer(&self) -> &dyn ReportWriter {
        self.writer.as_ref()
    }
}

fn create_options() -> Options {
    let mut opts = Options::new();
    opts.optopt("c", "config", "read settings from a JSON file", "FILE");
    opts.optopt("b", "bus", "I2C bus number", "BUS");
    opts.optopt("a", "address", "I2C address of the INA219 (e.g., 0x40)", "ADDRESS");
    opts.optopt("s", "shunt", "shunt resistance in ohms", "OHMS");
    opts.optopt("m", "max-amps", "maximum expected current in amps", "AMPS");
    opts.optopt("i", "interval", "seconds between refreshes", "SECONDS");
    opts.optopt("n", "count", "exit after this many reports", "N");
    opts.optflag("j", "json", "print reports as JSON lines");
    opts.optflag("h", "help", "show help");

    opts
}

pub fn parse() -> Result<Configuration> {
    let cli_args: Vec<String> = env::args().collect();
    let (program, args) = match cli_args.split_first() {
        Some((program, args)) => (program.as_str(), args),
        None => ("powerwatch", &cli_args[..]),
    };

    parse_args(program, args)
}

pub fn parse_args(program: &str, args: &[String]) -> Result<Configuration> {
    let opts = create_options();
    let matches = opts.parse(args)?;

    if matches.opt_present("h") {
        let brief = format!("Usage: {} [ options ]", program);
        return Err(Error::Help(opts.usage(&brief)));
    }

    let reader: Box<dyn MonitorConfigReader> = match matches.opt_str("config") {
        Some(path) => Box::new(JSONConfigParser::new(Path::new(&path))),
        // Default to the hard-coded settings.
        None => Box::new(HardCodedConfig::new()),
    };
    let mut settings = reader.read()?;

    // Command-line values override the configuration source.
    if let Some(bus) = opt_value::<u8>(&matches, "bus")? {
        settings.device.bus_id = bus;
    }
    if let Some(address) = matches.opt_str("address") {
        settings.device.address = parse_address(&address)?;
    }
    if let Some(ohms) = opt_value::<f64>(&matches, "shunt")? {
        settings.device.shunt_resistance_ohms = ohms;
    }
    if let Some(amps) = opt_value::<f64>(&matches, "max-amps")? {
        settings.device.max_expected_current_amps = amps;
    }
    if let Some(secs) = opt_value::<f64>(&matches, "interval")? {
        settings.interval = match Duration::try_from_secs_f64(secs) {
            Ok(interval) if !interval.is_zero() => interval,
            _ => return Err(Error::Invalid(format!("'{}' is not a usable interval", secs))),
        };
    }
    settings.device.validate()?;

    let count = opt_value::<u64>(&matches, "count")?;
    let writer: Box<dyn ReportWriter> = if matches.opt_present("json") {
        Box::new(JSONLinesWriter::new())
    } else {
        Box::new(TextWriter::new())
    };

    Ok(Configuration {
        device: settings.device,
        interval: settings.interval,
        count,
        writer,
    })
}

fn opt_value<T: FromStr>(matches: &Matches, name: &'static str) -> Result<Option<T>> {
    match matches.opt_str(name) {
        Some(text) => text.parse::<T>()
            .map(Some)
            .map_err(|_e| Error::Invalid(format!("'{}' is not a valid value for '{}'", text, name))),
        None => Ok(None),
    }
}

/// Accepts decimal or `0x`-prefixed hexadecimal.
fn parse_address(text: &str) -> Result<u8> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => text.parse::<u8>(),
    };

    parsed.map_err(|_e| Error::Invalid(format!("'{}' is not an I2C address", text)))
}
