//! Report output formatting.

use std::fmt;
use std::fmt::{Debug, Display};

use serde::Serialize;

use powerwatch_common::config::DeviceConfig;
use powerwatch_common::observer::{Measurement, Observer};
use powerwatch_common::snapshot::{RefreshError, RefreshState, Snapshot};

/// Everything printed for one reporting period.
///
/// All values come from the one captured state, so a cycle finishing while
/// the report is built cannot mix two snapshots.
#[derive(Debug, Serialize)]
pub struct Report {
    device: String,
    unique_id: String,
    values: Vec<Reading>,
    snapshot: Option<Snapshot>,
    error: Option<RefreshError>,
}

impl Report {
    /// Collect the observers' measurements from a refresh state.
    pub fn collect(config: &DeviceConfig, observers: &[Observer], state: RefreshState) -> Report {
        let snapshot = state.snapshot();
        Report {
            device: config.title(),
            unique_id: config.unique_id(),
            values: observers.iter()
                .map(|observer| Reading {
                    measurement: observer.measurement(),
                    value: snapshot.as_ref().map(|snapshot| observer.measurement().extract(snapshot)),
                    unit: observer.measurement().unit(),
                })
                .collect(),
            snapshot: snapshot.map(|snapshot| (*snapshot).clone()),
            error: state.error(),
        }
    }
}

/// One observer's value; `None` while unavailable.
#[derive(Debug, Serialize)]
struct Reading {
    measurement: Measurement,
    value: Option<f64>,
    unit: &'static str,
}

impl Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.value {
            Some(value) => write!(f, "{}: {:.3} {}", self.measurement.name(), value, self.unit),
            None => write!(f, "{}: unavailable", self.measurement.name()),
        }
    }
}

/// Writer for periodic reports.
pub trait ReportWriter: Debug {
    /// Format a report.
    fn format(&self, report: &Report) -> Result<String, String>;

    /// Print a report to standard output.
    fn write(&self, report: &Report) -> Result<(), String> {
        println!("{}", self.format(report)?);
        Ok(())
    }
}

/// Human-readable, multi-line reports.
#[derive(Debug, Default)]
pub struct TextWriter;

impl TextWriter {
    pub fn new() -> TextWriter {
        TextWriter
    }
}

impl ReportWriter for TextWriter {
    fn format(&self, report: &Report) -> Result<String, String> {
        let mut text = match report.snapshot {
            Some(ref snapshot) => format!("{} @ {}", report.device, snapshot.timestamp().to_rfc3339()),
            None => report.device.clone(),
        };
        for reading in &report.values {
            text.push_str(&format!("\n  {}", reading));
        }
        if let Some(ref e) = report.error {
            text.push_str(&format!("\n  last refresh failed: {}", e));
        }

        Ok(text)
    }
}

/// One JSON object per report.
#[derive(Debug, Default)]
pub struct JSONLinesWriter;

impl JSONLinesWriter {
    pub fn new() -> JSONLinesWriter {
        JSONLinesWriter
    }
}

impl ReportWriter for JSONLinesWriter {
    fn format(&self, report: &Report) -> Result<String, String> {
        serde_json::to_string(report)
            .map_err(|e| format!("failed to serialize report: {}", e))
    }
}
