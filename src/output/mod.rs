//! Output formatters for sensor measurements.
//!
//! The poll loop writes one line per measurement to its output sink using
//! one of these formatters.

pub mod human;
pub mod influxdb;

use crate::measurement::Measurement;

/// Trait for formatting measurements into output lines.
pub trait OutputFormatter: Send + Sync {
    /// Format a measurement.
    ///
    /// # Arguments
    /// * `measurement` - The measurement data to format (includes timestamp)
    /// * `name` - Display name of the sensor (alias or address)
    fn format(&self, measurement: &Measurement, name: &str) -> String;
}

/// Selectable output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Format {
    /// One readable line per measurement
    #[default]
    Human,
    /// InfluxDB line protocol
    Influxdb,
}

/// Build the formatter for `format`.
pub fn formatter(format: Format, influxdb_measurement: &str) -> Box<dyn OutputFormatter> {
    match format {
        Format::Human => Box::new(human::HumanFormatter),
        Format::Influxdb => Box::new(influxdb::InfluxDbFormatter::new(
            influxdb_measurement.to_string(),
        )),
    }
}
