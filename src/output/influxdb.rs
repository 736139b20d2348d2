//! InfluxDB line protocol output formatter.

use crate::measurement::Measurement;
use crate::output::OutputFormatter;
use std::collections::BTreeMap;
use std::fmt;

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, FieldValue>,
    /// Seconds since the Unix epoch
    pub timestamp: Option<u64>,
}

/// Escape commas, spaces and equals signs in tag values.
fn escape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | ' ' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", key, escape_tag(value))?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", key, value)?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    if let Some(secs) = data_point.timestamp {
        // Line protocol defaults to nanosecond precision
        write!(fmt, " {}000000000", secs)?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.measurement)?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// InfluxDB line protocol formatter.
pub struct InfluxDbFormatter {
    /// The measurement name in InfluxDB
    measurement_name: String,
}

impl InfluxDbFormatter {
    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn tag_set(&self, measurement: &Measurement, name: &str) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("mac".to_string(), measurement.mac.to_string());
        tags.insert("name".to_string(), name.to_string());
        tags
    }

    /// Humidity is reported as a 0-1 fraction.
    fn field_set(&self, m: &Measurement) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();
        fields.insert("temperature".into(), FieldValue::Float(m.temperature));
        fields.insert(
            "humidity".into(),
            FieldValue::Float(f64::from(m.humidity) / 100.0),
        );
        fields.insert("battery_potential".into(), FieldValue::Float(m.voltage));
        if let Some(battery) = m.battery {
            fields.insert("battery_level".into(), FieldValue::Integer(battery.into()));
        }
        fields
    }

    fn to_data_point(&self, measurement: &Measurement, name: &str) -> DataPoint {
        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: self.tag_set(measurement, name),
            field_set: self.field_set(measurement),
            timestamp: Some(measurement.timestamp),
        }
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, measurement: &Measurement, name: &str) -> String {
        format!("{}", self.to_data_point(measurement, name))
    }
}
