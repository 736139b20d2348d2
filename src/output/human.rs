use crate::measurement::Measurement;
use crate::output::OutputFormatter;
use std::fmt::Write;

/// Plain text formatter: `Kitchen temperature=21.50°C humidity=45% voltage=2.950V battery=85%`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HumanFormatter;

impl OutputFormatter for HumanFormatter {
    fn format(&self, m: &Measurement, name: &str) -> String {
        let mut line = format!(
            "{name} temperature={:.2}°C humidity={}% voltage={:.3}V",
            m.temperature, m.humidity, m.voltage
        );
        if let Some(battery) = m.battery {
            let _ = write!(line, " battery={battery}%");
        }
        line
    }
}
