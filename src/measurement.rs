//! LYWSD03MMC measurement data structure.

use crate::mac_address::MacAddress;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single reading delivered by a sensor notification.
///
/// Two measurements are equal when their temperature, humidity, voltage and
/// battery estimate match. The device address and receipt timestamp are not
/// compared, so equality answers "did the reading change?".
#[derive(Debug, Clone)]
pub struct Measurement {
    /// Address of the sensor that sent the notification
    pub mac: MacAddress,
    /// Receipt time in seconds since the Unix epoch
    pub timestamp: u64,
    /// Temperature in Celsius, 0.01 resolution
    pub temperature: f64,
    /// Relative humidity in percent
    pub humidity: u8,
    /// Battery voltage in Volts, 0.001 resolution
    pub voltage: f64,
    /// Estimated battery level in percent, only when estimation is enabled.
    /// Can be negative for voltages below 2.1 V.
    pub battery: Option<i16>,
}

impl PartialEq for Measurement {
    fn eq(&self, other: &Self) -> bool {
        self.temperature == other.temperature
            && self.humidity == other.humidity
            && self.voltage == other.voltage
            && self.battery == other.battery
    }
}

/// Current wall clock time in whole seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
