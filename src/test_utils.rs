use crate::mac_address::MacAddress;
use crate::measurement::Measurement;

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xA4, 0xC1, 0x38, 0xAA, 0xBB, 0xCC]);

/// A second address for rotation tests.
pub const OTHER_MAC: MacAddress = MacAddress([0xA4, 0xC1, 0x38, 0x11, 0x22, 0x33]);

/// Build a `Measurement` with plausible room values and no battery estimate.
///
/// Tests can override just the fields they care about.
pub fn base_measurement(mac: MacAddress, timestamp: u64) -> Measurement {
    Measurement {
        mac,
        timestamp,
        temperature: 21.5,
        humidity: 45,
        voltage: 2.95,
        battery: None,
    }
}

/// Encode values into the 5-byte notification layout the sensor sends.
pub fn encode_payload(temperature: f64, humidity: u8, voltage: f64) -> Vec<u8> {
    let raw_temp = (temperature * 100.0).round() as i16;
    let raw_volt = (voltage * 1000.0).round() as u16;
    let mut payload = Vec::with_capacity(5);
    payload.extend_from_slice(&raw_temp.to_le_bytes());
    payload.push(humidity);
    payload.extend_from_slice(&raw_volt.to_le_bytes());
    payload
}
