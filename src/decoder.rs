//! Decoding of LYWSD03MMC temperature/humidity notifications.
//!
//! The sensor pushes a fixed 5-byte little-endian payload on its
//! measurement characteristic:
//!
//! | bytes | type | meaning                      |
//! |-------|------|------------------------------|
//! | 0..2  | i16  | temperature, 0.01 °C         |
//! | 2     | u8   | relative humidity, percent   |
//! | 3..5  | u16  | battery voltage, millivolts  |

use crate::mac_address::MacAddress;
use crate::measurement::Measurement;
use thiserror::Error;

/// Minimum notification length accepted by [`decode_notification`].
pub const PAYLOAD_LEN: usize = 5;

/// Voltage that maps to an empty battery.
const BATTERY_EMPTY_VOLTS: f64 = 2.1;

/// Error types for decoding notification payloads.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Payload was shorter than the fixed layout
    #[error("Invalid data: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
}

/// Convenience alias for decoded measurements or decode errors.
pub type MeasurementResult = Result<Measurement, DecodeError>;

/// Estimate remaining battery from the cell voltage.
///
/// 2.1 V maps to 0 % and 3.1 V or more to 100 %. The difference is rounded
/// to two decimals before scaling and the result is truncated, so readings
/// below 2.1 V produce negative percentages. Those are kept as-is.
///
/// Rounding is done on the exact binary value, as `{:.2}` formatting does.
pub fn battery_percent(voltage: f64) -> i16 {
    let above_empty = voltage - BATTERY_EMPTY_VOLTS;
    let rounded = format!("{above_empty:.2}")
        .parse::<f64>()
        .unwrap_or(above_empty);
    ((rounded * 100.0) as i16).min(100)
}

/// Decode a notification payload into a [`Measurement`].
///
/// # Arguments
/// * `mac` - Address of the sensor that sent the payload
/// * `data` - Raw notification value; bytes past the fifth are ignored
/// * `estimate_battery` - Also derive the battery percentage from the voltage
/// * `timestamp` - Receipt time in seconds since the Unix epoch
pub fn decode_notification(
    mac: MacAddress,
    data: &[u8],
    estimate_battery: bool,
    timestamp: u64,
) -> MeasurementResult {
    if data.len() < PAYLOAD_LEN {
        return Err(DecodeError::TooShort {
            expected: PAYLOAD_LEN,
            actual: data.len(),
        });
    }

    let temperature = f64::from(i16::from_le_bytes([data[0], data[1]])) / 100.0;
    let humidity = data[2];
    let voltage = f64::from(u16::from_le_bytes([data[3], data[4]])) / 1000.0;

    Ok(Measurement {
        mac,
        timestamp,
        temperature,
        humidity,
        voltage,
        battery: estimate_battery.then(|| battery_percent(voltage)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_MAC, encode_payload};

    #[test]
    fn test_decode_known_payload() {
        // 0x0866 = 2150 -> 21.50 °C, 0x2D = 45 %, 0x0B86 = 2950 mV
        let data = [0x66, 0x08, 0x2D, 0x86, 0x0B];
        let m = decode_notification(TEST_MAC, &data, false, 42).unwrap();
        assert_eq!(m.mac, TEST_MAC);
        assert_eq!(m.timestamp, 42);
        assert_eq!(m.temperature, 21.5);
        assert_eq!(m.humidity, 45);
        assert_eq!(m.voltage, 2.95);
        assert_eq!(m.battery, None);
    }

    #[test]
    fn test_decode_negative_temperature() {
        // -5.25 °C = -525 = 0xFDF3
        let data = [0xF3, 0xFD, 0x50, 0xB8, 0x0B];
        let m = decode_notification(TEST_MAC, &data, false, 0).unwrap();
        assert_eq!(m.temperature, -5.25);
        assert_eq!(m.humidity, 80);
        assert_eq!(m.voltage, 3.0);
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut data = encode_payload(19.99, 51, 2.8);
        data.extend_from_slice(&[0xFF, 0xFF]);
        let m = decode_notification(TEST_MAC, &data, false, 0).unwrap();
        assert_eq!(m.temperature, 19.99);
        assert_eq!(m.humidity, 51);
    }

    #[test]
    fn test_decode_too_short() {
        let err = decode_notification(TEST_MAC, &[0x01, 0x02, 0x03, 0x04], false, 0).unwrap_err();
        assert_eq!(
            err,
            DecodeError::TooShort {
                expected: 5,
                actual: 4
            }
        );
        assert_eq!(
            err.to_string(),
            "Invalid data: expected at least 5 bytes, got 4"
        );
        assert!(decode_notification(TEST_MAC, &[], true, 0).is_err());
    }

    #[test]
    fn test_decode_is_deterministic() {
        let data = encode_payload(23.17, 38, 2.713);
        let a = decode_notification(TEST_MAC, &data, true, 1).unwrap();
        let b = decode_notification(TEST_MAC, &data, true, 999).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.battery, b.battery);
    }

    #[test]
    fn test_encoded_values_are_recovered() {
        for (t, h, v) in [(0.0, 0, 0.0), (-40.0, 100, 3.3), (25.37, 63, 2.875)] {
            let m = decode_notification(TEST_MAC, &encode_payload(t, h, v), false, 0).unwrap();
            assert!((m.temperature - t).abs() < 0.005, "temperature {t}");
            assert_eq!(m.humidity, h);
            assert!((m.voltage - v).abs() < 0.0005, "voltage {v}");
        }
    }

    #[test]
    fn test_battery_percent_reference_points() {
        assert_eq!(battery_percent(3.10), 100);
        assert_eq!(battery_percent(2.10), 0);
        assert_eq!(battery_percent(2.60), 50);
        assert_eq!(battery_percent(2.00), -10);
    }

    #[test]
    fn test_battery_percent_half_cent_voltages() {
        assert_eq!(battery_percent(2.225), 12);
        assert_eq!(battery_percent(2.435), 33);
        assert_eq!(battery_percent(2.685), 57);
        assert_eq!(battery_percent(2.705), 60);
        assert_eq!(battery_percent(2.955), 85);
        // Raw millivolts go through the same division as the decoder
        assert_eq!(battery_percent(f64::from(2685u16) / 1000.0), 57);
    }

    #[test]
    fn test_battery_percent_clamps_high_only() {
        assert_eq!(battery_percent(3.3), 100);
        assert!(battery_percent(1.5) < 0);
    }

    #[test]
    fn test_decode_with_battery_estimate() {
        let m = decode_notification(TEST_MAC, &encode_payload(20.0, 40, 2.6), true, 0).unwrap();
        assert_eq!(m.battery, Some(50));
    }
}
