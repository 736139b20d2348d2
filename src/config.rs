//! Validation helpers for command-line configuration.

use crate::mac_address::{MacAddress, ParseMacError};
use std::time::Duration;
use thiserror::Error;

/// Default pause between finishing one device and connecting to the next.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(30);

/// Errors in user-supplied configuration. Fatal at startup.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Please specify device MAC-Address in format AA:BB:CC:DD:EE:FF ('{address}': {source})")]
    InvalidAddress {
        address: String,
        source: ParseMacError,
    },
    #[error("no device address given")]
    NoDevices,
    #[error("invalid alias '{0}': expected format MAC=NAME")]
    InvalidAlias(String),
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
}

/// Parse one sensor address, colon separated or bare hex.
pub fn parse_device(src: &str) -> Result<MacAddress, ConfigError> {
    let src = src.trim();
    src.parse().map_err(|source| ConfigError::InvalidAddress {
        address: src.to_string(),
        source,
    })
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use lywsd03mmc_listener::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, ConfigError> {
    let src = src.trim();
    let invalid = || ConfigError::InvalidDuration(src.to_string());

    let (num, unit_secs, millis) = if let Some(num) = src.strip_suffix("ms") {
        (num, 0, true)
    } else if let Some(num) = src.strip_suffix('h') {
        (num, 3600, false)
    } else if let Some(num) = src.strip_suffix('m') {
        (num, 60, false)
    } else if let Some(num) = src.strip_suffix('s') {
        (num, 1, false)
    } else {
        (src, 1, false)
    };

    let value: u64 = num.trim().parse().map_err(|_| invalid())?;
    if millis {
        return Ok(Duration::from_millis(value));
    }
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}
