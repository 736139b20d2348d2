//! Compact MAC address type for the polled sensors.
//!
//! Addresses are accepted either colon separated (`A4:C1:38:12:34:56`) or as
//! twelve bare hex digits (`A4C138123456`). Mixing the two forms is rejected.

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth MAC address stored as a 6-byte array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Errors returned when parsing a MAC address string.
#[derive(Error, Debug, PartialEq)]
pub enum ParseMacError {
    #[error("invalid MAC address: expected 6 parts, got {0}")]
    InvalidLength(usize),
    #[error("invalid MAC address: part {0} has wrong length")]
    InvalidPartLength(usize),
    #[error("invalid MAC address: '{0}' is not valid hex")]
    InvalidHex(String),
}

fn parse_part(index: usize, part: &str) -> Result<u8, ParseMacError> {
    if part.len() != 2 {
        return Err(ParseMacError::InvalidPartLength(index));
    }
    if !part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseMacError::InvalidHex(part.to_string()));
    }
    u8::from_str_radix(part, 16).map_err(|_| ParseMacError::InvalidHex(part.to_string()))
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];

        if !s.contains(':') {
            if !s.is_ascii() {
                return Err(ParseMacError::InvalidHex(s.to_string()));
            }
            if s.len() != 12 {
                // Bare form is one run of hex digits; count pairs for the message.
                return Err(ParseMacError::InvalidLength(s.len().div_ceil(2)));
            }
            for (i, byte) in bytes.iter_mut().enumerate() {
                *byte = parse_part(i, &s[i * 2..i * 2 + 2])?;
            }
            return Ok(MacAddress(bytes));
        }

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(ParseMacError::InvalidLength(parts.len()));
        }
        for (i, part) in parts.iter().enumerate() {
            bytes[i] = parse_part(i, part)?;
        }

        Ok(MacAddress(bytes))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

#[cfg(feature = "bluer")]
impl From<MacAddress> for bluer::Address {
    fn from(addr: MacAddress) -> Self {
        bluer::Address(addr.0)
    }
}
