//! MAC address aliasing for sensors.
//!
//! Maps addresses to human-readable names so output lines identify the room
//! rather than the radio.

use crate::config::ConfigError;
use crate::mac_address::MacAddress;
use std::collections::BTreeMap;

/// A type alias for MAC-to-name mappings.
pub type AliasMap = BTreeMap<MacAddress, String>;

/// A parsed alias mapping a MAC address to a human-readable name.
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub address: MacAddress,
    pub name: String,
}

/// Parse an alias from a string in the format "MAC=NAME".
///
/// # Example
/// ```
/// use lywsd03mmc_listener::alias::parse_alias;
///
/// let alias = parse_alias("A4:C1:38:AA:BB:CC=Kitchen").unwrap();
/// assert_eq!(alias.address.to_string(), "A4:C1:38:AA:BB:CC");
/// assert_eq!(alias.name, "Kitchen");
/// ```
pub fn parse_alias(src: &str) -> Result<Alias, ConfigError> {
    let (address, name) = src
        .split_once('=')
        .ok_or_else(|| ConfigError::InvalidAlias(src.to_string()))?;
    let address = address
        .trim()
        .parse()
        .map_err(|source| ConfigError::InvalidAddress {
            address: address.to_string(),
            source,
        })?;
    Ok(Alias {
        address,
        name: name.to_string(),
    })
}

/// Convert a slice of Alias values into an AliasMap.
pub fn to_map(aliases: &[Alias]) -> AliasMap {
    aliases
        .iter()
        .map(|a| (a.address, a.name.clone()))
        .collect()
}

/// Name to display for `mac`: its alias, or the address itself.
pub fn resolve_name(mac: &MacAddress, aliases: &AliasMap) -> String {
    aliases
        .get(mac)
        .cloned()
        .unwrap_or_else(|| mac.to_string())
}
