//! `lywsd03mmc-listener` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup
//! and process exit codes. The connection state machine lives in
//! [`crate::app`] where it can be tested deterministically with an injected
//! transport, process table and output stream.

pub mod alias;
pub mod app;
pub mod config;
pub mod decoder;
pub mod mac_address;
pub mod measurement;
pub mod output;
pub mod process;
pub mod rotator;
pub mod session;
pub mod state;
pub mod watchdog;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use alias::{Alias, AliasMap, parse_alias, resolve_name, to_map};
pub use config::ConfigError;
pub use decoder::{DecodeError, MeasurementResult, battery_percent, decode_notification};
pub use mac_address::MacAddress;
pub use measurement::Measurement;
pub use output::OutputFormatter;
pub use output::human::HumanFormatter;
pub use output::influxdb::InfluxDbFormatter;
pub use process::{LookupError, ProcFs, ProcessTable};
pub use rotator::DeviceRotator;
pub use session::{Backend, Session, SessionError, Transport};
pub use state::{ConnectionState, ConnectionStatus};
pub use watchdog::Watchdog;
