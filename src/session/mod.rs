//! GATT connection session for a single sensor.
//!
//! The BLE stack is reached through the [`Transport`] and [`Link`] traits so
//! the poll loop can be exercised without Bluetooth hardware. A [`Session`]
//! owns one link, enables the measurement notifications on open, and hands
//! out notifications one at a time.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "gatttool")]
pub mod gatttool;

use crate::mac_address::MacAddress;
use log::debug;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Client characteristic configuration descriptor of the
/// temperature/humidity/voltage characteristic.
pub const MEASUREMENT_CCCD_HANDLE: u16 = 0x0038;

/// Value written to [`MEASUREMENT_CCCD_HANDLE`] to enable notifications.
pub const ENABLE_NOTIFICATIONS: [u8; 2] = [0x01, 0x00];

/// Connection interval characteristic.
pub const CONNECTION_INTERVAL_HANDLE: u16 = 0x0046;

/// 500 (0x01F4) connection interval units, lowers sensor power draw.
pub const CONNECTION_INTERVAL: [u8; 3] = [0xf4, 0x01, 0x00];

/// How long a single wait for a notification may block.
pub const NOTIFICATION_TIMEOUT: Duration = Duration::from_millis(2000);

/// Error type for session operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Link could not be established or set up
    #[error("connect error: {0}")]
    Connect(String),
    /// An established link dropped
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// A value pushed by the peripheral on a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub handle: u16,
    pub value: Vec<u8>,
}

/// Boxed future returned by the object-safe transport traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An established GATT link.
pub trait Link: Send {
    /// Write `value` to the attribute at `handle`.
    fn write_characteristic<'a>(
        &'a mut self,
        handle: u16,
        value: &'a [u8],
        with_response: bool,
    ) -> BoxFuture<'a, Result<(), SessionError>>;

    /// Wait up to `timeout` for the next notification. `Ok(None)` means the
    /// timeout elapsed without data.
    fn wait_for_notification(
        &mut self,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Option<Notification>, SessionError>>;

    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), SessionError>>;
}

/// BLE capability: establishes links to peripherals.
pub trait Transport: Send + Sync {
    fn connect(&self, address: MacAddress) -> BoxFuture<'_, Result<Box<dyn Link>, SessionError>>;
}

/// Subscribed connection to one sensor.
pub struct Session {
    address: MacAddress,
    link: Option<Box<dyn Link>>,
}

impl Session {
    /// Connect to `address` and enable measurement notifications.
    ///
    /// Any failure, including a rejected characteristic write, is reported
    /// as [`SessionError::Connect`]. A half-open link is torn down first.
    pub async fn open(transport: &dyn Transport, address: MacAddress) -> Result<Self, SessionError> {
        let mut link = transport.connect(address).await.map_err(into_connect)?;

        let setup: Result<(), SessionError> = async {
            link.write_characteristic(MEASUREMENT_CCCD_HANDLE, &ENABLE_NOTIFICATIONS, true)
                .await?;
            link.write_characteristic(CONNECTION_INTERVAL_HANDLE, &CONNECTION_INTERVAL, true)
                .await
        }
        .await;

        if let Err(e) = setup {
            if let Err(close_err) = link.disconnect().await {
                debug!("{address}: disconnect after failed setup: {close_err}");
            }
            return Err(into_connect(e));
        }

        Ok(Self {
            address,
            link: Some(link),
        })
    }

    #[cfg(test)]
    pub(crate) fn address(&self) -> MacAddress {
        self.address
    }

    #[cfg(test)]
    pub(crate) fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// Wait up to `timeout` for the next notification.
    ///
    /// Returns `Ok(None)` on timeout. A dropped link, or a session that was
    /// already closed, yields [`SessionError::ConnectionLost`].
    pub async fn wait_for_notification(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Notification>, SessionError> {
        match self.link.as_mut() {
            Some(link) => link.wait_for_notification(timeout).await,
            None => Err(SessionError::ConnectionLost("session closed".into())),
        }
    }

    /// Release the link. Calling this on a closed session does nothing.
    pub async fn close(&mut self) {
        if let Some(mut link) = self.link.take()
            && let Err(e) = link.disconnect().await
        {
            debug!("{}: disconnect: {e}", self.address);
        }
    }
}

fn into_connect(err: SessionError) -> SessionError {
    match err {
        SessionError::ConnectionLost(msg) => SessionError::Connect(msg),
        connect => connect,
    }
}

/// Available BLE transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ `gatttool` in interactive mode, run as a child process
    #[cfg(feature = "gatttool")]
    Gatttool,
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "gatttool")]
        return Backend::Gatttool;
        #[cfg(all(feature = "bluer", not(feature = "gatttool")))]
        return Backend::Bluer;
        #[cfg(not(any(feature = "bluer", feature = "gatttool")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl Backend {
    /// Name of the helper process this backend runs below our own pid.
    pub fn helper_name(self) -> Option<&'static str> {
        match self {
            #[cfg(feature = "gatttool")]
            Backend::Gatttool => Some("gatttool"),
            #[cfg(feature = "bluer")]
            Backend::Bluer => None,
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "gatttool")]
            Backend::Gatttool => write!(f, "gatttool"),
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "gatttool")]
            "gatttool" => Ok(Backend::Gatttool),
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Create the transport for `backend`.
pub async fn create_transport(backend: Backend) -> Result<Box<dyn Transport>, SessionError> {
    match backend {
        #[cfg(feature = "gatttool")]
        Backend::Gatttool => Ok(Box::new(gatttool::GatttoolTransport::default())),
        #[cfg(feature = "bluer")]
        Backend::Bluer => Ok(Box::new(bluer::BluerTransport::new().await?)),
    }
}
