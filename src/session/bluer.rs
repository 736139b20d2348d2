//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to talk to the BlueZ daemon. GATT
//! handles are matched against BlueZ object ids: a characteristic object is
//! named after its declaration handle, so its value sits at `id + 1`, and
//! descriptors carry their own handle. BlueZ refuses direct writes to a
//! CCCD, so such a write starts a notification session instead.

use super::{BoxFuture, Link, Notification, SessionError, Transport};
use crate::mac_address::MacAddress;
use bluer::gatt::WriteOp;
use bluer::gatt::remote::{Characteristic, CharacteristicWriteRequest};
use bluer::{Adapter, Device, Uuid};
use futures::{Stream, StreamExt};
use log::debug;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};

/// Client Characteristic Configuration descriptor UUID (0x2902).
const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// How long to wait for BlueZ to resolve services after connecting.
const SERVICES_TIMEOUT: Duration = Duration::from_secs(10);

fn connect_err(err: bluer::Error) -> SessionError {
    SessionError::Connect(format!("Bluetooth error: {err}"))
}

fn lost_err(err: bluer::Error) -> SessionError {
    SessionError::ConnectionLost(format!("Bluetooth error: {err}"))
}

/// Transport backed by the default BlueZ adapter.
pub struct BluerTransport {
    _session: bluer::Session,
    adapter: Adapter,
}

impl BluerTransport {
    pub async fn new() -> Result<Self, SessionError> {
        let session = bluer::Session::new().await.map_err(connect_err)?;
        let adapter = session.default_adapter().await.map_err(connect_err)?;
        adapter.set_powered(true).await.map_err(connect_err)?;
        Ok(Self {
            _session: session,
            adapter,
        })
    }
}

impl Transport for BluerTransport {
    fn connect(&self, address: MacAddress) -> BoxFuture<'_, Result<Box<dyn Link>, SessionError>> {
        Box::pin(async move {
            let device = self.adapter.device(address.into()).map_err(connect_err)?;
            if !device.is_connected().await.map_err(connect_err)? {
                device.connect().await.map_err(connect_err)?;
            }

            let deadline = Instant::now() + SERVICES_TIMEOUT;
            while !device.is_services_resolved().await.map_err(connect_err)? {
                if Instant::now() >= deadline {
                    return Err(SessionError::Connect(
                        "services not resolved in time".into(),
                    ));
                }
                sleep(Duration::from_millis(200)).await;
            }

            Ok(Box::new(BluerLink {
                device,
                notifications: None,
            }) as Box<dyn Link>)
        })
    }
}

type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

struct BluerLink {
    device: Device,
    /// Value handle and stream of the subscribed characteristic
    notifications: Option<(u16, NotificationStream)>,
}

impl BluerLink {
    async fn characteristics(&self) -> Result<Vec<Characteristic>, SessionError> {
        let mut found = Vec::new();
        for service in self.device.services().await.map_err(lost_err)? {
            found.extend(service.characteristics().await.map_err(lost_err)?);
        }
        Ok(found)
    }

    async fn write(
        &mut self,
        handle: u16,
        value: &[u8],
        with_response: bool,
    ) -> Result<(), SessionError> {
        for characteristic in self.characteristics().await? {
            let value_handle = characteristic.id() + 1;

            if value_handle == handle {
                let request = CharacteristicWriteRequest {
                    op_type: if with_response {
                        WriteOp::Request
                    } else {
                        WriteOp::Command
                    },
                    ..Default::default()
                };
                return characteristic
                    .write_ext(value, &request)
                    .await
                    .map_err(lost_err);
            }

            for descriptor in characteristic.descriptors().await.map_err(lost_err)? {
                if descriptor.id() != handle {
                    continue;
                }
                if descriptor.uuid().await.map_err(lost_err)? != CCCD_UUID {
                    return descriptor.write(value).await.map_err(lost_err);
                }
                if value.first().is_some_and(|b| b & 0x01 != 0) {
                    let stream = characteristic.notify().await.map_err(lost_err)?;
                    self.notifications = Some((value_handle, Box::pin(stream)));
                } else {
                    self.notifications = None;
                }
                return Ok(());
            }
        }

        Err(SessionError::Connect(format!(
            "no attribute with handle 0x{handle:04x}"
        )))
    }
}

impl Link for BluerLink {
    fn write_characteristic<'a>(
        &'a mut self,
        handle: u16,
        value: &'a [u8],
        with_response: bool,
    ) -> BoxFuture<'a, Result<(), SessionError>> {
        Box::pin(self.write(handle, value, with_response))
    }

    fn wait_for_notification(
        &mut self,
        limit: Duration,
    ) -> BoxFuture<'_, Result<Option<Notification>, SessionError>> {
        Box::pin(async move {
            let Some((handle, stream)) = self.notifications.as_mut() else {
                return Err(SessionError::ConnectionLost(
                    "notifications not enabled".into(),
                ));
            };
            let handle = *handle;
            match timeout(limit, stream.next()).await {
                Ok(Some(value)) => Ok(Some(Notification { handle, value })),
                Ok(None) => Err(SessionError::ConnectionLost(
                    "notification stream ended".into(),
                )),
                Err(_) => {
                    if self.device.is_connected().await.map_err(lost_err)? {
                        Ok(None)
                    } else {
                        Err(SessionError::ConnectionLost("device disconnected".into()))
                    }
                }
            }
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async move {
            self.notifications = None;
            if let Err(e) = self.device.disconnect().await {
                debug!("{}: disconnect: {e}", self.device.address());
            }
            Ok(())
        })
    }
}
