//! [`Link`] implementation over the platform Bluetooth LE stack, using `bluest`.

use anyhow::anyhow;
use async_trait::async_trait;
use bluest::Adapter;
use bluest::Characteristic;
use bluest::Device;
use bluest::Uuid;
use futures_util::StreamExt;
use log::{debug, warn};
use tokio::time::{timeout_at, Duration, Instant};

use crate::link::{set_up_or_undo, Connection, Link, Notifications};
use crate::session::SERVICE_ID;

/// Connects to BM6 modules through the default Bluetooth adapter.
pub struct BluestLink {
    adapter: Adapter,
    connect_retries: u32,
}

impl BluestLink {
    /// Create a new `BluestLink`, waiting for the default adapter to become available.
    pub async fn new(connect_retries: u32) -> anyhow::Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or(anyhow!("Default adapter not found"))?;
        adapter.wait_available().await?;

        Ok(Self { adapter, connect_retries })
    }

    /// Scan until a device with the given address shows up.
    async fn discover_device(&self, address: &str) -> anyhow::Result<Device> {
        let mut adapter_events = self.adapter.scan(&[]).await?;
        while let Some(advertisement) = adapter_events.next().await {
            let id = advertisement.device.id().to_string();
            if id.eq_ignore_ascii_case(address) {
                return Ok(advertisement.device);
            }
        }

        Err(anyhow!("Device {address} not found"))
    }

    async fn discover_characteristics(device: &Device) -> anyhow::Result<Vec<Characteristic>> {
        let service = device
            .discover_services_with_uuid(SERVICE_ID)
            .await?
            .first()
            .ok_or(anyhow!("The specified device does not support the BM6 service."))?
            .clone();
        Ok(service.discover_characteristics().await?)
    }

    async fn try_connect(&self, device: &Device) -> anyhow::Result<()> {
        if device.is_connected().await {
            return Ok(());
        }

        let mut retries = self.connect_retries;
        loop {
            match self.adapter.connect_device(device).await {
                Ok(()) => return Ok(()),
                Err(err) if retries > 0 => {
                    warn!("{}: failed to connect: {err}", device.id());
                    retries -= 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[async_trait]
impl Link for BluestLink {
    type Connection = BluestConnection;

    /// Scan for the device, connect and discover the BM6 characteristics,
    /// all within `timeout`.
    ///
    /// `address` is compared against bluest's `DeviceId`, which is the MAC
    /// address only on Linux. On macOS and Windows the id is a platform
    /// identifier, so it has to be configured in that form instead.
    async fn connect(&self, address: &str, timeout: Duration) -> anyhow::Result<BluestConnection> {
        let deadline = Instant::now() + timeout;
        let device = timeout_at(deadline, self.discover_device(address))
            .await
            .map_err(|_| anyhow!("Timed out connecting"))??;

        let characteristics = set_up_or_undo(
            deadline,
            address,
            async {
                self.try_connect(&device).await?;
                Self::discover_characteristics(&device).await
            },
            || async { Ok(self.adapter.disconnect_device(&device).await?) },
        )
        .await?;
        debug!("{address}: discovered {} characteristics", characteristics.len());

        Ok(BluestConnection { adapter: self.adapter.clone(), device, characteristics })
    }
}

/// A connected BM6 module and its GATT characteristics.
pub struct BluestConnection {
    adapter: Adapter,
    device: Device,
    characteristics: Vec<Characteristic>,
}

impl BluestConnection {
    fn characteristic(&self, id: Uuid) -> anyhow::Result<&Characteristic> {
        self.characteristics
            .iter()
            .find(|c| c.uuid() == id)
            .ok_or(anyhow!("The device does not have characteristic {id}"))
    }
}

#[async_trait]
impl Connection for BluestConnection {
    async fn write(&self, characteristic: Uuid, payload: &[u8], with_response: bool) -> anyhow::Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        if with_response {
            characteristic.write(payload).await?;
        } else {
            characteristic.write_without_response(payload).await?;
        }
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> anyhow::Result<Notifications<'_>> {
        let notifications = self.characteristic(characteristic)?.notify().await?;
        Ok(notifications.map(|n| n.map_err(anyhow::Error::from)).boxed())
    }

    async fn unsubscribe(&self, _characteristic: Uuid) -> anyhow::Result<()> {
        // bluest stops notifications once the stream returned by `subscribe` is dropped
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.adapter.disconnect_device(&self.device).await?;
        Ok(())
    }
}
