//! [`Transport`] over a local Bluetooth adapter, using btleplug.

use std::time::Duration;

use btleplug::api::{BDAddr, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::{Uuid, uuid};

use crate::error::TransportError;
use crate::transport::{NotificationSender, Transport};

/// Notification characteristic (device → host)
pub const NOTIFY_CHAR_UUID: Uuid = uuid!("00002b10-0000-1000-8000-00805f9b34fb");

/// Write characteristic (host → device)
pub const WRITE_CHAR_UUID: Uuid = uuid!("00002b11-0000-1000-8000-00805f9b34fb");

const LOOKUP_POLL: Duration = Duration::from_millis(250);

struct Link {
    peripheral: Peripheral,
    write_char: Characteristic,
    forwarder: JoinHandle<()>,
}

pub struct BleTransport {
    adapter: Adapter,
    lookup_timeout: Duration,
    link: Option<Link>,
}

impl BleTransport {
    /// Use the first Bluetooth adapter of the host.
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Connect {
                address: "-".to_string(),
                reason: "no Bluetooth adapter found".to_string(),
            })?;
        Ok(Self::with_adapter(adapter))
    }

    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            lookup_timeout: Duration::from_secs(10),
            link: None,
        }
    }

    /// How long to wait for the adapter to see the peripheral.
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Resolve a known address to a peripheral handle. The adapter only
    /// reports peripherals it has heard advertising, so a passive scan runs
    /// until the address shows up.
    async fn lookup(&self, address: &str) -> Result<Peripheral, TransportError> {
        let target: BDAddr = address.parse().map_err(|_| TransportError::Connect {
            address: address.to_string(),
            reason: "not a Bluetooth address".to_string(),
        })?;

        self.adapter.start_scan(ScanFilter::default()).await?;
        let found = tokio::time::timeout(self.lookup_timeout, async {
            loop {
                for peripheral in self.adapter.peripherals().await? {
                    if peripheral.address() == target {
                        return Ok::<_, TransportError>(peripheral);
                    }
                }
                tokio::time::sleep(LOOKUP_POLL).await;
            }
        })
        .await;
        if let Err(err) = self.adapter.stop_scan().await {
            warn!(%err, "failed to stop scan");
        }

        match found {
            Ok(result) => result,
            Err(_) => Err(TransportError::Connect {
                address: address.to_string(),
                reason: format!("not seen by the adapter within {:?}", self.lookup_timeout),
            }),
        }
    }
}

fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic, TransportError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or(TransportError::CharacteristicNotFound(uuid))
}

impl Transport for BleTransport {
    async fn connect(&mut self, address: &str, notifications: NotificationSender) -> Result<(), TransportError> {
        if let Some(old) = self.link.take() {
            old.forwarder.abort();
            if let Err(err) = old.peripheral.disconnect().await {
                warn!(%err, "disconnect of stale link");
            }
        }

        let peripheral = self.lookup(address).await?;
        info!(%address, "connecting");
        peripheral.connect().await.map_err(|e| TransportError::Connect {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        peripheral.discover_services().await?;

        let notify_char = find_characteristic(&peripheral, NOTIFY_CHAR_UUID)?;
        let write_char = find_characteristic(&peripheral, WRITE_CHAR_UUID)?;

        peripheral
            .subscribe(&notify_char)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        let mut stream = peripheral.notifications().await?;

        let forwarder = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid != NOTIFY_CHAR_UUID {
                    continue;
                }
                trace!(bytes = %hex::encode(&notification.value), "notification");
                if notifications.send(Bytes::from(notification.value)).is_err() {
                    break;
                }
            }
            debug!("notification stream ended");
        });

        self.link = Some(Link {
            peripheral,
            write_char,
            forwarder,
        });
        Ok(())
    }

    async fn write(&mut self, packet: Bytes) -> Result<(), TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        link.peripheral
            .write(&link.write_char, &packet, WriteType::WithoutResponse)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let Some(link) = self.link.take() else {
            return Ok(());
        };
        link.forwarder.abort();
        link.peripheral.disconnect().await?;
        info!("disconnected");
        Ok(())
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        if let Some(link) = &self.link {
            link.forwarder.abort();
        }
    }
}
