use std::{future::Future, pin::Pin, str::FromStr, time::Duration};

use async_trait::async_trait;
use btleplug::{
    api::{
        BDAddr, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter,
        ValueNotification, WriteType,
    },
    platform::{Adapter, Manager, Peripheral},
};
use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use thermostat_common::{
    protocol::{NOTIFY_CHARACTERISTIC, WRITE_CHARACTERISTIC},
    BluetoothConfig,
};

use crate::device::{Connection, DeviceError};

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);
const WRITE_UUID: Uuid = Uuid::from_u128(WRITE_CHARACTERISTIC);
const NOTIFY_UUID: Uuid = Uuid::from_u128(NOTIFY_CHARACTERISTIC);

type Notifications = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

struct Link {
    peripheral: Peripheral,
    write: Characteristic,
    notifications: Notifications,
}

/// GATT link to one eQ-3 thermostat, opened lazily on the first request.
pub struct BleConnection {
    address: String,
    command_timeout: Duration,
    scan_timeout: Duration,
    link: Option<Link>,
}

impl BleConnection {
    pub fn new(address: &str, config: &BluetoothConfig) -> Self {
        Self {
            address: address.to_string(),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            scan_timeout: Duration::from_secs(config.scan_timeout_secs),
            link: None,
        }
    }

    async fn round_trip(&mut self, request: &[u8]) -> Result<Vec<u8>, DeviceError> {
        let Some(link) = self.link.as_mut() else {
            return Err(DeviceError::NotConnected(self.address.clone()));
        };

        link.peripheral
            .write(&link.write, request, WriteType::WithResponse)
            .await
            .map_err(|source| DeviceError::Backend {
                action: "write",
                source,
            })?;

        while let Some(notification) = link.notifications.next().await {
            if notification.uuid == NOTIFY_UUID {
                return Ok(notification.value);
            }
        }
        Err(DeviceError::StreamClosed)
    }
}

#[async_trait]
impl Connection for BleConnection {
    fn address(&self) -> &str {
        &self.address
    }

    async fn request(&mut self, request: &[u8]) -> Result<Vec<u8>, DeviceError> {
        // Link setup carries its own scan and connect limits; the command timeout
        // covers only the exchange.
        if self.link.is_none() {
            let link = connect(&self.address, self.scan_timeout, self.command_timeout).await?;
            self.link = Some(link);
        }
        let timeout = self.command_timeout;
        let result = tokio::time::timeout(timeout, self.round_trip(request))
            .await
            .unwrap_or_else(|_| {
                Err(DeviceError::Timeout {
                    address: self.address.clone(),
                    timeout,
                })
            });

        // A failed link is rebuilt from scratch on the next request.
        if result.is_err() {
            self.disconnect().await;
        }
        result
    }

    async fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            if let Err(err) = link.peripheral.disconnect().await {
                debug!("disconnect from {} failed: {err}", self.address);
            }
        }
    }
}

async fn connect(
    address: &str,
    scan_timeout: Duration,
    command_timeout: Duration,
) -> Result<Link, DeviceError> {
    let target = BDAddr::from_str(&address.trim().to_ascii_uppercase())
        .map_err(|_| DeviceError::InvalidAddress(address.to_string()))?;

    let manager = Manager::new().await.map_err(|source| DeviceError::Backend {
        action: "manager init",
        source,
    })?;
    let central = manager
        .adapters()
        .await
        .map_err(|source| DeviceError::Backend {
            action: "adapter lookup",
            source,
        })?
        .into_iter()
        .next()
        .ok_or(DeviceError::NoAdapter)?;

    let peripheral = find_peripheral(&central, target, address, scan_timeout).await?;
    debug!("connecting to thermostat {address}");
    let established = tokio::time::timeout(command_timeout, establish(&peripheral))
        .await
        .unwrap_or_else(|_| {
            Err(DeviceError::Timeout {
                address: address.to_string(),
                timeout: command_timeout,
            })
        });
    match established {
        Ok((write, notifications)) => {
            info!("connected to thermostat {address}");
            Ok(Link {
                peripheral,
                write,
                notifications,
            })
        }
        Err(err) => {
            if let Err(disconnect_err) = peripheral.disconnect().await {
                debug!("disconnect from {address} failed: {disconnect_err}");
            }
            Err(err)
        }
    }
}

async fn establish(
    peripheral: &Peripheral,
) -> Result<(Characteristic, Notifications), DeviceError> {
    peripheral
        .connect()
        .await
        .map_err(|source| DeviceError::Backend {
            action: "connect",
            source,
        })?;
    peripheral
        .discover_services()
        .await
        .map_err(|source| DeviceError::Backend {
            action: "service discovery",
            source,
        })?;

    let characteristics = peripheral.characteristics();
    let write = characteristics
        .iter()
        .find(|c| c.uuid == WRITE_UUID)
        .cloned()
        .ok_or(DeviceError::MissingCharacteristic(WRITE_UUID))?;
    let notify = characteristics
        .iter()
        .find(|c| c.uuid == NOTIFY_UUID)
        .cloned()
        .ok_or(DeviceError::MissingCharacteristic(NOTIFY_UUID))?;

    peripheral
        .subscribe(&notify)
        .await
        .map_err(|source| DeviceError::Backend {
            action: "subscribe",
            source,
        })?;
    let notifications =
        peripheral
            .notifications()
            .await
            .map_err(|source| DeviceError::Backend {
                action: "notification stream",
                source,
            })?;

    Ok((write, notifications))
}

async fn find_peripheral(
    central: &Adapter,
    target: BDAddr,
    address: &str,
    scan_timeout: Duration,
) -> Result<Peripheral, DeviceError> {
    central
        .start_scan(ScanFilter::default())
        .await
        .map_err(|source| DeviceError::Backend {
            action: "scan",
            source,
        })?;

    bounded_scan(
        scan_timeout,
        poll_for(central, target),
        async {
            if let Err(err) = central.stop_scan().await {
                warn!("failed to stop bluetooth scan: {err}");
            }
        },
        DeviceError::NotFound(address.to_string()),
    )
    .await
}

/// Runs `search` for at most `limit`, then `stop` whatever the outcome.
async fn bounded_scan<T>(
    limit: Duration,
    search: impl Future<Output = Result<T, DeviceError>>,
    stop: impl Future<Output = ()>,
    not_found: DeviceError,
) -> Result<T, DeviceError> {
    let found = tokio::time::timeout(limit, search)
        .await
        .unwrap_or(Err(not_found));
    stop.await;
    found
}

async fn poll_for(central: &Adapter, target: BDAddr) -> Result<Peripheral, DeviceError> {
    loop {
        let peripherals = central
            .peripherals()
            .await
            .map_err(|source| DeviceError::Backend {
                action: "scan",
                source,
            })?;
        if let Some(peripheral) = peripherals.into_iter().find(|p| p.address() == target) {
            return Ok(peripheral);
        }
        tokio::time::sleep(SCAN_POLL_INTERVAL).await;
    }
}
