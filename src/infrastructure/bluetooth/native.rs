//! btleplug Transport
//!
//! Adapts the platform Bluetooth stack (BlueZ, CoreBluetooth, WinRT) to the
//! transport traits. Notifications from btleplug arrive on one stream per
//! peripheral; a forwarding task filters them by characteristic.

use crate::error::TransportError;
use crate::infrastructure::bluetooth::timer::lock;
use crate::infrastructure::bluetooth::transport::{
    BleDevice, BlePeripheral, BleScanner, BleService, Notifications, TransportResult,
};
use async_trait::async_trait;
use btleplug::api::{
    CharPropFlags, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Scanner on the first Bluetooth adapter of the host
pub struct NativeScanner {
    adapter: Adapter,
    scan_time: Duration,
}

impl NativeScanner {
    pub async fn new(scan_time: Duration) -> TransportResult<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Ble("no Bluetooth adapter found".to_string()))?;
        debug!("Using Bluetooth adapter");
        Ok(Self { adapter, scan_time })
    }
}

#[async_trait]
impl BleScanner for NativeScanner {
    async fn discover(&self, service: Uuid) -> TransportResult<Vec<Arc<dyn BleDevice>>> {
        info!("Scanning {:?} for service {}", self.scan_time, service);
        self.adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await?;
        tokio::time::sleep(self.scan_time).await;
        let peripherals = self.adapter.peripherals().await?;
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Stopping scan failed: {}", e);
        }

        let mut found: Vec<Arc<dyn BleDevice>> = Vec::new();
        for peripheral in peripherals {
            let advertises = matches!(
                peripheral.properties().await,
                Ok(Some(props)) if props.services.contains(&service)
            );
            if advertises {
                debug!("Found lamp {}", peripheral.id());
                found.push(Arc::new(NativeDevice { peripheral }));
            }
        }
        Ok(found)
    }
}

struct NativeDevice {
    peripheral: Peripheral,
}

#[async_trait]
impl BleDevice for NativeDevice {
    fn id(&self) -> String {
        self.peripheral.id().to_string()
    }

    async fn connect(&self) -> TransportResult<Arc<dyn BlePeripheral>> {
        if !self.peripheral.is_connected().await? {
            self.peripheral.connect().await?;
        }
        Ok(Arc::new(NativeLink {
            peripheral: self.peripheral.clone(),
        }))
    }
}

struct NativeLink {
    peripheral: Peripheral,
}

#[async_trait]
impl BlePeripheral for NativeLink {
    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn discover_services_and_characteristics(&self) -> TransportResult<()> {
        debug!("Discovering services...");
        self.peripheral.discover_services().await?;
        Ok(())
    }

    async fn service(&self, uuid: Uuid) -> TransportResult<Option<Arc<dyn BleService>>> {
        let present = self.peripheral.services().iter().any(|s| s.uuid == uuid);
        if !present {
            return Ok(None);
        }
        Ok(Some(Arc::new(NativeService {
            peripheral: self.peripheral.clone(),
            service: uuid,
            forwarder: Mutex::new(None),
        })))
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

struct NativeService {
    peripheral: Peripheral,
    service: Uuid,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl NativeService {
    fn characteristic(&self, uuid: Uuid) -> TransportResult<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid && c.service_uuid == self.service)
            .ok_or_else(|| TransportError::CharacteristicNotFound(uuid.to_string()))
    }

    fn stop_forwarding(&self) {
        if let Some(handle) = lock(&self.forwarder).take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl BleService for NativeService {
    async fn write(&self, characteristic: Uuid, data: &[u8]) -> TransportResult<()> {
        let characteristic = self.characteristic(characteristic)?;
        // prefer WriteWithResponse when supported
        let write_type = if characteristic.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        self.peripheral.write(&characteristic, data, write_type).await?;
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> TransportResult<Notifications> {
        let target = self.characteristic(characteristic)?;
        let mut stream = self.peripheral.notifications().await?;
        self.peripheral.subscribe(&target).await?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid == characteristic && sender.send(notification.value).is_err() {
                    break;
                }
            }
        });
        if let Some(previous) = lock(&self.forwarder).replace(handle) {
            previous.abort();
        }
        Ok(receiver)
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> TransportResult<()> {
        self.stop_forwarding();
        let target = self.characteristic(characteristic)?;
        self.peripheral.unsubscribe(&target).await?;
        Ok(())
    }
}

impl Drop for NativeService {
    fn drop(&mut self) {
        self.stop_forwarding();
    }
}
