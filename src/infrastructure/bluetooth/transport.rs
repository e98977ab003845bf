//! BLE Transport Seam
//!
//! The lamp link never talks to a Bluetooth stack directly. Scanning,
//! connecting and GATT access go through these traits so the session and
//! queue can run against btleplug or against a scripted peripheral in tests.

use crate::error::TransportError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type TransportResult<T> = Result<T, TransportError>;

/// Notification payloads for one subscribed characteristic
pub type Notifications = mpsc::UnboundedReceiver<Vec<u8>>;

/// Finds peripherals advertising a service
#[async_trait]
pub trait BleScanner: Send + Sync {
    async fn discover(&self, service: Uuid) -> TransportResult<Vec<Arc<dyn BleDevice>>>;
}

/// A known peripheral that can be connected to
#[async_trait]
pub trait BleDevice: Send + Sync {
    /// Stable identifier used by the driver registry
    fn id(&self) -> String;

    async fn connect(&self) -> TransportResult<Arc<dyn BlePeripheral>>;
}

/// A live link to a peripheral
#[async_trait]
pub trait BlePeripheral: Send + Sync {
    async fn is_connected(&self) -> bool;

    async fn discover_services_and_characteristics(&self) -> TransportResult<()>;

    /// `None` when the peripheral does not expose the service
    async fn service(&self, uuid: Uuid) -> TransportResult<Option<Arc<dyn BleService>>>;

    async fn disconnect(&self) -> TransportResult<()>;
}

/// GATT service access
#[async_trait]
pub trait BleService: Send + Sync {
    async fn write(&self, characteristic: Uuid, data: &[u8]) -> TransportResult<()>;

    /// Start notifications; payloads arrive on the returned channel until unsubscribed
    async fn subscribe(&self, characteristic: Uuid) -> TransportResult<Notifications>;

    async fn unsubscribe(&self, characteristic: Uuid) -> TransportResult<()>;
}
