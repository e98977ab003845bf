//! BLE lamp driver: discovery registry and pairing list

use crate::devices::smart_lamp::SmartLamp;
use crate::domain::models::{CapabilitySink, PairingDevice};
use crate::domain::settings::LampSettings;
use crate::error::LampError;
use crate::infrastructure::bluetooth::timer::lock;
use crate::infrastructure::bluetooth::transport::{BleDevice, BleScanner};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

pub const LAMP_NAME: &str = "Smart Lamp";

pub struct LampDriver {
    scanner: Arc<dyn BleScanner>,
    service_uuid: Uuid,
    devices: Mutex<HashMap<String, Arc<dyn BleDevice>>>,
    found: Notify,
}

impl LampDriver {
    pub fn new(scanner: Arc<dyn BleScanner>, service_uuid: Uuid) -> Self {
        Self {
            scanner,
            service_uuid,
            devices: Mutex::new(HashMap::new()),
            found: Notify::new(),
        }
    }

    /// Scan for lamps and add them to the registry; returns how many were seen
    ///
    /// Lamps from earlier scans stay registered: a connected lamp stops
    /// advertising.
    pub async fn discover(&self) -> Result<usize, LampError> {
        let found = self.scanner.discover(self.service_uuid).await?;
        let count = found.len();
        {
            let mut devices = lock(&self.devices);
            for device in found {
                let id = device.id();
                if !devices.contains_key(&id) {
                    debug!("Registered lamp {}", id);
                    devices.insert(id, device);
                }
            }
        }
        info!("Discovery found {} lamps", count);
        self.found.notify_waiters();
        Ok(count)
    }

    /// Scan and list every known lamp for pairing
    pub async fn pair_list_devices(&self) -> Result<Vec<PairingDevice>, LampError> {
        self.discover().await?;
        let mut ids: Vec<String> = lock(&self.devices).keys().cloned().collect();
        ids.sort();
        Ok(ids
            .into_iter()
            .map(|id| PairingDevice {
                name: LAMP_NAME.to_string(),
                id,
                api_version: None,
            })
            .collect())
    }

    pub fn get_lamp(&self, id: &str) -> Result<Arc<dyn BleDevice>, LampError> {
        lock(&self.devices)
            .get(id)
            .cloned()
            .ok_or_else(|| LampError::InvalidDevice(id.to_string()))
    }

    /// Resolve once a discovery run has registered `id`
    pub async fn wait_for_lamp(&self, id: &str) -> Arc<dyn BleDevice> {
        loop {
            let notified = self.found.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Ok(device) = self.get_lamp(id) {
                return device;
            }
            debug!("Waiting for lamp {} to be discovered", id);
            notified.await;
        }
    }

    /// Device init: build the lamp once discovery has seen it
    ///
    /// The host shows the device unavailable until then.
    pub async fn init_lamp(
        &self,
        id: &str,
        settings: &LampSettings,
        sink: Arc<dyn CapabilitySink>,
    ) -> Result<SmartLamp, LampError> {
        sink.set_available(false);
        let device = match self.get_lamp(id) {
            Ok(device) => device,
            Err(_) => {
                if let Err(e) = self.discover().await {
                    debug!("Discovery for {} failed: {}", id, e);
                }
                self.wait_for_lamp(id).await
            }
        };
        let lamp = SmartLamp::new(device, settings, sink)?;
        lamp.init().await;
        Ok(lamp)
    }
}
