//! One BLE lamp as the host sees it: capability changes in, frames out.

use crate::domain::light::{LightChange, LightState, LightStateModel};
use crate::domain::models::{CapabilitySink, ConnectionStatus};
use crate::domain::scene::{Scene, SceneCatalog};
use crate::domain::settings::{AckMode, LampSettings};
use crate::error::LampError;
use crate::infrastructure::bluetooth::protocol::{self, SCENE_OFF};
use crate::infrastructure::bluetooth::transport::BleDevice;
use crate::infrastructure::bluetooth::{CommandQueue, ConnectionSession, QueueConfig, SessionConfig};
use std::sync::Arc;
use tracing::{info, warn};

/// Scene count offered when names cannot be read from the lamp
pub const PLACEHOLDER_SCENES: u8 = 31;

pub struct SmartLamp {
    id: String,
    session: Arc<ConnectionSession>,
    queue: Arc<CommandQueue>,
    light: Arc<LightStateModel>,
    sink: Arc<dyn CapabilitySink>,
    ack: AckMode,
}

impl SmartLamp {
    /// Wire session, queue and light state for `device`
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        device: Arc<dyn BleDevice>,
        settings: &LampSettings,
        sink: Arc<dyn CapabilitySink>,
    ) -> Result<Self, LampError> {
        let service_uuid = protocol::parse_uuid(&settings.service_uuid)
            .map_err(|e| LampError::InvalidConfig(format!("service uuid: {e}")))?;
        let characteristic = protocol::parse_uuid(&settings.command_char_uuid)
            .map_err(|e| LampError::InvalidConfig(format!("command characteristic uuid: {e}")))?;
        // the idle timer would close the link while a frame is still waiting
        if settings.ack.frame_wait() >= settings.idle_timeout() {
            return Err(LampError::InvalidConfig(format!(
                "acknowledgement wait {:?} must be shorter than the idle timeout {:?}",
                settings.ack.frame_wait(),
                settings.idle_timeout()
            )));
        }

        let id = device.id();
        let (session, events) = ConnectionSession::new(
            device,
            SessionConfig {
                service_uuid,
                idle_timeout: settings.idle_timeout(),
                settle_delay: settings.settle_delay(),
            },
        );
        let light = Arc::new(LightStateModel::new(sink.clone(), settings.state_policy));
        let queue = CommandQueue::new(
            session.clone(),
            events,
            light.clone(),
            QueueConfig {
                characteristic,
                ack: settings.ack,
                retry_backoff: settings.retry_backoff(),
                max_retries: settings.max_retries,
            },
        );

        Ok(Self {
            id,
            session,
            queue,
            light,
            sink,
            ack: settings.ack,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Mark the lamp available, publish power and read its scenes
    pub async fn init(&self) {
        info!("Smart lamp {} initialized", self.id);
        self.sink.set_available(true);
        self.light.publish_power();
        if let Err(e) = self.refresh_scenes().await {
            warn!("Reading scenes from {} failed: {}", self.id, e);
        }
    }

    /// Turn a host capability change into frames and queue them
    pub async fn on_capability_change(&self, change: LightChange) -> Result<(), LampError> {
        let planned = self
            .light
            .apply_change(&change, &self.queue.queued_effects())?;
        if planned.is_empty() {
            return Ok(());
        }
        self.queue.submit_all(planned).await
    }

    pub async fn set_scene(&self, id: u8) -> Result<(), LampError> {
        let command = self.light.apply_scene(id);
        self.queue.submit(command).await
    }

    pub async fn turn_off(&self) -> Result<(), LampError> {
        self.set_scene(SCENE_OFF).await
    }

    /// Rebuild the scene catalog
    ///
    /// Names come from the lamp when acknowledgements are enabled; with
    /// fixed-delay delivery no replies arrive and a numbered list is used.
    pub async fn refresh_scenes(&self) -> Result<(), LampError> {
        match self.ack {
            AckMode::Notify { .. } => self.queue.discover_scenes(SCENE_OFF).await,
            AckMode::FixedDelay { .. } => {
                self.queue
                    .replace_scenes(SceneCatalog::placeholder(PLACEHOLDER_SCENES));
                Ok(())
            }
        }
    }

    pub fn scenes(&self) -> Vec<Scene> {
        self.queue.scenes().scenes().to_vec()
    }

    /// Scene autocomplete: case-insensitive substring of the name
    pub fn search_scenes(&self, query: &str) -> Vec<Scene> {
        self.queue.scenes().search(query)
    }

    pub fn state(&self) -> LightState {
        self.light.snapshot()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.session.status()
    }

    /// Frames still waiting for delivery
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    /// Close the link; queued frames stay queued
    pub async fn shutdown(&self) {
        self.session.disconnect().await;
        self.sink.set_available(false);
    }
}
