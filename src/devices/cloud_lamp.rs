//! Lamp driven through the vendor cloud instead of BLE
//!
//! Power, brightness and downlight temperature only; scene names are not
//! available from the cloud, so the scene list is numbered.

use crate::devices::smart_lamp::PLACEHOLDER_SCENES;
use crate::domain::light::{LightChange, LightState, LightStateModel};
use crate::domain::models::{CapabilitySink, PairingDevice};
use crate::domain::scene::{Scene, SceneCatalog};
use crate::domain::settings::StatePolicy;
use crate::error::CloudError;
use crate::infrastructure::bluetooth::protocol::{self, SCENE_OFF};
use crate::infrastructure::cloud::{CloudClient, CloudCommand};
use std::sync::Arc;
use tracing::info;

/// The single request a cloud lamp sends for `change`
pub fn cloud_command(state: &LightState, change: &LightChange) -> CloudCommand {
    match change.onoff {
        Some(on) if change.field_count() == 1 => return CloudCommand::power(on),
        Some(false) => return CloudCommand::power(false),
        _ => {}
    }

    if change.is_dim_only() {
        return CloudCommand::Brightness {
            brightness: protocol::percent(change.dim.unwrap_or(state.dim)),
            relative: false,
        };
    }

    let target = state.merged(change);
    CloudCommand::Kelvin {
        kelvin: protocol::kelvin(target.temperature),
    }
}

/// Lists the lamps of the cloud account for pairing
pub struct CloudDriver {
    client: CloudClient,
}

impl CloudDriver {
    pub fn new(client: CloudClient) -> Self {
        Self { client }
    }

    pub async fn pair_list_devices(&self) -> Result<Vec<PairingDevice>, CloudError> {
        let lamps = self.client.list_lamps().await?;
        info!("Cloud account has {} lamps", lamps.len());
        Ok(lamps
            .into_iter()
            .map(|lamp| PairingDevice {
                name: lamp.name,
                id: lamp.id,
                api_version: lamp.api_version,
            })
            .collect())
    }

    pub fn lamp(&self, id: &str, sink: Arc<dyn CapabilitySink>) -> CloudLamp {
        CloudLamp::new(id, self.client.clone(), sink)
    }
}

pub struct CloudLamp {
    id: String,
    client: CloudClient,
    light: LightStateModel,
}

impl CloudLamp {
    pub fn new(id: &str, client: CloudClient, sink: Arc<dyn CapabilitySink>) -> Self {
        Self {
            id: id.to_string(),
            client,
            light: LightStateModel::new(sink, StatePolicy::Confirmed),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn init(&self) {
        self.light.publish_power();
    }

    pub async fn on_capability_change(&self, change: LightChange) -> Result<(), CloudError> {
        if change.is_empty() {
            return Ok(());
        }

        let state = self.light.snapshot();
        let command = cloud_command(&state, &change);
        // any light change turns the lamp on, ahead of the reply
        if !matches!(command, CloudCommand::Power { .. }) && !state.onoff {
            self.light.record(&LightChange::power(true));
        }

        self.client.send_command(&self.id, &command).await?;
        self.light.record(&change);
        Ok(())
    }

    pub async fn set_scene(&self, id: u8) -> Result<(), CloudError> {
        self.light.record(&LightChange::power(id != SCENE_OFF));
        self.client
            .send_command(&self.id, &CloudCommand::Scene { scene: id })
            .await
    }

    pub fn scenes(&self) -> Vec<Scene> {
        SceneCatalog::placeholder(PLACEHOLDER_SCENES).scenes().to_vec()
    }

    pub fn search_scenes(&self, query: &str) -> Vec<Scene> {
        SceneCatalog::placeholder(PLACEHOLDER_SCENES).search(query)
    }

    pub fn state(&self) -> LightState {
        self.light.snapshot()
    }
}
