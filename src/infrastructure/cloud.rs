//! Lamp Cloud REST Client
//!
//! Alternative path to the lamp through the vendor cloud. One request per
//! command, bearer token auth, no retry.

use crate::domain::settings::CloudSettings;
use crate::error::CloudError;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

/// Request body of `PUT /lamps/{id}/command`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CloudCommand {
    Power { power: PowerState },
    Brightness { brightness: u8, relative: bool },
    Kelvin { kelvin: u16 },
    Scene { scene: u8 },
}

impl CloudCommand {
    pub fn power(on: bool) -> Self {
        Self::Power {
            power: if on { PowerState::On } else { PowerState::Off },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerState {
    On,
    Off,
}

/// One lamp registered with the cloud account
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CloudLampInfo {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub api_version: Option<u32>,
}

/// Lamp ids come back as numbers from some API versions
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl CloudClient {
    pub fn new(settings: &CloudSettings) -> Result<Self, CloudError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            token: settings.api_token.clone(),
        })
    }

    /// `GET /lamps`
    pub async fn list_lamps(&self) -> Result<Vec<CloudLampInfo>, CloudError> {
        let url = format!("{}/lamps", self.base_url);
        debug!("GET {}", url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::InvalidResponse(format!(
                "lamp list returned {status}"
            )));
        }
        Ok(response.json().await?)
    }

    /// `PUT /lamps/{id}/command`; only 204 counts as success
    pub async fn send_command(&self, lamp_id: &str, command: &CloudCommand) -> Result<(), CloudError> {
        let url = format!("{}/lamps/{}/command", self.base_url, lamp_id);
        debug!("PUT {} {:?}", url, command);
        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/json")
            .json(command)
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(()),
            status => Err(CloudError::InvalidResponse(format!(
                "command returned {status}"
            ))),
        }
    }
}
