use crate::domain::light::LightMode;
use serde::{Deserialize, Serialize};

/// Host capabilities mirrored by a lamp device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Onoff,
    Dim,
    LightHue,
    LightSaturation,
    LightMode,
    LightTemperature,
    MeasurePower,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Bool(bool),
    Number(f64),
    Mode(LightMode),
}

impl CapabilityValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_mode(&self) -> Option<LightMode> {
        match self {
            Self::Mode(mode) => Some(*mode),
            _ => None,
        }
    }
}

/// The host's capability store for one device
///
/// Lamps read their last known values from here at startup and push every
/// state change back.
pub trait CapabilitySink: Send + Sync {
    fn capability_value(&self, capability: Capability) -> Option<CapabilityValue>;

    fn set_capability_value(&self, capability: Capability, value: CapabilityValue);

    /// Whether the device can take commands
    fn set_available(&self, _available: bool) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// One entry of the pairing list offered to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingDevice {
    pub name: String,
    pub id: String,
    /// Cloud API version, only for cloud lamps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<u32>,
}
