//! Driver for Luke Roberts smart lamps over BLE, with the vendor cloud as an
//! alternative path.

pub mod devices;
pub mod domain;
pub mod error;
pub mod infrastructure;

#[cfg(test)]
pub(crate) mod testing;

pub use devices::{CloudDriver, CloudLamp, LampDriver, SmartLamp};
pub use domain::light::{LightChange, LightMode, LightState};
pub use domain::models::{Capability, CapabilitySink, CapabilityValue, ConnectionStatus};
pub use error::{CloudError, LampError};
