//! Host-facing lamp devices and their drivers

pub mod cloud_lamp;
pub mod driver;
pub mod smart_lamp;

pub use cloud_lamp::{CloudDriver, CloudLamp};
pub use driver::LampDriver;
pub use smart_lamp::SmartLamp;
