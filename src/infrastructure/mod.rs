pub mod bluetooth;
pub mod cloud;
pub mod logging;
