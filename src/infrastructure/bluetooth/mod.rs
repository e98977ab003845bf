//! Bluetooth Module
//!
//! BLE link to Luke Roberts lamps.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      CommandQueue                        │
//! │  (FIFO of frames, acknowledgements, retry with backoff)  │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌────────────┐ ┌─────────────┐ ┌──────────┐
//! │  Session   │ │  Transport  │ │ Protocol │
//! │            │ │             │ │          │
//! │ - connect  │ │ - traits    │ │ - UUIDs  │
//! │ - idle     │ │ - btleplug  │ │ - frames │
//! │   timeout  │ │   adapter   │ │ - acks   │
//! └────────────┘ └─────────────┘ └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Frame encoders and notification parsing
//! - [`session`] - One connection per lamp with idle disconnect
//! - [`queue`] - Serialized command delivery and scene discovery
//! - [`transport`] - Traits the session and queue talk through
//! - `native` - btleplug implementation of the transport (feature `btleplug-transport`)

#[cfg(feature = "btleplug-transport")]
pub mod native;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod timer;
pub mod transport;

pub use queue::{CommandQueue, QueueConfig};
pub use session::{ConnectionSession, SessionConfig};
