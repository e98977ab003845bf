//! BLE Connection Session
//!
//! Owns the single link to one lamp. The lamp closes idle links on its own,
//! so the session closes first: every acquire and every frame write re-arms
//! an idle timer, and when it expires the link is dropped. The next command
//! simply reconnects.
//!
//! ```text
//! Disconnected ──acquire──▶ Connecting ──service found──▶ Connected
//!      ▲                        │                             │
//!      └──── failure / idle ────┴──────── disconnect ─────────┘
//! ```

use crate::domain::models::ConnectionStatus;
use crate::error::LampError;
use crate::infrastructure::bluetooth::timer::{lock, Timer};
use crate::infrastructure::bluetooth::transport::{BleDevice, BlePeripheral, BleService};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration for session behavior
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Service UUID to look for after discovery
    pub service_uuid: Uuid,
    /// Inactivity after which the link is closed
    pub idle_timeout: Duration,
    /// Pause between a disconnect and the queue re-drain signal
    pub settle_delay: Duration,
}

/// Result of asking the session for the lamp service
pub enum Acquire {
    Ready(Arc<dyn BleService>),
    /// Another caller is connecting right now; try again later
    Pending,
}

/// Signals from the session to its command queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A disconnect settled; queued frames may be drained again
    Settled,
}

#[derive(Clone)]
struct Link {
    peripheral: Arc<dyn BlePeripheral>,
    service: Arc<dyn BleService>,
}

enum LinkState {
    Disconnected,
    Connecting,
    Connected(Link),
}

struct State {
    link: LinkState,
    /// Bumped on every transition out of Connecting/Connected
    generation: u64,
}

enum Step {
    Reuse(Link, u64),
    Pending,
    Connect(u64),
}

pub struct ConnectionSession {
    device: Arc<dyn BleDevice>,
    config: SessionConfig,
    state: Mutex<State>,
    idle_timer: Timer,
    events: mpsc::UnboundedSender<SessionEvent>,
    me: Weak<ConnectionSession>,
}

impl ConnectionSession {
    /// Create a session; the receiver gets the re-drain signals
    pub fn new(
        device: Arc<dyn BleDevice>,
        config: SessionConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let session = Arc::new_cyclic(|me| Self {
            device,
            config,
            state: Mutex::new(State {
                link: LinkState::Disconnected,
                generation: 0,
            }),
            idle_timer: Timer::new("idle"),
            events,
            me: me.clone(),
        });
        (session, receiver)
    }

    pub fn device_id(&self) -> String {
        self.device.id()
    }

    pub fn status(&self) -> ConnectionStatus {
        match lock(&self.state).link {
            LinkState::Disconnected => ConnectionStatus::Disconnected,
            LinkState::Connecting => ConnectionStatus::Connecting,
            LinkState::Connected(_) => ConnectionStatus::Connected,
        }
    }

    /// When the idle timer will close the link, if armed
    pub fn idle_deadline(&self) -> Option<Instant> {
        self.idle_timer.deadline()
    }

    /// Get the lamp service, connecting if needed
    pub async fn acquire_service(&self) -> Result<Acquire, LampError> {
        loop {
            let step = {
                let mut state = lock(&self.state);
                match &state.link {
                    LinkState::Connected(link) => Step::Reuse(link.clone(), state.generation),
                    LinkState::Connecting => Step::Pending,
                    LinkState::Disconnected => {
                        state.link = LinkState::Connecting;
                        state.generation += 1;
                        Step::Connect(state.generation)
                    }
                }
            };

            match step {
                Step::Reuse(link, generation) => {
                    if link.peripheral.is_connected().await {
                        debug!("Already connected");
                        self.touch();
                        return Ok(Acquire::Ready(link.service));
                    }
                    warn!("Link dropped by the lamp, reconnecting");
                    self.mark_lost(generation);
                }
                Step::Pending => {
                    debug!("Connection already started");
                    self.touch();
                    return Ok(Acquire::Pending);
                }
                Step::Connect(generation) => return self.connect(generation).await,
            }
        }
    }

    async fn connect(&self, generation: u64) -> Result<Acquire, LampError> {
        info!("Connecting to lamp {}", self.device.id());
        self.touch();

        let link = match self.open_link().await {
            Ok(link) => link,
            Err(e) => {
                warn!("Connection to {} failed: {}", self.device.id(), e);
                let current = {
                    let mut state = lock(&self.state);
                    let current = state.generation == generation;
                    if current {
                        state.link = LinkState::Disconnected;
                        state.generation += 1;
                    }
                    current
                };
                if current {
                    self.idle_timer.cancel();
                }
                return Err(e);
            }
        };

        let service = Arc::clone(&link.service);
        let superseded = {
            let mut state = lock(&self.state);
            if state.generation == generation && matches!(state.link, LinkState::Connecting) {
                state.link = LinkState::Connected(link);
                None
            } else {
                Some(link)
            }
        };

        if let Some(link) = superseded {
            warn!("Session was closed while connecting, dropping the new link");
            if let Err(e) = link.peripheral.disconnect().await {
                debug!("Disconnect of superseded link failed: {}", e);
            }
            return Err(LampError::ConnectionFailed(
                "disconnected while connecting".to_string(),
            ));
        }

        info!("Connected to lamp {}", self.device.id());
        Ok(Acquire::Ready(service))
    }

    /// Connect, discover and locate the lamp service
    async fn open_link(&self) -> Result<Link, LampError> {
        let peripheral = self.device.connect().await?;

        let lookup = match peripheral.discover_services_and_characteristics().await {
            Ok(()) => peripheral.service(self.config.service_uuid).await,
            Err(e) => Err(e),
        };

        match lookup {
            Ok(Some(service)) => Ok(Link {
                peripheral,
                service,
            }),
            Ok(None) => {
                warn!("Lamp service {} missing", self.config.service_uuid);
                let _ = peripheral.disconnect().await;
                Err(LampError::ServiceMissing)
            }
            Err(e) => {
                let _ = peripheral.disconnect().await;
                Err(e.into())
            }
        }
    }

    fn mark_lost(&self, generation: u64) {
        let mut state = lock(&self.state);
        if state.generation == generation {
            state.link = LinkState::Disconnected;
            state.generation += 1;
        }
    }

    /// Restart the idle timer
    pub fn touch(&self) {
        let me = self.me.clone();
        self.idle_timer.arm(self.config.idle_timeout, move || async move {
            if let Some(session) = me.upgrade() {
                debug!("Idle timeout, closing link");
                session.disconnect().await;
            }
        });
    }

    /// Close the link (if any) and signal the queue once things settled
    ///
    /// Safe to call in any state and more than once.
    pub async fn disconnect(&self) {
        self.idle_timer.cancel();

        let previous = {
            let mut state = lock(&self.state);
            state.generation += 1;
            std::mem::replace(&mut state.link, LinkState::Disconnected)
        };

        if let LinkState::Connected(link) = previous {
            if link.peripheral.is_connected().await {
                debug!("Disconnecting peripheral");
                if let Err(e) = link.peripheral.disconnect().await {
                    debug!("Disconnect failed: {}", e);
                }
            }
            info!("Disconnected from lamp {}", self.device.id());
        }

        let events = self.events.clone();
        let settle_delay = self.config.settle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(settle_delay).await;
            let _ = events.send(SessionEvent::Settled);
        });
    }
}
