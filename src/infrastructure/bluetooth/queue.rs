//! Command Queue
//!
//! FIFO of planned frames for one lamp. Frames are written one at a time;
//! each write waits for the lamp's acknowledgement (or a fixed pause) before
//! the next one goes out. Connection trouble schedules a retry with backoff,
//! and after too many consecutive failures the pending frames are dropped so
//! a dead lamp never blocks the host.

use crate::domain::light::{LightChange, LightStateModel, PlannedCommand};
use crate::domain::scene::{Scene, SceneCatalog};
use crate::domain::settings::AckMode;
use crate::error::LampError;
use crate::infrastructure::bluetooth::protocol::{self, Ack, Opcode, SCENE_LAST};
use crate::infrastructure::bluetooth::session::{Acquire, ConnectionSession, SessionEvent};
use crate::infrastructure::bluetooth::timer::{lock, Timer};
use crate::infrastructure::bluetooth::transport::{BleService, Notifications};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Configuration for the command queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Characteristic frames are written to and acknowledged on
    pub characteristic: Uuid,
    pub ack: AckMode,
    pub retry_backoff: Duration,
    /// Consecutive failures after which pending frames are discarded
    pub max_retries: u32,
}

#[derive(Default)]
struct Pending {
    commands: VecDeque<PlannedCommand>,
    /// Effect of the frame written but not yet acknowledged
    in_flight: Option<LightChange>,
    /// A drain loop owns the link
    busy: bool,
    retries: u32,
}

pub struct CommandQueue {
    session: Arc<ConnectionSession>,
    light: Arc<LightStateModel>,
    config: QueueConfig,
    pending: Mutex<Pending>,
    scenes: Mutex<SceneCatalog>,
    retry_timer: Timer,
    me: Weak<CommandQueue>,
}

impl CommandQueue {
    /// Create the queue and start listening for session re-drain signals
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        session: Arc<ConnectionSession>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        light: Arc<LightStateModel>,
        config: QueueConfig,
    ) -> Arc<Self> {
        let queue = Arc::new_cyclic(|me| Self {
            session,
            light,
            config,
            pending: Mutex::new(Pending::default()),
            scenes: Mutex::new(SceneCatalog::new()),
            retry_timer: Timer::new("retry"),
            me: me.clone(),
        });

        let weak = Arc::downgrade(&queue);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(queue) = weak.upgrade() else {
                    break;
                };
                match event {
                    SessionEvent::Settled => {
                        trace!("Session settled, draining");
                        if let Err(e) = queue.drain().await {
                            debug!("Drain after disconnect failed: {}", e);
                        }
                    }
                }
            }
        });

        queue
    }

    /// Append a command and start draining
    pub async fn submit(&self, command: PlannedCommand) -> Result<(), LampError> {
        self.submit_all([command]).await
    }

    /// Append several commands in order and start draining
    pub async fn submit_all(
        &self,
        commands: impl IntoIterator<Item = PlannedCommand>,
    ) -> Result<(), LampError> {
        {
            let mut pending = lock(&self.pending);
            for command in commands {
                debug!("Queued frame {}", command.frame);
                pending.commands.push_back(command);
            }
        }
        self.drain().await
    }

    /// Start a scene discovery run at `start`, replacing the catalog
    pub async fn discover_scenes(&self, start: u8) -> Result<(), LampError> {
        info!("Reading scenes from lamp {}", self.session.device_id());
        *lock(&self.scenes) = SceneCatalog::new();
        self.submit(PlannedCommand::bare(protocol::encode_scene_query(start)))
            .await
    }

    pub fn replace_scenes(&self, catalog: SceneCatalog) {
        *lock(&self.scenes) = catalog;
    }

    pub fn scenes(&self) -> SceneCatalog {
        lock(&self.scenes).clone()
    }

    /// Effects of every frame not yet confirmed, oldest first
    pub fn queued_effects(&self) -> Vec<LightChange> {
        let pending = lock(&self.pending);
        pending
            .in_flight
            .iter()
            .copied()
            .chain(pending.commands.iter().map(|command| command.effect))
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.pending).commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.pending).busy
    }

    /// Consecutive failed drain attempts
    pub fn retries(&self) -> u32 {
        lock(&self.pending).retries
    }

    /// Write queued frames until the queue is empty
    ///
    /// Returns at once when another drain owns the link. The error is the
    /// one that stopped this attempt; a retry may already be scheduled.
    pub async fn drain(&self) -> Result<(), LampError> {
        {
            let mut pending = lock(&self.pending);
            if pending.busy {
                trace!("Queue busy");
                return Ok(());
            }
            if pending.commands.is_empty() {
                return Ok(());
            }
            pending.busy = true;
        }

        let service = match self.session.acquire_service().await {
            Ok(Acquire::Ready(service)) => service,
            Ok(Acquire::Pending) => {
                lock(&self.pending).busy = false;
                self.retry_later("connection pending");
                return Ok(());
            }
            Err(e) => {
                lock(&self.pending).busy = false;
                if e.is_retryable() {
                    self.retry_later(&e.to_string());
                } else {
                    warn!("Not retrying: {}", e);
                }
                return Err(e);
            }
        };

        if let Err(e) = self.write_pending(&service).await {
            {
                let mut pending = lock(&self.pending);
                pending.busy = false;
                pending.in_flight = None;
            }
            warn!("Drain aborted: {}", e);
            self.retry_later(&e.to_string());
            self.session.disconnect().await;
            return Err(LampError::ConnectionFailed(e.to_string()));
        }
        Ok(())
    }

    async fn write_pending(&self, service: &Arc<dyn BleService>) -> Result<(), LampError> {
        loop {
            let command = {
                let mut pending = lock(&self.pending);
                let next = pending.commands.pop_front();
                pending.in_flight = next.as_ref().map(|command| command.effect);
                match next {
                    Some(command) => command,
                    None => {
                        pending.busy = false;
                        pending.retries = 0;
                        return Ok(());
                    }
                }
            };
            self.session.touch();
            self.execute(service, command).await?;
        }
    }

    /// Write one frame and wait for its acknowledgement
    ///
    /// A failed write is logged and skipped; only subscription trouble
    /// aborts the drain.
    async fn execute(
        &self,
        service: &Arc<dyn BleService>,
        command: PlannedCommand,
    ) -> Result<(), LampError> {
        let characteristic = self.config.characteristic;
        debug!("Writing frame {}", command.frame);

        match self.config.ack {
            AckMode::Notify { timeout_ms } => {
                let mut notifications = service.subscribe(characteristic).await?;
                let ack = match service.write(characteristic, command.frame.as_bytes()).await {
                    Ok(()) => {
                        let timeout = Duration::from_millis(timeout_ms);
                        Self::await_ack(&mut notifications, command.frame.opcode(), timeout).await
                    }
                    Err(e) => {
                        warn!("Frame {} dropped: {}", command.frame, LampError::WriteFailed(e));
                        None
                    }
                };
                if let Err(e) = service.unsubscribe(characteristic).await {
                    debug!("Unsubscribe failed: {}", e);
                }
                if let Some(ack) = ack {
                    self.handle_ack(&command, ack);
                }
            }
            AckMode::FixedDelay { delay_ms } => {
                match service.write(characteristic, command.frame.as_bytes()).await {
                    Ok(()) => self.light.confirm(&command),
                    Err(e) => warn!("Frame {} dropped: {}", command.frame, LampError::WriteFailed(e)),
                }
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
        Ok(())
    }

    /// First notification that parses as an acknowledgement for `opcode`
    async fn await_ack(
        notifications: &mut Notifications,
        opcode: Opcode,
        timeout: Duration,
    ) -> Option<Ack> {
        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, notifications.recv()).await {
                Ok(Some(data)) => match protocol::parse_notification(opcode, &data) {
                    Ok(ack) => return Some(ack),
                    Err(e) => trace!("Ignoring notification {:02X?}: {}", data, e),
                },
                Ok(None) => {
                    debug!("Notification channel closed");
                    return None;
                }
                Err(_) => {
                    debug!("No acknowledgement for {:?} within {:?}", opcode, timeout);
                    return None;
                }
            }
        }
    }

    fn handle_ack(&self, command: &PlannedCommand, ack: Ack) {
        match ack {
            Ack::SceneName { next_scene, name } => {
                let Some(id) = command.frame.scene_id() else {
                    return;
                };
                let follow_up = {
                    let mut scenes = lock(&self.scenes);
                    debug!("Scene {}: {}", id, name);
                    scenes.push(Scene::new(id, name));
                    // stop at the end marker, or when the lamp points back at a known scene
                    next_scene != SCENE_LAST && !scenes.contains(next_scene)
                };
                if follow_up {
                    lock(&self.pending)
                        .commands
                        .push_back(PlannedCommand::bare(protocol::encode_scene_query(next_scene)));
                } else {
                    info!("Found {} scenes", lock(&self.scenes).len());
                }
            }
            Ack::LightChanged => self.light.confirm(command),
        }
    }

    /// Count a failed attempt; retry after the backoff or give up
    fn retry_later(&self, reason: &str) {
        let discarded = {
            let mut pending = lock(&self.pending);
            pending.retries += 1;
            if pending.retries >= self.config.max_retries {
                pending.retries = 0;
                let dropped = pending.commands.len();
                pending.commands.clear();
                Some(dropped)
            } else {
                None
            }
        };

        match discarded {
            Some(dropped) => {
                self.retry_timer.cancel();
                warn!(
                    "Giving up after {} attempts ({}), discarded {} frames",
                    self.config.max_retries, reason, dropped
                );
            }
            None => {
                debug!("Retrying in {:?} ({})", self.config.retry_backoff, reason);
                let me = self.me.clone();
                self.retry_timer.arm(self.config.retry_backoff, move || async move {
                    if let Some(queue) = me.upgrade() {
                        if let Err(e) = queue.drain().await {
                            debug!("Retry failed: {}", e);
                        }
                    }
                });
            }
        }
    }
}
