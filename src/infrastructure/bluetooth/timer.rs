//! Cancellable one-shot timer backed by a tokio task.
//!
//! Re-arming cancels the pending shot. Once the delay elapses the timer
//! disarms itself before running the callback, so a later `cancel` or `arm`
//! never aborts a callback that is already running.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

struct Armed {
    token: u64,
    deadline: Instant,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    armed: Option<Armed>,
    next_token: u64,
}

pub struct Timer {
    name: &'static str,
    slot: Arc<Mutex<Slot>>,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    /// Schedule `on_fire` after `delay`, replacing any pending shot
    pub fn arm<F, Fut>(&self, delay: Duration, on_fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = lock(&self.slot);
        if let Some(previous) = slot.armed.take() {
            previous.handle.abort();
        }

        slot.next_token += 1;
        let token = slot.next_token;
        let deadline = Instant::now() + delay;
        let shared = Arc::clone(&self.slot);
        let name = self.name;

        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut slot = lock(&shared);
                match &slot.armed {
                    Some(armed) if armed.token == token => slot.armed = None,
                    _ => return,
                }
            }
            trace!(timer = name, "fired");
            on_fire().await;
        });

        slot.armed = Some(Armed {
            token,
            deadline,
            handle,
        });
    }

    pub fn cancel(&self) {
        if let Some(armed) = lock(&self.slot).armed.take() {
            trace!(timer = self.name, "cancelled");
            armed.handle.abort();
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        lock(&self.slot).armed.as_ref().map(|armed| armed.deadline)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
