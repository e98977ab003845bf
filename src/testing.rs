//! In-memory host and lamp doubles shared by the unit tests

use crate::domain::models::{Capability, CapabilitySink, CapabilityValue};
use crate::error::TransportError;
use crate::infrastructure::bluetooth::protocol::SERVICE_UUID;
use crate::infrastructure::bluetooth::timer::lock;
use crate::infrastructure::bluetooth::transport::{
    BleDevice, BlePeripheral, BleScanner, BleService, Notifications, TransportResult,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Capability store that keeps the last value of each capability
#[derive(Default)]
pub struct RecordingSink {
    values: Mutex<HashMap<Capability, CapabilityValue>>,
    available: Mutex<Option<bool>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sink that already holds values from a previous run
    pub fn with_values(values: &[(Capability, CapabilityValue)]) -> Arc<Self> {
        let sink = Self::default();
        lock(&sink.values).extend(values.iter().copied());
        Arc::new(sink)
    }

    pub fn value(&self, capability: Capability) -> Option<CapabilityValue> {
        lock(&self.values).get(&capability).copied()
    }

    pub fn available(&self) -> Option<bool> {
        *lock(&self.available)
    }
}

impl CapabilitySink for RecordingSink {
    fn capability_value(&self, capability: Capability) -> Option<CapabilityValue> {
        self.value(capability)
    }

    fn set_capability_value(&self, capability: Capability, value: CapabilityValue) {
        lock(&self.values).insert(capability, value);
    }

    fn set_available(&self, available: bool) {
        *lock(&self.available) = Some(available);
    }
}

type Responder = Box<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync>;
type WriteFilter = Box<dyn Fn(&[u8]) -> bool + Send + Sync>;

#[derive(Default)]
struct Script {
    connect_delay: Duration,
    failing_connects: usize,
    missing_service: bool,
    fail_subscribe: bool,
    fail_write: Option<WriteFilter>,
    responder: Option<Responder>,
}

#[derive(Default)]
struct LampInner {
    script: Mutex<Script>,
    connected: AtomicBool,
    writes: Mutex<Vec<Vec<u8>>>,
    subscriber: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
}

/// Scripted lamp peripheral
///
/// Every successful write is recorded and answered with the notifications
/// the responder returns for that frame.
#[derive(Clone)]
pub struct MockLamp {
    id: String,
    inner: Arc<LampInner>,
}

impl MockLamp {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            inner: Arc::new(LampInner::default()),
        }
    }

    /// Lamp that acknowledges every frame with a bare success status
    pub fn acking() -> Self {
        let lamp = Self::new("mock-lamp");
        lamp.set_responder(|_| vec![vec![0x00]]);
        lamp
    }

    pub fn device(&self) -> Arc<dyn BleDevice> {
        Arc::new(self.clone())
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        lock(&self.inner.script).responder = Some(Box::new(responder));
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        lock(&self.inner.script).connect_delay = delay;
    }

    /// Refuse the next `count` connection attempts
    pub fn fail_connects(&self, count: usize) {
        lock(&self.inner.script).failing_connects = count;
    }

    pub fn set_missing_service(&self, missing: bool) {
        lock(&self.inner.script).missing_service = missing;
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        lock(&self.inner.script).fail_subscribe = fail;
    }

    pub fn fail_writes_matching<F>(&self, filter: F)
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        lock(&self.inner.script).fail_write = Some(Box::new(filter));
    }

    /// The lamp closes the link on its own
    pub fn drop_link(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        lock(&self.inner.subscriber).take();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.inner.writes).clone()
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.inner.disconnects.load(Ordering::SeqCst)
    }

    pub fn subscribe_count(&self) -> usize {
        self.inner.subscribes.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.inner.unsubscribes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BleDevice for MockLamp {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn connect(&self) -> TransportResult<Arc<dyn BlePeripheral>> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        let delay = lock(&self.inner.script).connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        {
            let mut script = lock(&self.inner.script);
            if script.failing_connects > 0 {
                script.failing_connects -= 1;
                return Err(TransportError::Ble("connection refused".to_string()));
            }
        }

        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(Arc::new(MockLink {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MockLink {
    inner: Arc<LampInner>,
}

#[async_trait]
impl BlePeripheral for MockLink {
    async fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn discover_services_and_characteristics(&self) -> TransportResult<()> {
        Ok(())
    }

    async fn service(&self, uuid: Uuid) -> TransportResult<Option<Arc<dyn BleService>>> {
        if uuid != SERVICE_UUID || lock(&self.inner.script).missing_service {
            return Ok(None);
        }
        Ok(Some(Arc::new(MockLink {
            inner: Arc::clone(&self.inner),
        })))
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.inner.disconnects.fetch_add(1, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);
        lock(&self.inner.subscriber).take();
        Ok(())
    }
}

#[async_trait]
impl BleService for MockLink {
    async fn write(&self, _characteristic: Uuid, data: &[u8]) -> TransportResult<()> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        let replies = {
            let script = lock(&self.inner.script);
            if script.fail_write.as_ref().is_some_and(|fail| fail(data)) {
                return Err(TransportError::Ble("write rejected".to_string()));
            }
            script
                .responder
                .as_ref()
                .map(|respond| respond(data))
                .unwrap_or_default()
        };

        lock(&self.inner.writes).push(data.to_vec());
        if let Some(subscriber) = lock(&self.inner.subscriber).as_ref() {
            for reply in replies {
                let _ = subscriber.send(reply);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, _characteristic: Uuid) -> TransportResult<Notifications> {
        if lock(&self.inner.script).fail_subscribe {
            return Err(TransportError::Ble("subscribe rejected".to_string()));
        }
        self.inner.subscribes.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::unbounded_channel();
        *lock(&self.inner.subscriber) = Some(sender);
        Ok(receiver)
    }

    async fn unsubscribe(&self, _characteristic: Uuid) -> TransportResult<()> {
        self.inner.unsubscribes.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.subscriber).take();
        Ok(())
    }
}

/// Scanner that "finds" a fixed set of lamps
#[derive(Default)]
pub struct MockScanner {
    lamps: Mutex<Vec<MockLamp>>,
    scans: AtomicUsize,
}

impl MockScanner {
    pub fn new(lamps: Vec<MockLamp>) -> Arc<Self> {
        Arc::new(Self {
            lamps: Mutex::new(lamps),
            scans: AtomicUsize::new(0),
        })
    }

    pub fn set_lamps(&self, lamps: Vec<MockLamp>) {
        *lock(&self.lamps) = lamps;
    }

    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BleScanner for MockScanner {
    async fn discover(&self, service: Uuid) -> TransportResult<Vec<Arc<dyn BleDevice>>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if service != SERVICE_UUID {
            return Ok(Vec::new());
        }
        Ok(lock(&self.lamps).iter().map(MockLamp::device).collect())
    }
}
