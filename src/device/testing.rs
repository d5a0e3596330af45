//! In-memory bluetooth stack for tests.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use btleplug::api::{CharPropFlags, Characteristic, Service, ValueNotification, WriteType};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use crate::device::constants::{ADVERTISING_SERVICE, CONTROL_SERVICE, CONTROL_TX_CHARACTERISTIC, FEEDBACK_CHARACTERISTIC};
use crate::device::transport::{BlePeripheral, BleTransport, NotificationStream};
use crate::device::types::DeviceAddress;
use crate::error::DeviceError;

pub const ADDRESS: &str = "F4:12:FA:00:11:22";
pub const LOCAL_NAME: &str = "Rest 1122";

fn characteristic(service_uuid: Uuid, uuid: Uuid, properties: CharPropFlags) -> Characteristic {
    Characteristic {
        uuid,
        service_uuid,
        properties,
        descriptors: BTreeSet::new(),
    }
}

/// The services of a Rest, as far as we use them.
pub fn hatch_services() -> Vec<Service> {
    vec![
        Service {
            uuid: ADVERTISING_SERVICE,
            primary: true,
            characteristics: BTreeSet::from([
                characteristic(ADVERTISING_SERVICE, FEEDBACK_CHARACTERISTIC, CharPropFlags::READ | CharPropFlags::NOTIFY),
            ]),
        },
        Service {
            uuid: CONTROL_SERVICE,
            primary: true,
            characteristics: BTreeSet::from([
                // listed first so that a lookup ignoring the uuid would pick the wrong one
                characteristic(CONTROL_SERVICE, Uuid::from_u128(0x02240000_5efd_47eb_9c1a_de53f7a2b232), CharPropFlags::READ),
                characteristic(CONTROL_SERVICE, CONTROL_TX_CHARACTERISTIC, CharPropFlags::WRITE),
            ]),
        },
    ]
}

pub struct FakePeripheral {
    services: Vec<Service>,
    connect_delay: Duration,
    disconnect_delay: Duration,
    connected: AtomicBool,
    // set when a connect was sent, whether or not its caller is still waiting
    handshake: AtomicBool,
    listeners: Mutex<Vec<UnboundedSender<ValueNotification>>>,
    writes: Mutex<Vec<(Uuid, Vec<u8>, WriteType)>>,

    pub fail_connects: AtomicBool,
    pub fail_writes: AtomicBool,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub discoveries: AtomicUsize,
    pub subscriptions: AtomicUsize,
}

impl FakePeripheral {
    pub fn new() -> Self {
        FakePeripheral::build(hatch_services(), Duration::from_millis(50), Duration::ZERO)
    }

    pub fn with_connect_delay(connect_delay: Duration) -> Self {
        FakePeripheral::build(hatch_services(), connect_delay, Duration::ZERO)
    }

    pub fn with_disconnect_delay(disconnect_delay: Duration) -> Self {
        FakePeripheral::build(hatch_services(), Duration::from_millis(50), disconnect_delay)
    }

    pub fn with_services(services: Vec<Service>) -> Self {
        FakePeripheral::build(services, Duration::from_millis(50), Duration::ZERO)
    }

    fn build(services: Vec<Service>, connect_delay: Duration, disconnect_delay: Duration) -> Self {
        FakePeripheral {
            services,
            connect_delay,
            disconnect_delay,
            connected: AtomicBool::new(false),
            handshake: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            fail_connects: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            discoveries: AtomicUsize::new(0),
            subscriptions: AtomicUsize::new(0),
        }
    }

    /// Pushes a notification to every open notification stream.
    pub fn notify(&self, uuid: Uuid, value: Vec<u8>) {
        let notification = ValueNotification { uuid, value };
        self.listeners
            .lock()
            .unwrap()
            .retain(|listener| listener.unbounded_send(notification.clone()).is_ok());
    }

    /// The stack completes a connect that was sent earlier, even if nobody waits for it anymore.
    pub fn complete_handshake(&self) {
        if self.handshake.swap(false, Ordering::SeqCst) {
            self.connected.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_linked(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The link goes away without anybody being told.
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>, WriteType)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlePeripheral for FakePeripheral {
    fn id(&self) -> String {
        ADDRESS.to_string()
    }

    async fn local_name(&self) -> Result<Option<String>, DeviceError> {
        Ok(Some(LOCAL_NAME.to_string()))
    }

    async fn is_connected(&self) -> Result<bool, DeviceError> {
        Ok(self.connected.load(Ordering::SeqCst))
    }

    async fn connect(&self) -> Result<(), DeviceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.handshake.store(true, Ordering::SeqCst);
        sleep(self.connect_delay).await;

        if self.fail_connects.load(Ordering::SeqCst) {
            self.handshake.store(false, Ordering::SeqCst);
            return Err(DeviceError::Btle { source: btleplug::Error::DeviceNotFound });
        }

        self.complete_handshake();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        sleep(self.disconnect_delay).await;
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.handshake.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<Service>, DeviceError> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        Ok(self.services.clone())
    }

    async fn write(&self, characteristic: &Characteristic, data: &[u8], write_type: WriteType) -> Result<(), DeviceError> {
        if !self.connected.load(Ordering::SeqCst) || self.fail_writes.load(Ordering::SeqCst) {
            return Err(DeviceError::Btle { source: btleplug::Error::NotConnected });
        }

        self.writes.lock().unwrap().push((characteristic.uuid, data.to_vec(), write_type));
        Ok(())
    }

    async fn subscribe(&self, _characteristic: &Characteristic) -> Result<(), DeviceError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream, DeviceError> {
        let (tx, rx) = unbounded();
        self.listeners.lock().unwrap().push(tx);
        Ok(Box::pin(rx))
    }
}

pub struct FakeTransport {
    peripheral: Arc<FakePeripheral>,
    pub scans: AtomicUsize,
}

impl FakeTransport {
    pub fn new(peripheral: Arc<FakePeripheral>) -> Self {
        FakeTransport { peripheral, scans: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl BleTransport for FakeTransport {
    async fn wait_ready(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn find_peripheral(&self, address: &DeviceAddress) -> Result<Arc<dyn BlePeripheral>, DeviceError> {
        self.scans.fetch_add(1, Ordering::SeqCst);

        if !address.matches(ADDRESS) {
            // nothing with that address is in range
            return std::future::pending().await;
        }

        Ok(self.peripheral.clone())
    }
}
