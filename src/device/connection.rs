use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use btleplug::api::{Characteristic, Service, ValueNotification};
use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::spawn;
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::codec::decode;
use crate::device::constants::{ADVERTISING_SERVICE, CONNECT_DEADLINE, FEEDBACK_CHARACTERISTIC, WATCHDOG_SILENCE};
use crate::device::status::StatusStream;
use crate::device::transport::{BlePeripheral, BleTransport, NotificationStream};
use crate::device::types::{ConnectionState, DeviceAddress};
use crate::device::watchdog::spawn_watchdog;
use crate::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Upper bound for the connect handshake and for service discovery.
    pub connect_timeout: Duration,
    /// How long the device may stay silent before reconnecting.
    pub silence_window: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            connect_timeout: Duration::from_millis(CONNECT_DEADLINE),
            silence_window: Duration::from_millis(WATCHDOG_SILENCE),
        }
    }
}

/// Runs `fut` unless `session` gets cancelled first, optionally bounded by `deadline`.
async fn guarded<T, F>(
    session: &CancellationToken,
    what: &'static str,
    deadline: Option<Duration>,
    fut: F,
) -> Result<T, DeviceError>
where
    F: Future<Output = Result<T, DeviceError>>,
{
    let bounded = async move {
        match deadline {
            Some(deadline) => timeout(deadline, fut).await.map_err(|_| DeviceError::Timeout(what))?,
            None => fut.await,
        }
    };

    tokio::select! {
        biased;

        _ = session.cancelled() => Err(DeviceError::Cancelled),
        result = bounded => result,
    }
}

/// Looks up a characteristic by exact service and characteristic UUID.
pub fn find_characteristic(
    services: &[Service],
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
) -> Result<Characteristic, DeviceError> {
    let service = services
        .iter()
        .find(|service| service.uuid == service_uuid)
        .ok_or(DeviceError::MissingService(service_uuid))?;

    service
        .characteristics
        .iter()
        .find(|characteristic| characteristic.uuid == characteristic_uuid)
        .cloned()
        .ok_or(DeviceError::MissingCharacteristic(characteristic_uuid))
}

fn read_notifications_task(
    cancel: CancellationToken,
    name: String,
    mut notifications: NotificationStream,
    status: Arc<StatusStream>,
) -> JoinHandle<()> {
    spawn(async move {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                notification = notifications.next() => match notification {
                    Some(ValueNotification { uuid, value }) if uuid == FEEDBACK_CHARACTERISTIC => {
                        match decode(&value) {
                            Ok(decoded) => status.publish(decoded),
                            Err(err) => warn!("Dropping feedback from {}: {}", name, err),
                        }
                    },
                    Some(_) => {},
                    None => {
                        debug!("Notification stream of {} ended", name);
                        break 'mainloop;
                    },
                },
            }
        }
    })
}

/// Owns the link to one peripheral.
///
/// Locating the peripheral and discovering its services happen once and are shared by every
/// caller; discovery is forgotten on [`ConnectionManager::reconnect`]. Liveness is inferred from
/// the feedback notifications, see [`spawn_watchdog`].
pub struct ConnectionManager {
    name: String,
    address: DeviceAddress,
    transport: Arc<dyn BleTransport>,
    status: Arc<StatusStream>,
    options: ConnectionOptions,
    this: Weak<ConnectionManager>,

    peripheral: OnceCell<Arc<dyn BlePeripheral>>,
    services: Mutex<Arc<OnceCell<Vec<Service>>>>,
    connect_lock: tokio::sync::Mutex<()>,
    // cancelled by disconnect(), replaced by a fresh token right away
    session: Mutex<CancellationToken>,
    // child of `session`, owns the notification reader and watchdog of the current link
    link: Mutex<Option<CancellationToken>>,
    // a handshake was sent to the stack and may still complete after being abandoned
    handshake_pending: AtomicBool,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(
        name: String,
        address: DeviceAddress,
        transport: Arc<dyn BleTransport>,
        status: Arc<StatusStream>,
        options: ConnectionOptions,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Arc::new_cyclic(|this| ConnectionManager {
            name,
            address,
            transport,
            status,
            options,
            this: this.clone(),
            peripheral: OnceCell::new(),
            services: Mutex::new(Arc::new(OnceCell::new())),
            connect_lock: tokio::sync::Mutex::new(()),
            session: Mutex::new(CancellationToken::new()),
            link: Mutex::new(None),
            handshake_pending: AtomicBool::new(false),
            state,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("{}: {:?} -> {:?}", self.name, previous, state);
        }
    }

    fn session(&self) -> CancellationToken {
        self.session.lock().expect("Failed to lock ConnectionManager session").clone()
    }

    fn reset_discovery(&self) {
        *self.services.lock().expect("Failed to lock ConnectionManager services") = Arc::new(OnceCell::new());
    }

    /// Resolves the peripheral with our address. Only the first successful scan is performed.
    pub async fn locate(&self) -> Result<Arc<dyn BlePeripheral>, DeviceError> {
        let peripheral = self.peripheral.get_or_try_init(|| async {
            self.transport.wait_ready().await?;
            info!("Scanning for {}", self.name);
            self.transport.find_peripheral(&self.address).await
        }).await?;

        Ok(peripheral.clone())
    }

    /// Connects if needed. Concurrent callers wait for the same attempt.
    pub async fn connect(&self) -> Result<Arc<dyn BlePeripheral>, DeviceError> {
        let session = self.session();
        self.connect_in(&session).await
    }

    async fn connect_in(&self, session: &CancellationToken) -> Result<Arc<dyn BlePeripheral>, DeviceError> {
        let _guard = tokio::select! {
            biased;

            _ = session.cancelled() => return Err(DeviceError::Cancelled),
            guard = self.connect_lock.lock() => guard,
        };

        let result = self.connect_locked(session).await;
        if let Err(err) = &result {
            warn!("Connecting to {} failed: {}", self.name, err);
            // a disconnect() that cancelled us has already settled the state
            if !session.is_cancelled() {
                self.set_state(ConnectionState::Disconnected);
            }
        }
        result
    }

    async fn connect_locked(&self, session: &CancellationToken) -> Result<Arc<dyn BlePeripheral>, DeviceError> {
        let linked = match self.peripheral.get() {
            Some(peripheral) => peripheral.is_connected().await.unwrap_or_else(|err| {
                warn!("Error checking connection state of {}: {}", self.name, err);
                false
            }),
            None => false,
        };

        if linked && self.state().is_connected() {
            if let Some(peripheral) = self.peripheral.get() {
                return Ok(peripheral.clone());
            }
        }

        if !linked {
            self.set_state(ConnectionState::Locating);
        }
        let peripheral = guarded(session, "locating the device", None, self.locate()).await?;

        if !linked {
            info!("Connecting to {} ({})...", self.name, peripheral.id());
            self.handshake_pending.store(true, Ordering::SeqCst);
            let handshake = guarded(session, "connecting", Some(self.options.connect_timeout), peripheral.connect()).await;

            match &handshake {
                // left pending for disconnect(), which cancelled us
                Err(DeviceError::Cancelled) => {},
                Err(DeviceError::Timeout(_)) => {
                    self.handshake_pending.store(false, Ordering::SeqCst);
                    if let Err(err) = peripheral.disconnect().await {
                        warn!("Failed to abandon the handshake with {}: {}", self.name, err);
                    }
                },
                _ => self.handshake_pending.store(false, Ordering::SeqCst),
            }
            handshake?;
            info!("Connected to {}", self.name);
        }
        self.set_state(ConnectionState::Connected);

        let services = guarded(
            session,
            "discovering services",
            Some(self.options.connect_timeout),
            self.discovered_services(&peripheral),
        ).await?;
        self.set_state(ConnectionState::Ready);

        if let Err(err) = self.subscribe_to_feedback(session, &peripheral, &services).await {
            // commands still work without feedback, the next reconnect tries again
            error!("Failed to subscribe to feedback events of {}: {}", self.name, err);
        }

        Ok(peripheral)
    }

    async fn discovered_services(&self, peripheral: &Arc<dyn BlePeripheral>) -> Result<Vec<Service>, DeviceError> {
        let cell = self.services.lock().expect("Failed to lock ConnectionManager services").clone();

        let services = cell.get_or_try_init(|| async {
            info!("Discovering services of {}...", self.name);
            peripheral.discover_services().await
        }).await?;

        Ok(services.clone())
    }

    async fn subscribe_to_feedback(
        &self,
        session: &CancellationToken,
        peripheral: &Arc<dyn BlePeripheral>,
        services: &[Service],
    ) -> Result<(), DeviceError> {
        let characteristic = find_characteristic(services, ADVERTISING_SERVICE, FEEDBACK_CHARACTERISTIC)?;

        let notifications = guarded(session, "opening notifications", None, peripheral.notifications()).await?;
        debug!("Subscribing to characteristic {:?} {:?}", characteristic.service_uuid, characteristic.uuid);
        guarded(session, "subscribing", Some(self.options.connect_timeout), peripheral.subscribe(&characteristic)).await?;

        let link = session.child_token();
        if let Some(previous) = self.link.lock().expect("Failed to lock ConnectionManager link").replace(link.clone()) {
            previous.cancel();
        }

        read_notifications_task(link.clone(), self.name.clone(), notifications, self.status.clone());

        let this = self.this.clone();
        let session = session.clone();
        spawn_watchdog(link, self.status.subscribe_updates(), self.options.silence_window, move || {
            if session.is_cancelled() {
                return;
            }

            if let Some(manager) = this.upgrade() {
                spawn(async move {
                    match manager.reconnect_in(session).await {
                        Ok(()) => {},
                        Err(DeviceError::Cancelled) => debug!("Reconnecting to {} cancelled", manager.name),
                        Err(err) => warn!("Reconnecting to {} failed: {}", manager.name, err),
                    }
                });
            }
        });

        self.set_state(ConnectionState::Subscribed);
        Ok(())
    }

    /// Stops the watchdog and notification reader, aborts a pending connect and drops the link.
    pub async fn disconnect(&self) -> Result<(), DeviceError> {
        let previous = {
            let mut session = self.session.lock().expect("Failed to lock ConnectionManager session");
            std::mem::replace(&mut *session, CancellationToken::new())
        };
        previous.cancel();

        self.release_link().await
    }

    async fn release_link(&self) -> Result<(), DeviceError> {
        if let Some(link) = self.link.lock().expect("Failed to lock ConnectionManager link").take() {
            link.cancel();
        }

        let was_connected = self.state().is_connected();
        self.set_state(ConnectionState::Disconnected);

        let peripheral = match self.peripheral.get() {
            Some(peripheral) => peripheral.clone(),
            None => return Ok(()),
        };

        let handshake_pending = self.handshake_pending.swap(false, Ordering::SeqCst);
        if handshake_pending || peripheral.is_connected().await? {
            peripheral.disconnect().await?;
            info!("Disconnected from {}", self.name);
        } else if was_connected {
            info!("Disconnected from {} (link was already gone)", self.name);
        }

        Ok(())
    }

    /// Forgets discovered services, then disconnects and connects again.
    ///
    /// A [`ConnectionManager::disconnect`] issued meanwhile wins: the link stays down.
    // boxed: the watchdog spawned by connect() calls back into this
    pub fn reconnect(&self) -> BoxFuture<'_, Result<(), DeviceError>> {
        self.reconnect_in(self.session())
    }

    fn reconnect_in(&self, session: CancellationToken) -> BoxFuture<'_, Result<(), DeviceError>> {
        async move {
            info!("Reconnecting to {}", self.name);
            self.reset_discovery();

            if let Err(err) = self.release_link().await {
                warn!("Disconnecting from {} failed: {}", self.name, err);
            }
            if session.is_cancelled() {
                return Err(DeviceError::Cancelled);
            }

            self.connect_in(&session).await.map(|_| ())
        }.boxed()
    }

    /// Every service of the device, discovering them if that has not happened yet.
    pub async fn services(&self) -> Result<Vec<Service>, DeviceError> {
        let peripheral = self.connect().await?;
        let session = self.session();
        guarded(&session, "discovering services", Some(self.options.connect_timeout), self.discovered_services(&peripheral)).await
    }

    pub async fn resolve_characteristic(
        &self,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
    ) -> Result<(Arc<dyn BlePeripheral>, Characteristic), DeviceError> {
        let peripheral = self.connect().await?;
        let services = self.services().await?;

        let characteristic = find_characteristic(&services, service_uuid, characteristic_uuid)?;
        Ok((peripheral, characteristic))
    }
}
