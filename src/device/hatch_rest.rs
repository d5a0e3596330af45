use std::sync::Arc;
use btleplug::api::WriteType;
use futures::channel::mpsc::UnboundedReceiver;
use log::{debug, info, warn};
use tokio::sync::watch;

use crate::device::codec::{encode, volume_to_raw};
use crate::device::connection::{ConnectionManager, ConnectionOptions};
use crate::device::constants::{CONTROL_SERVICE, CONTROL_TX_CHARACTERISTIC};
use crate::device::status::StatusStream;
use crate::device::transport::BleTransport;
use crate::device::types::{AudioTrack, Color, Command, ConnectionState, DeviceAddress, Status};
use crate::error::{DeviceError, ValidationError};

/// A Hatch Baby Rest.
///
/// Commands connect on demand. The `on_*` streams only report values that differ from the
/// previous feedback frame, and only those received after subscribing.
pub struct HatchRest {
    connection: Arc<ConnectionManager>,
    status: Arc<StatusStream>,
}

impl HatchRest {
    pub fn new(
        name: &str,
        address: DeviceAddress,
        transport: Arc<dyn BleTransport>,
        options: ConnectionOptions,
    ) -> Self {
        let status = Arc::new(StatusStream::new());
        let connection = ConnectionManager::new(name.to_string(), address, transport, status.clone(), options);

        HatchRest { connection, status }
    }

    pub fn name(&self) -> &str {
        self.connection.name()
    }

    pub fn address(&self) -> &DeviceAddress {
        self.connection.address()
    }

    /// The name the device advertises itself with. Scans for it if needed, but does not connect.
    pub async fn advertised_name(&self) -> Result<Option<String>, DeviceError> {
        self.connection.locate().await?.local_name().await
    }

    pub async fn connect(&self) -> Result<(), DeviceError> {
        self.connection.connect().await.map(|_| ())
    }

    pub async fn disconnect(&self) -> Result<(), DeviceError> {
        self.connection.disconnect().await
    }

    pub async fn reconnect(&self) -> Result<(), DeviceError> {
        self.connection.reconnect().await
    }

    /// Teardown for the host process: stops every background task and drops the link.
    pub async fn shutdown(&self) {
        if let Err(err) = self.connection.disconnect().await {
            warn!("Error while disconnecting from {}: {}", self.name(), err);
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection_state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.connection.state_changes()
    }

    async fn send(&self, command: Command) -> Result<(), DeviceError> {
        let (peripheral, characteristic) = self
            .connection
            .resolve_characteristic(CONTROL_SERVICE, CONTROL_TX_CHARACTERISTIC)
            .await?;

        let frame = encode(&command);
        debug!("Sending {:?} to {} as {:?}", command, self.name(), String::from_utf8_lossy(&frame));

        peripheral
            .write(&characteristic, &frame, WriteType::WithResponse)
            .await
            .map_err(|err| {
                warn!("Failed to send {:?} to {}: {}", command, self.name(), err);
                err
            })
    }

    pub async fn set_power(&self, on: bool) -> Result<(), DeviceError> {
        self.send(Command::SetPower(on)).await
    }

    /// `percent` must be 0-100. Nothing is sent if it is not.
    pub async fn set_volume(&self, percent: u8) -> Result<(), DeviceError> {
        if percent > 100 {
            return Err(ValidationError::VolumeOutOfRange(percent).into());
        }

        self.send(Command::SetVolume(volume_to_raw(percent))).await
    }

    pub async fn set_color(&self, color: Color) -> Result<(), DeviceError> {
        self.send(Command::SetColor(color)).await
    }

    pub async fn set_audio_track(&self, track: AudioTrack) -> Result<(), DeviceError> {
        self.send(Command::SetTrackNumber(track)).await
    }

    /// The last status received. Starts connecting in the background if we are not connected,
    /// so that polling this eventually yields live values.
    pub fn current_status(&self) -> Status {
        if self.connection.state() == ConnectionState::Disconnected {
            self.connect_in_background();
        }

        self.status.current()
    }

    /// Spawns [`HatchRest::connect`] on the current tokio runtime, if there is one.
    pub fn connect_in_background(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let connection = self.connection.clone();
                handle.spawn(async move {
                    if let Err(err) = connection.connect().await {
                        debug!("Background connect to {} failed: {}", connection.name(), err);
                    }
                });
            },
            Err(_) => info!("Not connecting to {}: no async runtime", self.name()),
        }
    }

    /// Every decoded feedback frame, changed or not.
    pub fn on_status(&self) -> UnboundedReceiver<Status> {
        self.status.subscribe_updates()
    }

    pub fn on_power(&self) -> UnboundedReceiver<bool> {
        self.status.subscribe_power()
    }

    pub fn on_volume(&self) -> UnboundedReceiver<u8> {
        self.status.subscribe_volume()
    }

    pub fn on_color(&self) -> UnboundedReceiver<Color> {
        self.status.subscribe_color()
    }

    pub fn on_audio_track(&self) -> UnboundedReceiver<AudioTrack> {
        self.status.subscribe_audio_track()
    }
}
