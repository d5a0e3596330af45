use serde::{Deserialize, Serialize};

use crate::device::types::{AudioTrack, Color, DeviceAddress};
use crate::error::{ConfigError, ValidationError};

/// One Rest, and what "on" means for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub name: String,
    pub mac_address: String,
    /// Percentage applied when turning on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_track: Option<AudioTrack>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
}

impl DeviceConfig {
    pub fn address(&self) -> Result<DeviceAddress, ValidationError> {
        DeviceAddress::parse(&self.mac_address)
    }

    /// Volume to apply on power on. Zero counts as not configured.
    pub fn on_volume(&self) -> Option<u8> {
        self.volume.filter(|volume| *volume > 0)
    }

    /// Track to apply on power on. [`AudioTrack::None`] counts as not configured.
    pub fn on_audio_track(&self) -> Option<AudioTrack> {
        self.audio_track.filter(|track| *track != AudioTrack::None)
    }

    /// A light needs a color, or a volume together with a track, to have something to turn on.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.address()?;

        if let Some(volume) = self.volume {
            if volume > 100 {
                return Err(ValidationError::VolumeOutOfRange(volume));
            }
        }

        let audio_supplied = self.on_volume().is_some() && self.on_audio_track().is_some();
        if !audio_supplied && self.color.is_none() {
            return Err(ValidationError::IncompleteConfig(self.name.clone()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub devices: Vec<DeviceConfig>,
    /// Seconds the connect handshake and service discovery may take.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u64>,
}

impl Config {
    /// The device called `name`, or the first one if no name is given.
    pub fn device(&self, name: Option<&str>) -> Result<&DeviceConfig, ConfigError> {
        match name {
            Some(name) => self
                .devices
                .iter()
                .find(|device| device.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| ConfigError::UnknownDevice(name.to_string())),
            None => self.devices.first().ok_or(ConfigError::NoDevices),
        }
    }

    /// Adds `device`, replacing a device with the same name.
    pub fn upsert_device(&mut self, device: DeviceConfig) {
        match self.devices.iter_mut().find(|d| d.name.eq_ignore_ascii_case(&device.name)) {
            Some(existing) => *existing = device,
            None => self.devices.push(device),
        }
    }
}
