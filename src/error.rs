use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use uuid::Uuid;
use btleplug;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },

    #[error("No device named {0:?} in the config file")]
    UnknownDevice(String),

    #[error("The config file does not list any devices; pass --address or add one")]
    NoDevices,
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (device): {source}")]
    DeviceError { #[from] source: DeviceError },

    #[error("Invalid input: {source}")]
    ValidationError { #[from] source: ValidationError },

    #[error("Failed to start application (io): {source}")]
    IOError { #[from] source: io::Error },
}

/// Input rejected before any bluetooth traffic happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Volume must be between 0 and 100. Received {0}")]
    VolumeOutOfRange(u8),

    #[error("Not a valid bluetooth address: {0:?}")]
    InvalidAddress(String),

    #[error("You must set color or volume and audioTrack for light {0}")]
    IncompleteConfig(String),

    #[error("Not a valid color, expected r,g,b,a: {0:?}")]
    InvalidColor(String),

    #[error("Unknown audio track: {0:?}")]
    UnknownAudioTrack(String),
}

/// A feedback notification that could not be turned into a status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Feedback frame too short: {len} bytes, expected at least {min}")]
    TooShort { len: usize, min: usize },

    #[error("Unexpected marker at offset {offset}: expected {expected:#04x}, found {found:#04x}")]
    UnexpectedMarker { offset: usize, expected: u8, found: u8 },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Bluetooth operation took too long: {0}")]
    Timeout(&'static str),

    #[error("Operation cancelled because the device was disconnected")]
    Cancelled,

    #[error("A required bluetooth service is not available: {0}")]
    MissingService(Uuid),

    #[error("A required bluetooth characteristic is not available: {0}")]
    MissingCharacteristic(Uuid),

    #[error("{source}")]
    Validation { #[from] source: ValidationError },
}

impl DeviceError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, DeviceError::Btle { source: btleplug::Error::PermissionDenied })
    }
}
