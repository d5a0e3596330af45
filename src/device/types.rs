use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Bluetooth hardware address in the form `aa-bb-cc-dd-ee-ff`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Accepts `AA:BB:CC:DD:EE:FF`, `aa-bb-cc-dd-ee-ff` or `aabbccddeeff`.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let digits: String = input
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();

        if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::InvalidAddress(input.to_string()));
        }

        let octets: Vec<&str> = (0..6).map(|i| &digits[i * 2..i * 2 + 2]).collect();
        Ok(DeviceAddress(octets.join("-")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if `other` (in any of the accepted notations) names the same device.
    pub fn matches(&self, other: &str) -> bool {
        DeviceAddress::parse(other).map(|a| a == *self).unwrap_or(false)
    }
}

impl FromStr for DeviceAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceAddress::parse(s)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// Brightness.
    pub a: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Color { r, g, b, a }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.r, self.g, self.b, self.a)
    }
}

/// `r,g,b,a`, each 0-255.
impl FromStr for Color {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let channels = s
            .split(',')
            .map(|channel| channel.trim().parse::<u8>())
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| ValidationError::InvalidColor(s.to_string()))?;

        match channels[..] {
            [r, g, b, a] => Ok(Color { r, g, b, a }),
            _ => Err(ValidationError::InvalidColor(s.to_string())),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AudioTrack {
    #[default]
    None,
    Stream,
    PinkNoise,
    Dryer,
    Ocean,
    Wind,
    Rain,
    Bird,
    Crickets,
    Brahms,
    Twinkle,
    RockABye,
}

pub const AUDIO_TRACKS: [AudioTrack; 12] = [
    AudioTrack::None,
    AudioTrack::Stream,
    AudioTrack::PinkNoise,
    AudioTrack::Dryer,
    AudioTrack::Ocean,
    AudioTrack::Wind,
    AudioTrack::Rain,
    AudioTrack::Bird,
    AudioTrack::Crickets,
    AudioTrack::Brahms,
    AudioTrack::Twinkle,
    AudioTrack::RockABye,
];

impl AudioTrack {
    /// Track number used on the wire.
    pub fn code(self) -> u8 {
        match self {
            AudioTrack::None => 0,
            AudioTrack::Stream => 2,
            AudioTrack::PinkNoise => 3,
            AudioTrack::Dryer => 4,
            AudioTrack::Ocean => 5,
            AudioTrack::Wind => 6,
            AudioTrack::Rain => 7,
            AudioTrack::Bird => 9,
            AudioTrack::Crickets => 10,
            AudioTrack::Brahms => 11,
            AudioTrack::Twinkle => 13,
            AudioTrack::RockABye => 14,
        }
    }

    pub fn from_code(code: u8) -> Option<AudioTrack> {
        AUDIO_TRACKS.iter().copied().find(|track| track.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            AudioTrack::None => "none",
            AudioTrack::Stream => "stream",
            AudioTrack::PinkNoise => "pink-noise",
            AudioTrack::Dryer => "dryer",
            AudioTrack::Ocean => "ocean",
            AudioTrack::Wind => "wind",
            AudioTrack::Rain => "rain",
            AudioTrack::Bird => "bird",
            AudioTrack::Crickets => "crickets",
            AudioTrack::Brahms => "brahms",
            AudioTrack::Twinkle => "twinkle",
            AudioTrack::RockABye => "rock-a-bye",
        }
    }
}

impl fmt::Display for AudioTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for AudioTrack {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        AUDIO_TRACKS
            .iter()
            .copied()
            .find(|track| track.name() == wanted)
            .ok_or_else(|| ValidationError::UnknownAudioTrack(s.to_string()))
    }
}

/// Decoded feedback frame. A new value is produced for every notification.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Seconds, as reported by the device clock.
    pub timestamp: u32,
    pub power: bool,
    /// Percentage, 0-100.
    pub volume: u8,
    pub color: Color,
    pub audio_track: AudioTrack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetPower(bool),
    /// Raw device volume, 0-255.
    SetVolume(u8),
    SetColor(Color),
    SetTrackNumber(AudioTrack),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Locating,
    Connected,
    Ready,
    Subscribed,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self >= ConnectionState::Connected
    }
}
