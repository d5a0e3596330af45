//! Wire format of the Rest.
//!
//! Commands are ASCII: a two letter opcode followed by every payload byte as two hex digits,
//! e.g. `SI01` turns the device on. Feedback frames are binary and split into sections, each
//! starting with a marker letter: `T` time, `C` color, `S` sound, `P` power.

use log::debug;

use crate::device::constants::{
    FEEDBACK_MIN_LEN, MARKER_COLOR, MARKER_POWER, MARKER_SOUND, MARKER_TIME, OPCODE_COLOR,
    OPCODE_POWER, OPCODE_TRACK, OPCODE_VOLUME, POWER_OFF_MASK,
};
use crate::device::types::{AudioTrack, Color, Command, Status};
use crate::error::DecodeError;

const OFFSET_TIME: usize = 0;
const OFFSET_COLOR: usize = 5;
const OFFSET_SOUND: usize = 10;
const OFFSET_POWER: usize = 13;

pub fn encode(command: &Command) -> Vec<u8> {
    let (opcode, payload): (&str, Vec<u8>) = match *command {
        Command::SetPower(on) => (OPCODE_POWER, vec![u8::from(on)]),
        Command::SetVolume(volume) => (OPCODE_VOLUME, vec![volume]),
        Command::SetColor(Color { r, g, b, a }) => (OPCODE_COLOR, vec![r, g, b, a]),
        Command::SetTrackNumber(track) => (OPCODE_TRACK, vec![track.code()]),
    };

    [opcode.as_bytes(), hex::encode(payload).as_bytes()].concat()
}

/// Percentage (0-100) to the device volume byte, rounding down.
pub fn volume_to_raw(percent: u8) -> u8 {
    (u16::from(percent.min(100)) * 255 / 100) as u8
}

/// Device volume byte to a percentage (0-100), rounding to the nearest value.
pub fn volume_from_raw(raw: u8) -> u8 {
    ((u16::from(raw) * 100 + 127) / 255) as u8
}

fn expect_marker(data: &[u8], offset: usize, expected: u8) -> Result<(), DecodeError> {
    let found = data[offset];
    if found != expected {
        return Err(DecodeError::UnexpectedMarker { offset, expected, found });
    }
    Ok(())
}

pub fn decode(data: &[u8]) -> Result<Status, DecodeError> {
    if data.len() < FEEDBACK_MIN_LEN {
        return Err(DecodeError::TooShort { len: data.len(), min: FEEDBACK_MIN_LEN });
    }

    expect_marker(data, OFFSET_TIME, MARKER_TIME)?;
    expect_marker(data, OFFSET_COLOR, MARKER_COLOR)?;
    expect_marker(data, OFFSET_SOUND, MARKER_SOUND)?;
    expect_marker(data, OFFSET_POWER, MARKER_POWER)?;

    let timestamp = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    let color = Color::new(data[6], data[7], data[8], data[9]);

    let track_code = data[11];
    let audio_track = AudioTrack::from_code(track_code).unwrap_or_else(|| {
        debug!("Unknown audio track code {}, treating as none", track_code);
        AudioTrack::None
    });

    Ok(Status {
        timestamp,
        power: data[14] & POWER_OFF_MASK == 0,
        volume: volume_from_raw(data[12]),
        color,
        audio_track,
    })
}

#[cfg(test)]
pub(crate) fn feedback_frame(status: &Status, raw_volume: u8) -> Vec<u8> {
    let t = status.timestamp.to_be_bytes();
    let c = status.color;
    vec![
        MARKER_TIME, t[0], t[1], t[2], t[3],
        MARKER_COLOR, c.r, c.g, c.b, c.a,
        MARKER_SOUND, status.audio_track.code(), raw_volume,
        MARKER_POWER, if status.power { 0x00 } else { 0xC0 },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Command::SetPower(true), "SI01")]
    #[case(Command::SetPower(false), "SI00")]
    #[case(Command::SetVolume(127), "SV7f")]
    #[case(Command::SetColor(Color::new(255, 0, 128, 10)), "SCff00800a")]
    #[case(Command::SetTrackNumber(AudioTrack::RockABye), "SN0e")]
    #[case(Command::SetTrackNumber(AudioTrack::None), "SN00")]
    fn encodes_ascii_frames(#[case] command: Command, #[case] expected: &str) {
        assert_eq!(encode(&command), expected.as_bytes());
    }

    #[rstest]
    #[case(0, 0)]
    #[case(1, 2)]
    #[case(50, 127)]
    #[case(99, 252)]
    #[case(100, 255)]
    fn volume_scales_down(#[case] percent: u8, #[case] raw: u8) {
        assert_eq!(volume_to_raw(percent), raw);
    }

    #[test]
    fn volume_percentages_survive_the_device() {
        for percent in 0..=100u8 {
            assert_eq!(volume_from_raw(volume_to_raw(percent)), percent);
        }
    }

    #[test]
    fn decodes_feedback_frame() {
        let data = [
            0x54, 0x00, 0x01, 0x02, 0x03,
            0x43, 0x10, 0x20, 0x30, 0x40,
            0x53, 0x05, 0x7f,
            0x50, 0x00,
        ];

        let status = decode(&data).unwrap();
        assert_eq!(status, Status {
            timestamp: 0x00010203,
            power: true,
            volume: 50,
            color: Color::new(0x10, 0x20, 0x30, 0x40),
            audio_track: AudioTrack::Ocean,
        });
    }

    #[rstest]
    #[case(0x00, true)]
    #[case(0x01, true)]
    #[case(0x40, false)]
    #[case(0x80, false)]
    #[case(0xC0, false)]
    fn decodes_power_flags(#[case] flags: u8, #[case] power: bool) {
        let mut data = feedback_frame(&Status::default(), 0);
        data[14] = flags;
        assert_eq!(decode(&data).unwrap().power, power);
    }

    #[test]
    fn ignores_trailing_bytes() {
        let status = Status { power: true, volume: 100, ..Status::default() };
        let mut data = feedback_frame(&status, 255);
        data.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        assert_eq!(decode(&data), Ok(status));
    }

    #[test]
    fn unknown_track_decodes_as_none() {
        let mut data = feedback_frame(&Status::default(), 0);
        data[11] = 42;
        assert_eq!(decode(&data).unwrap().audio_track, AudioTrack::None);
    }

    #[test]
    fn rejects_short_frames() {
        let data = feedback_frame(&Status::default(), 0);
        for len in 0..FEEDBACK_MIN_LEN {
            assert_eq!(
                decode(&data[..len]),
                Err(DecodeError::TooShort { len, min: FEEDBACK_MIN_LEN }),
            );
        }
    }

    #[test]
    fn rejects_misplaced_markers() {
        let mut data = feedback_frame(&Status::default(), 0);
        data[10] = 0x00;
        assert_eq!(
            decode(&data),
            Err(DecodeError::UnexpectedMarker { offset: 10, expected: MARKER_SOUND, found: 0x00 }),
        );
    }
}
