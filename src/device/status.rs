use std::sync::Mutex;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};

use crate::device::types::{AudioTrack, Color, Status};

/// Multicast list of subscribers. Receivers that were dropped are pruned on the next notify.
struct Observers<T> {
    senders: Vec<UnboundedSender<T>>,
}

impl<T: Clone> Observers<T> {
    fn new() -> Self {
        Observers { senders: Vec::new() }
    }

    fn subscribe(&mut self) -> UnboundedReceiver<T> {
        let (tx, rx) = unbounded();
        self.senders.push(tx);
        rx
    }

    fn notify(&mut self, value: &T) {
        self.senders.retain(|sender| sender.unbounded_send(value.clone()).is_ok());
    }

    fn notify_if_changed(&mut self, previous: &T, value: &T)
    where
        T: PartialEq,
    {
        if previous != value {
            self.notify(value);
        }
    }
}

struct StatusStreamInner {
    current: Status,
    updates: Observers<Status>,
    power: Observers<bool>,
    volume: Observers<u8>,
    color: Observers<Color>,
    audio_track: Observers<AudioTrack>,
}

/// Last known device status, republished per field whenever that field changes.
pub struct StatusStream {
    inner: Mutex<StatusStreamInner>,
}

impl StatusStream {
    pub fn new() -> Self {
        StatusStream {
            inner: Mutex::new(StatusStreamInner {
                current: Status::default(),
                updates: Observers::new(),
                power: Observers::new(),
                volume: Observers::new(),
                color: Observers::new(),
                audio_track: Observers::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatusStreamInner> {
        self.inner.lock().expect("Failed to lock StatusStream inner")
    }

    pub fn current(&self) -> Status {
        self.lock().current
    }

    pub fn publish(&self, status: Status) {
        let mut inner = self.lock();
        let previous = std::mem::replace(&mut inner.current, status);

        inner.updates.notify(&status);
        inner.power.notify_if_changed(&previous.power, &status.power);
        inner.volume.notify_if_changed(&previous.volume, &status.volume);
        inner.color.notify_if_changed(&previous.color, &status.color);
        inner.audio_track.notify_if_changed(&previous.audio_track, &status.audio_track);
    }

    /// Every published status, changed or not.
    pub fn subscribe_updates(&self) -> UnboundedReceiver<Status> {
        self.lock().updates.subscribe()
    }

    pub fn subscribe_power(&self) -> UnboundedReceiver<bool> {
        self.lock().power.subscribe()
    }

    pub fn subscribe_volume(&self) -> UnboundedReceiver<u8> {
        self.lock().volume.subscribe()
    }

    pub fn subscribe_color(&self) -> UnboundedReceiver<Color> {
        self.lock().color.subscribe()
    }

    pub fn subscribe_audio_track(&self) -> UnboundedReceiver<AudioTrack> {
        self.lock().audio_track.subscribe()
    }
}

impl Default for StatusStream {
    fn default() -> Self {
        StatusStream::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain<T>(rx: &mut UnboundedReceiver<T>) -> Vec<T> {
        let mut values = Vec::new();
        while let Ok(Some(value)) = rx.try_next() {
            values.push(value);
        }
        values
    }

    #[test]
    fn starts_with_default_status() {
        let stream = StatusStream::new();
        assert_eq!(stream.current(), Status {
            timestamp: 0,
            power: false,
            volume: 0,
            color: Color::new(0, 0, 0, 0),
            audio_track: AudioTrack::None,
        });
    }

    #[test]
    fn field_channels_only_emit_changes() {
        let stream = StatusStream::new();
        let mut power = stream.subscribe_power();
        let mut volume = stream.subscribe_volume();
        let mut color = stream.subscribe_color();
        let mut track = stream.subscribe_audio_track();

        let status = Status {
            timestamp: 1,
            power: true,
            volume: 40,
            color: Color::new(1, 2, 3, 4),
            audio_track: AudioTrack::Rain,
        };
        stream.publish(status);
        stream.publish(Status { timestamp: 2, ..status });

        assert_eq!(drain(&mut power), vec![true]);
        assert_eq!(drain(&mut volume), vec![40]);
        assert_eq!(drain(&mut color), vec![Color::new(1, 2, 3, 4)]);
        assert_eq!(drain(&mut track), vec![AudioTrack::Rain]);
        assert_eq!(stream.current().timestamp, 2);
    }

    #[test]
    fn unchanged_default_does_not_emit() {
        let stream = StatusStream::new();
        let mut power = stream.subscribe_power();
        let mut updates = stream.subscribe_updates();

        stream.publish(Status::default());
        stream.publish(Status { volume: 10, ..Status::default() });

        assert!(drain(&mut power).is_empty());
        assert_eq!(drain(&mut updates).len(), 2);
    }

    #[test]
    fn color_compares_every_channel() {
        let stream = StatusStream::new();
        let mut color = stream.subscribe_color();

        stream.publish(Status { color: Color::new(0, 0, 0, 1), ..Status::default() });
        stream.publish(Status { color: Color::new(0, 0, 0, 1), ..Status::default() });
        stream.publish(Status { color: Color::new(0, 0, 1, 1), ..Status::default() });

        assert_eq!(drain(&mut color), vec![Color::new(0, 0, 0, 1), Color::new(0, 0, 1, 1)]);
    }

    #[test]
    fn late_subscribers_get_no_replay() {
        let stream = StatusStream::new();
        stream.publish(Status { power: true, ..Status::default() });

        let mut power = stream.subscribe_power();
        assert!(drain(&mut power).is_empty());

        stream.publish(Status::default());
        assert_eq!(drain(&mut power), vec![false]);
    }

    #[test]
    fn every_subscriber_receives_changes() {
        let stream = StatusStream::new();
        let mut first = stream.subscribe_power();
        let second = stream.subscribe_power();
        let mut third = stream.subscribe_power();
        drop(second);

        stream.publish(Status { power: true, ..Status::default() });

        assert_eq!(drain(&mut first), vec![true]);
        assert_eq!(drain(&mut third), vec![true]);
        assert_eq!(stream.lock().power.senders.len(), 2);
    }
}
