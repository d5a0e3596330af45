//! The Rest as a single on/off switch, the way a smart home bridge exposes it.

use std::sync::Arc;
use futures::StreamExt;
use log::{error, info};
use tokio::spawn;
use tokio::task::JoinHandle;

use crate::config::types::DeviceConfig;
use crate::device::connection::ConnectionOptions;
use crate::device::hatch_rest::HatchRest;
use crate::device::transport::BleTransport;
use crate::error::{DeviceError, ValidationError};

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

pub struct PowerSwitch {
    device: Arc<HatchRest>,
    config: DeviceConfig,
}

impl PowerSwitch {
    /// Validates `config` and starts connecting to the device in the background.
    pub fn new(
        config: DeviceConfig,
        transport: Arc<dyn BleTransport>,
        options: ConnectionOptions,
    ) -> Result<Self, ValidationError> {
        if let Err(err) = config.validate() {
            error!("Invalid configuration for {}: {}", config.name, err);
            return Err(err);
        }

        let device = Arc::new(HatchRest::new(&config.name, config.address()?, transport, options));
        device.connect_in_background();

        Ok(PowerSwitch { device, config })
    }

    pub fn device(&self) -> &Arc<HatchRest> {
        &self.device
    }

    pub fn is_on(&self) -> bool {
        self.device.current_status().power
    }

    /// Turning on also applies the configured volume, track and color, in that order.
    pub async fn set_on(&self, on: bool) -> Result<(), DeviceError> {
        info!("Turning {} {}", self.config.name, on_off(on));
        self.device.set_power(on).await?;

        if !on {
            // no need to set other values since it's off
            return Ok(());
        }

        if let Some(volume) = self.config.on_volume() {
            self.device.set_volume(volume).await?;
        }

        if let Some(track) = self.config.on_audio_track() {
            self.device.set_audio_track(track).await?;
        }

        if let Some(color) = self.config.color {
            self.device.set_color(color).await?;
        }

        Ok(())
    }

    /// Calls `on_change` for every power change reported by the device.
    pub fn watch_power<F>(&self, mut on_change: F) -> JoinHandle<()>
    where
        F: FnMut(bool) + Send + 'static,
    {
        let mut power = self.device.on_power();
        let name = self.config.name.clone();

        spawn(async move {
            while let Some(on) = power.next().await {
                info!("{} turned {}", name, on_off(on));
                on_change(on);
            }
        })
    }

    pub async fn shutdown(&self) {
        self.device.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::{sleep, Duration};
    use crate::device::codec::feedback_frame;
    use crate::device::constants::FEEDBACK_CHARACTERISTIC;
    use crate::device::testing::{FakePeripheral, FakeTransport, ADDRESS};
    use crate::device::types::{AudioTrack, Color, Status};

    fn switch(peripheral: &Arc<FakePeripheral>, config: DeviceConfig) -> Result<PowerSwitch, ValidationError> {
        PowerSwitch::new(config, Arc::new(FakeTransport::new(peripheral.clone())), ConnectionOptions::default())
    }

    fn config() -> DeviceConfig {
        DeviceConfig {
            name: String::from("Nursery"),
            mac_address: String::from(ADDRESS),
            volume: Some(50),
            audio_track: Some(AudioTrack::Ocean),
            color: Some(Color::new(255, 0, 0, 20)),
        }
    }

    fn sent(peripheral: &FakePeripheral) -> Vec<String> {
        peripheral.writes().into_iter().map(|(_, data, _)| String::from_utf8(data).unwrap()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn turning_on_applies_the_config() {
        let peripheral = Arc::new(FakePeripheral::new());
        let switch = switch(&peripheral, config()).unwrap();

        switch.set_on(true).await.unwrap();
        assert_eq!(sent(&peripheral), vec!["SI01", "SV7f", "SN05", "SCff000014"]);
    }

    #[tokio::test(start_paused = true)]
    async fn turning_off_only_sends_power() {
        let peripheral = Arc::new(FakePeripheral::new());
        let switch = switch(&peripheral, config()).unwrap();

        switch.set_on(false).await.unwrap();
        assert_eq!(sent(&peripheral), vec!["SI00"]);
    }

    #[tokio::test(start_paused = true)]
    async fn light_only_config_skips_audio() {
        let peripheral = Arc::new(FakePeripheral::new());
        let config = DeviceConfig { volume: Some(0), audio_track: None, ..config() };
        let switch = switch(&peripheral, config).unwrap();

        switch.set_on(true).await.unwrap();
        assert_eq!(sent(&peripheral), vec!["SI01", "SCff000014"]);
    }

    #[tokio::test(start_paused = true)]
    async fn incomplete_config_is_rejected() {
        let peripheral = Arc::new(FakePeripheral::new());
        let config = DeviceConfig { color: None, audio_track: None, ..config() };

        assert!(matches!(switch(&peripheral, config), Err(ValidationError::IncompleteConfig(_))));
        sleep(Duration::from_secs(1)).await;
        assert_eq!(peripheral.connects.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connects_on_creation_and_reports_power() {
        let peripheral = Arc::new(FakePeripheral::new());
        let switch = switch(&peripheral, config()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        switch.watch_power(move |on| recorder.lock().unwrap().push(on));

        sleep(Duration::from_secs(1)).await;
        assert!(!switch.is_on());

        peripheral.notify(FEEDBACK_CHARACTERISTIC, feedback_frame(&Status { power: true, ..Status::default() }, 0));
        peripheral.notify(FEEDBACK_CHARACTERISTIC, feedback_frame(&Status { power: true, ..Status::default() }, 0));
        peripheral.notify(FEEDBACK_CHARACTERISTIC, feedback_frame(&Status::default(), 0));
        sleep(Duration::from_millis(100)).await;

        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
        assert!(!switch.is_on());
        assert_eq!(peripheral.connects.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
