//! Command line front end: one-shot commands and a long running `watch`.

use std::future::pending;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use clap::{Parser, Subcommand};
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, error, info, warn, LevelFilter};
use tokio::select;
use tokio::time::{sleep, timeout};

use crate::bridge::PowerSwitch;
use crate::config::io::ConfigIO;
use crate::config::types::{Config, DeviceConfig};
use crate::device::btle::BtleplugTransport;
use crate::device::connection::ConnectionOptions;
use crate::device::hatch_rest::HatchRest;
use crate::device::transport::BleTransport;
use crate::device::types::{AudioTrack, Color, Status};
use crate::error::{AppRunError, ConfigError, DeviceError};

const FIRST_STATUS_WAIT: Duration = Duration::from_secs(10);
const WATCH_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Control a Hatch Baby Rest over Bluetooth LE", long_about = None)]
pub struct Args {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Name of the device in the config file. Defaults to the first one
    #[arg(long, short, global = true)]
    pub device: Option<String>,

    /// Talk to this address directly, ignoring the config file
    #[arg(long, global = true)]
    pub address: Option<String>,

    /// More logging, repeat for even more
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(long, short, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the current status
    Status,
    /// Turn on, applying the configured volume, track and color
    On,
    /// Turn off
    Off,
    /// Set the volume, 0-100
    Volume { percent: u8 },
    /// Set the color as r,g,b,a
    Color { color: Color },
    /// Play a track, e.g. ocean, pink-noise or none
    Track { track: AudioTrack },
    /// Keep connected and log every change until interrupted
    Watch,
    /// Add a device to the config file, or replace the one with the same name
    Add {
        name: String,
        address: String,
        #[arg(long)]
        volume: Option<u8>,
        #[arg(long)]
        track: Option<AudioTrack>,
        #[arg(long)]
        color: Option<Color>,
    },
}

impl Args {
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Warn;
        }

        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

fn connection_options(config: &Config) -> ConnectionOptions {
    let mut options = ConnectionOptions::default();
    if let Some(seconds) = config.connect_timeout {
        options.connect_timeout = Duration::from_secs(seconds);
    }
    options
}

fn select_device(args: &Args, config: &Config) -> Result<DeviceConfig, AppRunError> {
    if let Some(address) = &args.address {
        let name = args.device.clone().unwrap_or_else(|| String::from("Rest"));
        let device = DeviceConfig {
            name,
            mac_address: address.clone(),
            volume: None,
            audio_track: None,
            color: None,
        };
        device.address()?;
        return Ok(device);
    }

    Ok(config.device(args.device.as_deref())?.clone())
}

fn print_status(name: &str, advertised_name: Option<String>, status: &Status) {
    match advertised_name {
        Some(advertised_name) => println!("{} ({})", name, advertised_name),
        None => println!("{}", name),
    }
    println!("  power:       {}", if status.power { "on" } else { "off" });
    println!("  volume:      {}%", status.volume);
    println!("  audio track: {}", status.audio_track);
    println!("  color:       {}", status.color);
    println!("  device time: {}", status.timestamp);
}

fn changes(rest: &HatchRest, with_power: bool) -> BoxStream<'static, String> {
    let mut streams = vec![
        rest.on_volume().map(|volume| format!("volume {}%", volume)).boxed(),
        rest.on_audio_track().map(|track| format!("audio track {}", track)).boxed(),
        rest.on_color().map(|color| format!("color {}", color)).boxed(),
    ];

    if with_power {
        streams.push(rest.on_power().map(|on| format!("power {}", if on { "on" } else { "off" })).boxed());
    }

    stream::select_all(streams).boxed()
}

async fn watch(
    config_io: &ConfigIO,
    rest: &Arc<HatchRest>,
    switch: Option<&PowerSwitch>,
) -> Result<(), AppRunError> {
    let mut locker = config_io.locker()?;
    let _lock = locker.lock()?;

    let name = rest.name().to_string();
    if let Some(switch) = switch {
        let name = name.clone();
        switch.watch_power(move |on| println!("{}: power {}", name, if on { "on" } else { "off" }));
    }

    let mut changes = changes(rest, switch.is_none());
    let printer = tokio::spawn(async move {
        while let Some(change) = changes.next().await {
            println!("{}: {}", name, change);
        }
    });

    let mut states = rest.connection_state_changes();
    let state_logger = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow();
            debug!("Connection state: {:?}", state);
        }
    });

    // once linked, the watchdog takes care of reconnecting
    let connecting = async {
        while let Err(err) = rest.connect().await {
            warn!("Could not connect to {}: {}", rest.name(), err);
            sleep(WATCH_RETRY_DELAY).await;
        }
        info!("Connected to {}", rest.name());
        pending::<()>().await
    };

    select! {
        interrupted = tokio::signal::ctrl_c() => interrupted?,
        _ = connecting => {},
    }
    info!("Interrupted, disconnecting");

    printer.abort();
    state_logger.abort();
    Ok(())
}

async fn execute(
    command: &Command,
    config_io: &ConfigIO,
    rest: &Arc<HatchRest>,
    switch: Option<&PowerSwitch>,
) -> Result<(), AppRunError> {
    match command {
        Command::Status => {
            let mut updates = rest.on_status();
            rest.connect().await?;
            match timeout(FIRST_STATUS_WAIT, updates.next()).await {
                Ok(Some(status)) => {
                    let advertised_name = rest.advertised_name().await.unwrap_or_else(|err| {
                        debug!("No advertised name for {}: {}", rest.name(), err);
                        None
                    });
                    print_status(rest.name(), advertised_name, &status);
                },
                _ => return Err(DeviceError::Timeout("waiting for the first status").into()),
            }
        },
        Command::On | Command::Off => {
            let on = matches!(command, Command::On);
            match switch {
                Some(switch) => switch.set_on(on).await?,
                None => rest.set_power(on).await?,
            }
        },
        Command::Volume { percent } => rest.set_volume(*percent).await?,
        Command::Color { color } => rest.set_color(*color).await?,
        Command::Track { track } => rest.set_audio_track(*track).await?,
        Command::Watch => watch(config_io, rest, switch).await?,
        Command::Add { .. } => {},
    }

    Ok(())
}

pub async fn run(args: Args) -> Result<(), AppRunError> {
    let config_io = ConfigIO::new_sync(args.config.as_deref())?;
    let mut config = config_io.read().await?;

    if let Command::Add { name, address, volume, track, color } = &args.command {
        let device = DeviceConfig {
            name: name.clone(),
            mac_address: address.clone(),
            volume: *volume,
            audio_track: *track,
            color: *color,
        };
        device.validate()?;

        info!("Saving {} ({})", device.name, device.address()?);
        config.upsert_device(device);
        config_io.save(&config).await?;
        return Ok(());
    }

    let device = select_device(&args, &config)?;
    let options = connection_options(&config);
    let transport: Arc<dyn BleTransport> = Arc::new(BtleplugTransport::new());

    let switch = match device.validate() {
        Ok(()) => Some(PowerSwitch::new(device.clone(), transport.clone(), options)?),
        Err(err) => {
            debug!("Not using {} as a power switch: {}", device.name, err);
            None
        },
    };
    let rest = match &switch {
        Some(switch) => switch.device().clone(),
        None => Arc::new(HatchRest::new(&device.name, device.address()?, transport, options)),
    };

    let result = execute(&args.command, &config_io, &rest, switch.as_ref()).await;
    rest.shutdown().await;
    result
}

/// Logs why `run` failed, with a hint for the failures users can fix themselves.
pub fn finish(result: Result<(), AppRunError>) -> Result<(), AppRunError> {
    let err = match result {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };

    match &err {
        AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } } => {
            error!("Another hatch-rest is already watching devices from this config file");
        },
        AppRunError::DeviceError { source } if source.is_permission_denied() => {
            error!("Bluetooth access was denied. Grant this terminal bluetooth permission and try again");
        },
        AppRunError::DeviceError { source: DeviceError::NoAdapter } => {
            error!("No bluetooth adapter found. Is bluetooth turned on?");
        },
        _ => error!("{}", err),
    }

    Err(err)
}
