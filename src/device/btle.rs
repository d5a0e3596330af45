use std::sync::Arc;
use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, Service, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

use crate::device::constants::{CONNECT_DELAY, SCAN_POLL_DELAY};
use crate::device::transport::{BlePeripheral, BleTransport, NotificationStream};
use crate::device::types::DeviceAddress;
use crate::error::DeviceError;

#[async_trait]
impl BlePeripheral for Peripheral {
    fn id(&self) -> String {
        btleplug::api::Peripheral::address(self).to_string()
    }

    async fn local_name(&self) -> Result<Option<String>, DeviceError> {
        let properties = btleplug::api::Peripheral::properties(self).await?;
        Ok(properties.and_then(|properties| properties.local_name))
    }

    async fn is_connected(&self) -> Result<bool, DeviceError> {
        Ok(btleplug::api::Peripheral::is_connected(self).await?)
    }

    async fn connect(&self) -> Result<(), DeviceError> {
        Ok(btleplug::api::Peripheral::connect(self).await?)
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        Ok(btleplug::api::Peripheral::disconnect(self).await?)
    }

    async fn discover_services(&self) -> Result<Vec<Service>, DeviceError> {
        btleplug::api::Peripheral::discover_services(self).await?;
        Ok(btleplug::api::Peripheral::services(self).into_iter().collect())
    }

    async fn write(&self, characteristic: &Characteristic, data: &[u8], write_type: WriteType) -> Result<(), DeviceError> {
        Ok(btleplug::api::Peripheral::write(self, characteristic, data, write_type).await?)
    }

    async fn subscribe(&self, characteristic: &Characteristic) -> Result<(), DeviceError> {
        Ok(btleplug::api::Peripheral::subscribe(self, characteristic).await?)
    }

    async fn notifications(&self) -> Result<NotificationStream, DeviceError> {
        Ok(btleplug::api::Peripheral::notifications(self).await?)
    }
}

/// [`BleTransport`] backed by the platform bluetooth stack.
pub struct BtleplugTransport {
    // the manager is kept alive for as long as its adapters are in use
    adapters: Mutex<Option<(Manager, Vec<Adapter>)>>,
}

impl BtleplugTransport {
    pub fn new() -> Self {
        BtleplugTransport { adapters: Mutex::new(None) }
    }

    async fn start_scanning() -> Result<(Manager, Vec<Adapter>), DeviceError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;

        if adapters.is_empty() {
            return Err(DeviceError::NoAdapter);
        }

        for adapter in &adapters {
            info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
            adapter.start_scan(ScanFilter::default()).await?;
        }

        Ok((manager, adapters))
    }

    async fn find_in_adapters(adapters: &[Adapter], address: &DeviceAddress) -> Option<Peripheral> {
        for adapter in adapters {
            let peripherals = match adapter.peripherals().await {
                Ok(v) => v,
                Err(err) => {
                    warn!("Failed to query BLE adapter for peripherals: {}", err);
                    continue;
                },
            };

            for peripheral in peripherals {
                match peripheral.properties().await {
                    Err(err) => {
                        warn!("Could not query peripheral for properties: {:?}", err);
                    },
                    Ok(None) => {
                        debug!("Peripheral has no properties");
                    },
                    Ok(Some(properties)) => {
                        if address.matches(&properties.address.to_string()) {
                            info!(
                                "Using peripheral {} {:?} {}",
                                properties.address,
                                properties.address_type,
                                properties.local_name.unwrap_or(String::from("NONE")),
                            );
                            return Some(peripheral);
                        }
                    },
                }
            }
        }

        None
    }
}

impl Default for BtleplugTransport {
    fn default() -> Self {
        BtleplugTransport::new()
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    async fn wait_ready(&self) -> Result<(), DeviceError> {
        let mut adapters = self.adapters.lock().await;

        while adapters.is_none() {
            match BtleplugTransport::start_scanning().await {
                Ok(started) => *adapters = Some(started),
                Err(err) => {
                    if err.is_permission_denied() {
                        warn!("No permission to use bluetooth: {}", err);
                    } else {
                        warn!("Scanning failed: {}", err);
                    }
                    sleep(Duration::from_millis(CONNECT_DELAY)).await;
                },
            }
        }

        Ok(())
    }

    async fn find_peripheral(&self, address: &DeviceAddress) -> Result<Arc<dyn BlePeripheral>, DeviceError> {
        let adapters = match self.adapters.lock().await.as_ref() {
            Some((_, adapters)) => adapters.clone(),
            None => return Err(DeviceError::NoAdapter),
        };

        loop {
            if let Some(peripheral) = BtleplugTransport::find_in_adapters(&adapters, address).await {
                return Ok(Arc::new(peripheral));
            }

            debug!("No peripherals matched {}", address);
            sleep(Duration::from_millis(SCAN_POLL_DELAY)).await;
        }
    }
}
