//! The seam between the connection manager and the bluetooth stack.
//!
//! The real implementation lives in [`crate::device::btle`]; tests drive the manager through
//! an in-memory double instead. btleplug's plain data types are used on both sides.

use std::pin::Pin;
use std::sync::Arc;
use async_trait::async_trait;
use btleplug::api::{Characteristic, Service, ValueNotification, WriteType};
use futures::Stream;

use crate::device::types::DeviceAddress;
use crate::error::DeviceError;

pub type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// A connectable peripheral, as returned by [`BleTransport::find_peripheral`].
#[async_trait]
pub trait BlePeripheral: Send + Sync {
    /// Human readable identifier for log messages.
    fn id(&self) -> String;

    /// Name from the advertisement, if the device sent one.
    async fn local_name(&self) -> Result<Option<String>, DeviceError>;

    async fn is_connected(&self) -> Result<bool, DeviceError>;

    async fn connect(&self) -> Result<(), DeviceError>;

    async fn disconnect(&self) -> Result<(), DeviceError>;

    /// Runs service discovery and returns every service with its characteristics.
    async fn discover_services(&self) -> Result<Vec<Service>, DeviceError>;

    async fn write(&self, characteristic: &Characteristic, data: &[u8], write_type: WriteType) -> Result<(), DeviceError>;

    async fn subscribe(&self, characteristic: &Characteristic) -> Result<(), DeviceError>;

    /// Notifications of all subscribed characteristics of this peripheral.
    async fn notifications(&self) -> Result<NotificationStream, DeviceError>;
}

/// The radio: adapter readiness and scanning.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Resolves once the adapter is powered on and scanning. Returns immediately if it already is.
    async fn wait_ready(&self) -> Result<(), DeviceError>;

    /// Resolves with the first discovered peripheral whose address matches.
    async fn find_peripheral(&self, address: &DeviceAddress) -> Result<Arc<dyn BlePeripheral>, DeviceError>;
}
