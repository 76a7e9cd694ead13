use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::error::Result;

/// A notification (or read result) delivered by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicValue {
    /// Service UUID the characteristic belongs to.
    pub service_id: String,
    /// Characteristic UUID.
    pub characteristic_id: String,
    /// Latest characteristic value.
    pub value: Bytes,
}

impl CharacteristicValue {
    /// Create a new characteristic value event.
    pub fn new(
        service_id: impl Into<String>,
        characteristic_id: impl Into<String>,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            characteristic_id: characteristic_id.into(),
            value: value.into(),
        }
    }

    /// Returns true if this value came from the given service/characteristic pair.
    pub fn is_from(&self, service_id: &str, characteristic_id: &str) -> bool {
        uuid_eq(&self.service_id, service_id) && uuid_eq(&self.characteristic_id, characteristic_id)
    }
}

/// A discovered GATT service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub uuid: String,
    pub is_primary: bool,
}

/// Operations supported by a characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

/// A discovered GATT characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: String,
    pub properties: CharacteristicProperties,
}

/// Compare two UUID strings ignoring ASCII case.
///
/// Platforms disagree on UUID casing, so every comparison goes through here.
pub fn uuid_eq(left: &str, right: &str) -> bool {
    left.eq_ignore_ascii_case(right)
}

/// The transport collaborator consumed by the engine.
///
/// Implementations wrap one physical device. Inbound traffic is exposed as
/// multicast channels; every other operation completes asynchronously.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Platform identifier of the device.
    fn id(&self) -> &str;

    /// Subscribe to characteristic-value-change events.
    fn subscribe_values(&self) -> broadcast::Receiver<CharacteristicValue>;

    /// Subscribe to connection-state changes (`true` = connected).
    fn subscribe_connection(&self) -> broadcast::Receiver<bool>;

    /// Establish the link.
    async fn connect(&self) -> Result<()>;

    /// Close the link.
    async fn disconnect(&self) -> Result<()>;

    /// List services of the connected device.
    async fn services(&self) -> Result<Vec<Service>>;

    /// List characteristics of a service.
    async fn characteristics(&self, service_id: &str) -> Result<Vec<Characteristic>>;

    /// Read a characteristic value.
    async fn read_characteristic_value(
        &self,
        service_id: &str,
        characteristic_id: &str,
    ) -> Result<Bytes>;

    /// Write a single value to a characteristic.
    async fn write_characteristic_value(
        &self,
        value: Bytes,
        service_id: &str,
        characteristic_id: &str,
    ) -> Result<()>;

    /// Enable notifications on a characteristic.
    async fn start_notifications(&self, service_id: &str, characteristic_id: &str) -> Result<()>;

    /// Disable notifications on a characteristic.
    async fn stop_notifications(&self, service_id: &str, characteristic_id: &str) -> Result<()>;

    /// Current transfer unit (ATT MTU) reported by the platform.
    async fn transfer_unit(&self) -> Result<u16>;

    /// Request a transfer unit. Returns the value the platform settled on.
    async fn set_transfer_unit(&self, value: u16) -> Result<u16>;

    /// Write `payload` split into chunks of at most `chunk_len` bytes.
    ///
    /// Chunks are written strictly in order; each write completes before the
    /// next one starts.
    async fn write_in_chunks(
        &self,
        payload: &[u8],
        chunk_len: usize,
        service_id: &str,
        characteristic_id: &str,
    ) -> Result<()> {
        for chunk in payload.chunks(chunk_len.max(1)) {
            self.write_characteristic_value(
                Bytes::copy_from_slice(chunk),
                service_id,
                characteristic_id,
            )
            .await?;
        }
        Ok(())
    }
}
