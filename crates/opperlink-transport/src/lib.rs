//! Bluetooth Low Energy transport contract.
//!
//! The engine never talks to a Bluetooth stack directly. Platform bindings
//! implement [`BleTransport`] and the engine consumes it:
//! - inbound characteristic notifications and connection-state changes as
//!   multicast channels
//! - connect/disconnect, discovery, characteristic read/write/notify
//! - transfer-unit (ATT MTU) query and negotiation
//!
//! This is the lowest layer of opperlink. [`MemoryTransport`] is an
//! in-process implementation for tests and offline tooling.

pub mod device;
pub mod error;
pub mod memory;
pub mod traits;
pub mod uuids;

pub use device::{is_opper_device, BleDevice};
pub use error::{Result, TransportError};
pub use memory::MemoryTransport;
pub use traits::{
    uuid_eq, BleTransport, Characteristic, CharacteristicProperties, CharacteristicValue, Service,
};
pub use uuids::{
    DeviceInfoField, ADVERTISE_SERVICE_UUID, DEVICE_INFO_SERVICE_UUID,
    GENERIC_ACCESS_SERVICE_UUID, NOTIFY_CHARACTERISTIC_UUID, WRITE_CHARACTERISTIC_UUID,
};
