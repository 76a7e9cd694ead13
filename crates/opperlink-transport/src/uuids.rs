//! GATT identifiers used by OPPER scales.

/// Generic access service.
pub const GENERIC_ACCESS_SERVICE_UUID: &str = "00001800-0000-1000-8000-00805F9B34FB";

/// Device name characteristic of the generic access service.
pub const DEVICE_NAME_CHARACTERISTIC_UUID: &str = "00002A00-0000-1000-8000-00805F9B34FB";

/// Device information service.
pub const DEVICE_INFO_SERVICE_UUID: &str = "0000180A-0000-1000-8000-00805F9B34FB";

/// Advertised service carrying the attribute-command protocol.
pub const ADVERTISE_SERVICE_UUID: &str = "0000FFE0-0000-1000-8000-00805F9B34FB";

/// Outbound (host → device) characteristic.
pub const WRITE_CHARACTERISTIC_UUID: &str = "0000FFE3-0000-1000-8000-00805F9B34FB";

/// Inbound (device → host) notify characteristic.
pub const NOTIFY_CHARACTERISTIC_UUID: &str = "0000FFE4-0000-1000-8000-00805F9B34FB";

/// Readable fields of the device information service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceInfoField {
    ModelNumber,
    SerialNumber,
    FirmwareRevision,
    HardwareRevision,
    SoftwareRevision,
    ManufacturerName,
}

impl DeviceInfoField {
    /// All fields, in characteristic order.
    pub const ALL: [DeviceInfoField; 6] = [
        Self::ModelNumber,
        Self::SerialNumber,
        Self::FirmwareRevision,
        Self::HardwareRevision,
        Self::SoftwareRevision,
        Self::ManufacturerName,
    ];

    /// Characteristic UUID for this field.
    pub fn characteristic_uuid(self) -> &'static str {
        match self {
            Self::ModelNumber => "00002A24-0000-1000-8000-00805F9B34FB",
            Self::SerialNumber => "00002A25-0000-1000-8000-00805F9B34FB",
            Self::FirmwareRevision => "00002A26-0000-1000-8000-00805F9B34FB",
            Self::HardwareRevision => "00002A27-0000-1000-8000-00805F9B34FB",
            Self::SoftwareRevision => "00002A28-0000-1000-8000-00805F9B34FB",
            Self::ManufacturerName => "00002A29-0000-1000-8000-00805F9B34FB",
        }
    }

    /// Human-readable field name.
    pub fn name(self) -> &'static str {
        match self {
            Self::ModelNumber => "model_number",
            Self::SerialNumber => "serial_number",
            Self::FirmwareRevision => "firmware_revision",
            Self::HardwareRevision => "hardware_revision",
            Self::SoftwareRevision => "software_revision",
            Self::ManufacturerName => "manufacturer_name",
        }
    }
}
