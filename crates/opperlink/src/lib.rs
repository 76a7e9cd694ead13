//! Protocol engine for OPPER kitchen scales over Bluetooth Low Energy.
//!
//! The scale speaks a line-oriented attribute-command protocol
//! (`ATT+<TAG>=<values>\r\n`) carried in GATT notifications and writes.
//!
//! # Crate Structure
//!
//! - [`transport`]: BLE collaborator contract, GATT identifiers, in-memory transport
//! - [`frame`]: Attribute codec, grammar validation and line reassembly
//! - [`device`]: Connection supervision, command streams, acknowledged commands (behind `device` feature)

/// Re-export transport types.
pub mod transport {
    pub use opperlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use opperlink_frame::*;
}

/// Re-export engine types (requires `device` feature).
#[cfg(feature = "device")]
pub mod device {
    pub use opperlink_device::*;
}
