//! Protocol engine for OPPER kitchen scales.
//!
//! [`Scale`] supervises one BLE connection: it discovers the GATT layout,
//! negotiates the transfer unit, pumps notifications through the frame
//! layer into a [`CommandStream`], and sends acknowledged commands.

pub mod config;
mod emitter;
pub mod error;
pub mod negotiate;
pub mod parser;
pub mod stream;
pub mod supervisor;

pub use config::{ScaleConfig, DEFAULT_STABILITY_WINDOW, DEFAULT_TRANSFER_UNIT, LOW_BATTERY};
pub use error::{DeviceError, Result};
pub use negotiate::{chunk_len, negotiate, PayloadSize};
pub use parser::{DefaultWeightParser, Stability, StabilityWindow, WeightParser};
pub use stream::{
    Battery, CommandStream, CommandSubscription, DeviceEvent, EventSubscription,
    WeightSubscription, WindowedWeightSubscription,
};
pub use supervisor::{ConnectionState, Scale};
