use std::time::Duration;

use opperlink_frame::Attribute;

/// Errors that can occur while talking to a scale.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] opperlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] opperlink_frame::FrameError),

    /// The device acknowledged the command with a failure code.
    #[error("device rejected {attribute} (ack {ack})")]
    Rejected { attribute: Attribute, ack: String },

    /// No acknowledgement arrived in time.
    #[error("no acknowledgement for {attribute} within {timeout:?}")]
    AckTimeout {
        attribute: Attribute,
        timeout: Duration,
    },

    /// No sample value arrived in time.
    #[error("no sample value within {0:?}")]
    SampleTimeout(Duration),

    /// The operation needs a connected scale.
    #[error("scale not connected")]
    NotConnected,

    /// The connection went away while the operation was waiting.
    #[error("connection closed: {0}")]
    Disconnected(String),

    /// A required GATT characteristic is not exposed by the device.
    #[error("required characteristic {0} not found")]
    MissingCharacteristic(String),
}

impl DeviceError {
    /// Whether a failed command should be sent again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rejected { .. } | Self::AckTimeout { .. } => true,
            Self::Transport(err) => !matches!(err, opperlink_transport::TransportError::NotConnected),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;
