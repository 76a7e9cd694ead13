/// Platform code reported when a connection to the device already exists.
pub const CODE_ALREADY_CONNECTED: i32 = -1;

/// Platform code reported when the link could not be established.
pub const CODE_CONNECTION_FAILED: i32 = 10003;

/// Errors reported by a BLE transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The device is already connected. Callers treat this as success.
    #[error("device already connected")]
    AlreadyConnected,

    /// The link could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The operation requires a live connection.
    #[error("device not connected")]
    NotConnected,

    /// The platform binding does not support this operation.
    #[error("operation not supported by transport: {0}")]
    Unsupported(&'static str),

    /// The service or characteristic is not present on the device.
    #[error("gatt attribute not found: {0}")]
    NotFound(String),

    /// Any other platform-reported failure.
    #[error("transport rejected request (code {code}): {message}")]
    Rejected { code: i32, message: String },
}

impl TransportError {
    /// Classify a numeric platform error code.
    pub fn from_platform_code(code: i32, message: impl Into<String>) -> Self {
        match code {
            CODE_ALREADY_CONNECTED => Self::AlreadyConnected,
            CODE_CONNECTION_FAILED => Self::ConnectionFailed(message.into()),
            _ => Self::Rejected {
                code,
                message: message.into(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
