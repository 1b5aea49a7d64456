use std::array::TryFromSliceError;
use std::io;
use thiserror::Error;

/// The primary error type for the `worksafe` library.
#[derive(Error, Debug)]
pub enum WsError {
    #[error("Radio transceiver initialization failed: {0}")]
    RadioInit(String),

    #[error("Radio transmit failed: {0}")]
    Transmit(String),

    #[error("Timed out waiting for radio")]
    ReceiveTimeout,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Unknown packet type: {0}")]
    UnknownPacketType(u8),

    #[error("Invalid fall state: {0}")]
    InvalidFallState(u8),

    #[error("Insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Schema {schema}: field `{field}` {message}")]
    Field {
        schema: &'static str,
        field: &'static str,
        message: String,
    },
}

impl From<TryFromSliceError> for WsError {
    fn from(_: TryFromSliceError) -> Self {
        WsError::InvalidPacket("Failed to convert slice to array".to_string())
    }
}
