use thiserror::Error;

/// Errors raised by a BLE transport adapter.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peripheral is not connected")]
    NotConnected,

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(String),

    #[error("BLE transport error: {0}")]
    Ble(String),

    #[cfg(feature = "btleplug-transport")]
    #[error(transparent)]
    Btleplug(#[from] btleplug::Error),
}

/// Errors produced while encoding frames or decoding lamp notifications.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("{field} = {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Status byte of a notification was not zero. Not a failure: the queue keeps waiting.
    #[error("notification rejected with status {status:#04x}")]
    NotificationMismatch { status: u8 },

    #[error("notification too short ({len} bytes)")]
    Truncated { len: usize },
}

/// Errors surfaced by the BLE lamp link.
#[derive(Debug, Error)]
pub enum LampError {
    /// The lamp service was not found after discovery.
    #[error("lamp service missing after discovery")]
    ServiceMissing,

    /// Connect or discovery failed, or the link dropped while draining.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A single frame could not be written. Absorbed by the queue.
    #[error("write failed: {0}")]
    WriteFailed(#[source] TransportError),

    #[error("unknown lamp {0}")]
    InvalidDevice(String),

    #[error("invalid lamp configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl LampError {
    /// Whether the command queue schedules another drain for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceMissing | Self::ConnectionFailed(_))
    }
}

impl From<TransportError> for LampError {
    fn from(err: TransportError) -> Self {
        Self::ConnectionFailed(err.to_string())
    }
}

/// Errors from the cloud REST API. Never retried.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("cloud request timed out")]
    RequestTimeout,

    #[error("cloud request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("invalid cloud response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for CloudError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::RequestTimeout
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Request(err)
        }
    }
}
