//! Error types for aranet-core.
//!
//! Callers that only need to tell the user what went wrong can use the two
//! classifiers:
//!
//! | Classifier | Variants |
//! |------------|----------|
//! | [`Error::is_unreachable`] | no adapter, device not found, timeouts, lost link, out of range |
//! | [`Error::is_busy`] | connection rejected, already connected elsewhere, stack reports "in progress"/"busy" |
//!
//! Nothing in this crate retries; a failed operation is reported once.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when communicating with an Aranet4.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Device not found during scan or connection.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// Operation attempted while not connected to device.
    #[error("Not connected to device")]
    NotConnected,

    /// Required BLE characteristic not found on device.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound { uuid: String, service_count: usize },

    /// Failed to parse data received from device.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// Connection failed with specific reason.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        device_id: Option<String>,
        reason: ConnectionFailureReason,
    },
}

/// Structured reasons for connection failures.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// Device is out of range.
    OutOfRange,
    /// Device rejected the connection.
    Rejected,
    /// Already connected to another central.
    AlreadyConnected,
    /// Generic BLE error.
    BleError(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange => write!(f, "device out of range"),
            Self::Rejected => write!(f, "connection rejected by device"),
            Self::AlreadyConnected => write!(f, "device already connected"),
            Self::BleError(msg) => write!(f, "BLE error: {}", msg),
        }
    }
}

/// Reason why a device was not found.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// Device with specified name/address not found.
    NotFound { identifier: String },
    /// No Bluetooth adapter available.
    NoAdapter,
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { identifier } => write!(f, "device '{}' not found", identifier),
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
        }
    }
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::NotFound {
            identifier: identifier.into(),
        })
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, service_count: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            service_count,
        }
    }

    /// Create a connection failure with structured reason.
    pub fn connection_failed(device_id: Option<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed { device_id, reason }
    }

    /// The device could not be reached over the radio link.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Error::DeviceNotFound(_) | Error::NotConnected | Error::Timeout { .. } => true,
            Error::ConnectionFailed { reason, .. } => matches!(
                reason,
                ConnectionFailureReason::OutOfRange | ConnectionFailureReason::BleError(_)
            ),
            Error::Bluetooth(e) => !bluetooth_busy(e),
            _ => false,
        }
    }

    /// The device refused the connection because it is serving someone else.
    pub fn is_busy(&self) -> bool {
        match self {
            Error::ConnectionFailed { reason, .. } => matches!(
                reason,
                ConnectionFailureReason::Rejected | ConnectionFailureReason::AlreadyConnected
            ),
            Error::Bluetooth(e) => bluetooth_busy(e),
            _ => false,
        }
    }
}

/// BlueZ and CoreBluetooth only expose "device busy" through the message text.
fn bluetooth_busy(err: &btleplug::Error) -> bool {
    message_indicates_busy(&err.to_string())
}

pub(crate) fn message_indicates_busy(message: &str) -> bool {
    let message = message.to_lowercase();
    ["in progress", "busy", "already connected", "inprogress"]
        .iter()
        .any(|needle| message.contains(needle))
}

impl From<aranet_types::ParseError> for Error {
    fn from(err: aranet_types::ParseError) -> Self {
        Error::InvalidData(err.to_string())
    }
}

/// Result type alias using aranet-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
