//! Error types for data parsing in aranet-types.

use thiserror::Error;

/// Errors that can occur when parsing Aranet4 data or user-facing values.
///
/// BLE transport errors live in aranet-core.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// The payload is shorter than the format requires.
    #[error("payload requires {expected} bytes, got {actual}")]
    InsufficientBytes { expected: usize, actual: usize },

    /// A sensor name that is not one of the known measurement channels.
    #[error("unknown sensor '{0}', expected one of: temperature, humidity, pressure, co2")]
    UnknownSensor(String),

    /// The sensor list was empty after trimming.
    #[error("no sensors selected")]
    EmptySensorList,
}

/// Result type alias using aranet-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
