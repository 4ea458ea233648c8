//! Tool failures reported back to the assistant.
//!
//! Every variant becomes an error result of the tool call; none of them stops
//! the server.

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum ToolError {
    /// No configuration yet; the assistant should call `configure`.
    #[error(
        "No sensor configured. Run `scan_devices` to find the Aranet4, then `configure` with its MAC address and a name."
    )]
    ConfigMissing,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "Could not reach the sensor: {0}. Is the Aranet4 nearby? Enabling extended Bluetooth range on the device may help."
    )]
    DeviceUnreachable(String),

    #[error(
        "The sensor is busy: {0}. Another client may be connected to it; try again in a moment."
    )]
    DeviceBusy(String),

    /// The store has no rows for the requested window.
    #[error("No data found {0}")]
    NoData(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Database error: {0}")]
    Store(#[from] aranet_store::Error),

    #[error("Failed to render plot: {0}")]
    Render(String),
}

impl From<aranet_core::Error> for ToolError {
    fn from(err: aranet_core::Error) -> Self {
        if err.is_busy() {
            ToolError::DeviceBusy(err.to_string())
        } else {
            // Protocol errors also mean the exchange with the device failed.
            ToolError::DeviceUnreachable(err.to_string())
        }
    }
}

impl From<ConfigError> for ToolError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Missing(_) => ToolError::ConfigMissing,
            other => ToolError::InvalidConfig(other.to_string()),
        }
    }
}

impl From<aranet_types::ParseError> for ToolError {
    fn from(err: aranet_types::ParseError) -> Self {
        ToolError::InvalidArguments(err.to_string())
    }
}

pub type ToolResult<T> = std::result::Result<T, ToolError>;
