//! MCP server for Aranet4 CO2 sensors.
//!
//! Lets an AI assistant download the history kept in an Aranet4's memory
//! into a local SQLite database and ask questions about it.
//!
//! # Tools
//!
//! - `scan_devices` - nearby sensors with their current reading
//! - `fetch_new_data` - download records newer than the newest stored one
//! - `get_recent` - summary of the last n measurements
//! - `get_on_date` - summary of one calendar day
//! - `get_data_by_timerange` - table of selected sensors over a range
//! - `plot` - per-sensor charts as a PNG image
//! - `configure` - choose the sensor and the database file
//! - `get_configuration_and_db_stats` - current settings and database contents
//!
//! # Configuration
//!
//! Read from `~/.config/aranet4-mcp/config.toml` (see [`config`]), with
//! `DEVICE_MAC`, `DEVICE_NAME`, `DB_PATH` and `USE_LOCAL_TZ` overriding it.

pub mod config;
pub mod error;
pub mod format;
pub mod plot;
pub mod report;
pub mod server;

pub use config::{Config, ConfigError, ValidationError, default_config_path};
pub use error::{ToolError, ToolResult};
pub use format::Zone;
pub use server::Aranet4Server;
