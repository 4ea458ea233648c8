//! BLE access to the Aranet4 CO2 sensor.
//!
//! This crate finds Aranet devices over Bluetooth Low Energy and downloads
//! the measurement history kept in their memory.
//!
//! # Features
//!
//! - **Device discovery**: Scan for nearby Aranet devices, including the
//!   reading broadcast when Smart Home integration is enabled
//! - **Historical data**: Download only the records newer than a given time
//! - **Sensor link**: [`SensorLink`] abstracts the radio so callers can be
//!   tested against [`MockLink`]
//!
//! # Platform Differences
//!
//! - **macOS**: Devices are identified by a UUID assigned by CoreBluetooth.
//!   It is stable for a given device on a given Mac but is not the MAC
//!   address.
//! - **Linux/Windows**: Devices are identified by their Bluetooth MAC address
//!   (e.g., `AA:BB:CC:DD:EE:FF`).
//!
//! [`Device::address()`] and [`DiscoveredDevice::identifier`] return the
//! appropriate identifier for the platform.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use aranet_core::{BleLink, SensorLink};
//!
//! #[tokio::main]
//! async fn main() -> aranet_core::Result<()> {
//!     let link = BleLink::default();
//!     for device in link.scan(Duration::from_secs(5)).await? {
//!         println!("{:?} {}", device.name, device.identifier);
//!     }
//!
//!     let records = link
//!         .fetch_history("AA:BB:CC:DD:EE:FF", None, Duration::from_secs(120))
//!         .await?;
//!     println!("{} records", records.len());
//!     Ok(())
//! }
//! ```

pub mod advertisement;
pub mod device;
pub mod error;
pub mod history;
pub mod mock;
pub mod scan;
pub mod traits;
pub mod util;

pub use aranet_types::types;
pub use aranet_types::uuid as uuids;

pub use advertisement::{Advertisement, parse_advertisement};
pub use device::{ConnectionConfig, Device};
pub use error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
pub use history::{HISTORY_V2_REQUEST, HistoryInfo, HistoryOptions, HistoryParam};
pub use mock::{MockFailure, MockLink};
pub use scan::{DEFAULT_SCAN_DURATION, DiscoveredDevice, find_device, scan};
pub use traits::{BleLink, SensorLink, retain_valid};
pub use util::{create_identifier, format_peripheral_id, identifier_matches};

pub use aranet_types::{CurrentReading, DeviceType, HistoryRecord, Status};
