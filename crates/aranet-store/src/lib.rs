//! Local SQLite persistence for Aranet4 measurements.
//!
//! A single `measurements` table keyed by `(device_id, timestamp)`, so
//! re-downloading an overlapping slice of device memory never duplicates rows.
//!
//! ```
//! use aranet_store::Store;
//! use aranet_types::Measurement;
//! use time::macros::datetime;
//!
//! let mut store = Store::open_in_memory()?;
//! let m = Measurement {
//!     device_id: "office".into(),
//!     timestamp: datetime!(2024-01-01 09:00 UTC),
//!     co2: 640,
//!     temperature: 21.0,
//!     humidity: 40,
//!     pressure: 1008.0,
//! };
//! assert_eq!(store.insert_many(&[m.clone(), m])?, 1);
//! assert_eq!(store.query_recent(10)?.len(), 1);
//! # Ok::<(), aranet_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{DatabaseStats, DeviceCount};
pub use queries::MeasurementQuery;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/aranet4-mcp/aranet4.db`
/// - macOS: `~/Library/Application Support/aranet4-mcp/aranet4.db`
/// - Windows: `C:\Users\<user>\AppData\Local\aranet4-mcp\aranet4.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("aranet4-mcp")
        .join("aranet4.db")
}
