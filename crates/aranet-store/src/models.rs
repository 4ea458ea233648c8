//! Aggregate views over stored measurements.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Row count for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCount {
    pub device_id: String,
    pub count: u64,
}

/// Overall contents of the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub total_measurements: u64,
    /// Oldest stored timestamp, `None` on an empty store.
    #[serde(with = "time::serde::rfc3339::option")]
    pub first_timestamp: Option<OffsetDateTime>,
    /// Newest stored timestamp.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_timestamp: Option<OffsetDateTime>,
    pub devices: Vec<DeviceCount>,
}

impl DatabaseStats {
    pub fn is_empty(&self) -> bool {
        self.total_measurements == 0
    }
}
