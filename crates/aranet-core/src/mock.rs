//! Mock sensor link for testing.
//!
//! [`MockLink`] implements [`SensorLink`] without touching Bluetooth, so the
//! server can be exercised end to end in unit tests.
//!
//! # Features
//!
//! - **Canned devices**: register sensors with their stored history
//! - **Failure injection**: make the next calls fail as unreachable, busy or timed out
//! - **Latency simulation**: delay fetches to exercise the caller's timeout

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use aranet_types::{CurrentReading, DeviceType, HistoryRecord};

use crate::error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
use crate::scan::DiscoveredDevice;
use crate::traits::{SensorLink, retain_valid};
use crate::util::identifier_matches;

/// Failure a [`MockLink`] reports instead of answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// No adapter for scans, device not found for fetches.
    Unreachable,
    /// The sensor is connected to another central.
    Busy,
    /// The link hangs until the caller's timeout expires.
    Timeout,
}

/// A mock sensor link for testing.
///
/// ```
/// use std::time::Duration;
/// use aranet_core::{MockLink, SensorLink};
///
/// #[tokio::main]
/// async fn main() {
///     let link = MockLink::new();
///     let mac = link.add_device("Aranet4 1A2B3", Vec::new()).await;
///
///     let found = link.scan(Duration::from_secs(1)).await.unwrap();
///     assert_eq!(found[0].identifier, mac);
/// }
/// ```
pub struct MockLink {
    devices: RwLock<Vec<DiscoveredDevice>>,
    history: RwLock<HashMap<String, Vec<HistoryRecord>>>,
    failure: RwLock<Option<MockFailure>>,
    /// Number of calls to fail before answering again (0 = use `failure` forever).
    remaining_failures: AtomicU32,
    /// Simulated fetch latency in milliseconds (0 = no delay).
    fetch_latency_ms: AtomicU64,
    scan_count: AtomicU32,
    fetch_count: AtomicU32,
    last_since: RwLock<Option<Option<OffsetDateTime>>>,
}

impl std::fmt::Debug for MockLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLink")
            .field("scan_count", &self.scan_count.load(Ordering::Relaxed))
            .field("fetch_count", &self.fetch_count.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLink {
    /// Create a link with no devices in range.
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(Vec::new()),
            history: RwLock::new(HashMap::new()),
            failure: RwLock::new(None),
            remaining_failures: AtomicU32::new(0),
            fetch_latency_ms: AtomicU64::new(0),
            scan_count: AtomicU32::new(0),
            fetch_count: AtomicU32::new(0),
            last_since: RwLock::new(None),
        }
    }

    /// Register a sensor under a random MAC address and return the address.
    pub async fn add_device(&self, name: &str, history: Vec<HistoryRecord>) -> String {
        let n = rand::random::<u32>() & 0xFF_FFFF;
        let address = format!(
            "D0:2E:AB:{:02X}:{:02X}:{:02X}",
            (n >> 16) & 0xFF,
            (n >> 8) & 0xFF,
            n & 0xFF
        );
        self.add_device_at(name, &address, history).await;
        address
    }

    /// Register a sensor under a fixed address.
    pub async fn add_device_at(&self, name: &str, address: &str, history: Vec<HistoryRecord>) {
        self.devices.write().await.push(DiscoveredDevice {
            name: Some(name.to_string()),
            identifier: address.to_string(),
            rssi: Some(-60),
            device_type: DeviceType::from_name(name),
            reading: None,
        });
        self.history
            .write()
            .await
            .insert(address.to_string(), history);
    }

    /// Set the reading a device advertises in scans.
    pub async fn set_reading(&self, address: &str, reading: CurrentReading) {
        if let Some(device) = self
            .devices
            .write()
            .await
            .iter_mut()
            .find(|d| d.identifier == address)
        {
            device.reading = Some(reading);
        }
    }

    /// Append freshly logged records to a device's memory.
    pub async fn push_history(&self, address: &str, records: Vec<HistoryRecord>) {
        self.history
            .write()
            .await
            .entry(address.to_string())
            .or_default()
            .extend(records);
    }

    /// Fail every call with `failure` until cleared with `None`.
    pub async fn set_failure(&self, failure: Option<MockFailure>) {
        *self.failure.write().await = failure;
        self.remaining_failures.store(0, Ordering::Relaxed);
    }

    /// Fail only the next `count` calls.
    pub async fn set_transient_failure(&self, failure: MockFailure, count: u32) {
        *self.failure.write().await = Some(failure);
        self.remaining_failures.store(count, Ordering::Relaxed);
    }

    pub fn set_fetch_latency(&self, latency: Duration) {
        self.fetch_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn scan_count(&self) -> u32 {
        self.scan_count.load(Ordering::Relaxed)
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    /// The `since` argument of the most recent fetch, if any fetch happened.
    pub async fn last_since(&self) -> Option<Option<OffsetDateTime>> {
        *self.last_since.read().await
    }

    async fn take_failure(&self) -> Option<MockFailure> {
        let mut failure = self.failure.write().await;
        let current = (*failure)?;
        let remaining = self.remaining_failures.load(Ordering::Relaxed);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::Relaxed);
            if remaining == 1 {
                *failure = None;
            }
        }
        Some(current)
    }

    async fn find_address(&self, identifier: &str) -> Option<String> {
        self.devices
            .read()
            .await
            .iter()
            .find(|d| {
                identifier_matches(identifier, &d.identifier, &d.identifier, d.name.as_deref())
            })
            .map(|d| d.identifier.clone())
    }
}

#[async_trait]
impl SensorLink for MockLink {
    async fn scan(&self, duration: Duration) -> Result<Vec<DiscoveredDevice>> {
        self.scan_count.fetch_add(1, Ordering::Relaxed);
        match self.take_failure().await {
            Some(MockFailure::Unreachable) => {
                return Err(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter));
            }
            Some(MockFailure::Timeout) => {
                tokio::time::sleep(duration).await;
                return Err(Error::timeout("scan", duration));
            }
            Some(MockFailure::Busy) | None => {}
        }
        Ok(self.devices.read().await.clone())
    }

    async fn fetch_history(
        &self,
        identifier: &str,
        since: Option<OffsetDateTime>,
        limit: Duration,
    ) -> Result<Vec<HistoryRecord>> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        *self.last_since.write().await = Some(since);

        let latency = Duration::from_millis(self.fetch_latency_ms.load(Ordering::Relaxed));
        if latency > limit {
            tokio::time::sleep(limit).await;
            return Err(Error::timeout("download history", limit));
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match self.take_failure().await {
            Some(MockFailure::Unreachable) => return Err(Error::device_not_found(identifier)),
            Some(MockFailure::Busy) => {
                return Err(Error::connection_failed(
                    Some(identifier.to_string()),
                    ConnectionFailureReason::AlreadyConnected,
                ));
            }
            Some(MockFailure::Timeout) => {
                tokio::time::sleep(limit).await;
                return Err(Error::timeout("connect to device", limit));
            }
            None => {}
        }

        let Some(address) = self.find_address(identifier).await else {
            return Err(Error::device_not_found(identifier));
        };

        let mut records: Vec<HistoryRecord> = self
            .history
            .read()
            .await
            .get(&address)
            .map(|h| {
                h.iter()
                    .filter(|r| since.is_none_or(|s| r.timestamp > s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by_key(|r| r.timestamp);
        retain_valid(&mut records);
        Ok(records)
    }
}
