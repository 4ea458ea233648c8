//! Trait abstractions for the sensor link.
//!
//! [`SensorLink`] is what the server talks to: [`BleLink`] drives real
//! hardware through btleplug, [`MockLink`](crate::mock::MockLink) serves
//! canned data in tests.

use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use aranet_types::HistoryRecord;

use crate::device::{ConnectionConfig, Device};
use crate::error::{Error, Result};
use crate::history::HistoryOptions;
use crate::scan::{self, DiscoveredDevice};

/// Radio operations needed to discover a sensor and pull its history.
///
/// Implementations never retry; a failure is reported to the caller once.
///
/// # Example
///
/// ```ignore
/// use aranet_core::{SensorLink, Result};
///
/// async fn count_nearby<L: SensorLink>(link: &L) -> Result<usize> {
///     Ok(link.scan(std::time::Duration::from_secs(5)).await?.len())
/// }
/// ```
#[async_trait]
pub trait SensorLink: Send + Sync {
    /// Aranet devices heard within `timeout`. An empty list is not an error.
    async fn scan(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>>;

    /// Every valid record newer than `since`, oldest first, or the whole
    /// device memory when `since` is `None`.
    ///
    /// The whole exchange, connection included, is bounded by `timeout`.
    async fn fetch_history(
        &self,
        identifier: &str,
        since: Option<OffsetDateTime>,
        timeout: Duration,
    ) -> Result<Vec<HistoryRecord>>;
}

/// Drop samples the sensor flagged as invalid (CO2 warm-up).
pub fn retain_valid(records: &mut Vec<HistoryRecord>) {
    let before = records.len();
    records.retain(HistoryRecord::has_valid_co2);
    if records.len() != before {
        debug!("Dropped {} invalid samples", before - records.len());
    }
}

/// [`SensorLink`] over the local Bluetooth adapter.
#[derive(Debug, Clone, Default)]
pub struct BleLink {
    config: ConnectionConfig,
    history: HistoryOptions,
}

impl BleLink {
    pub fn new(config: ConnectionConfig, history: HistoryOptions) -> Self {
        Self { config, history }
    }
}

#[async_trait]
impl SensorLink for BleLink {
    async fn scan(&self, duration: Duration) -> Result<Vec<DiscoveredDevice>> {
        scan::scan(duration).await
    }

    async fn fetch_history(
        &self,
        identifier: &str,
        since: Option<OffsetDateTime>,
        limit: Duration,
    ) -> Result<Vec<HistoryRecord>> {
        let deadline = Instant::now() + limit;

        let device = timeout(limit, Device::connect(identifier, self.config.clone()))
            .await
            .map_err(|_| Error::timeout("connect to device", limit))??;

        let remaining = deadline.saturating_duration_since(Instant::now());
        let outcome = timeout(remaining, device.download_history_since(since, &self.history)).await;

        if let Err(e) = device.disconnect().await {
            warn!("Failed to disconnect from {}: {}", device.address(), e);
        }

        let mut records = outcome.map_err(|_| Error::timeout("download history", limit))??;
        retain_valid(&mut records);
        Ok(records)
    }
}
