//! Historical data download.
//!
//! The Aranet4 keeps a ring buffer of samples taken every `interval`
//! seconds. Each sensor is downloaded separately with the V2 protocol:
//! write `[0x61, param, idx_lo, idx_hi]` to the command characteristic, then
//! read the history characteristic.
//!
//! # Index Convention
//!
//! **All history indices are 1-based**, following the device protocol:
//! - Index 1 = oldest reading
//! - Index N = newest reading (where N = total_readings)
//!
//! # V2 response layout
//!
//! | Offset | Content |
//! |--------|---------|
//! | 0 | parameter |
//! | 1-2 | interval in seconds |
//! | 3-4 | total readings |
//! | 5-6 | seconds since the last reading |
//! | 7-8 | index of the first value |
//! | 9 | number of values |
//! | 10+ | values, one byte for humidity and u16 LE otherwise |

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Buf;
use time::OffsetDateTime;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use aranet_types::HistoryRecord;

use crate::device::Device;
use crate::error::{Error, Result};
use crate::uuids::{COMMAND, HISTORY_V2, READ_INTERVAL, SECONDS_SINCE_UPDATE, TOTAL_READINGS};

/// Command byte requesting a V2 history chunk.
pub const HISTORY_V2_REQUEST: u8 = 0x61;

const V2_HEADER_LEN: usize = 10;

/// Responses for another parameter tolerated before the download is
/// abandoned. The device answers stale chunks while it catches up.
const MAX_PARAM_MISMATCHES: u32 = 5;

/// Parameter identifiers for history requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HistoryParam {
    Temperature = 1,
    Humidity = 2,
    Pressure = 3,
    Co2 = 4,
}

impl HistoryParam {
    /// Order in which the sensors are downloaded.
    pub const ALL: [HistoryParam; 4] = [
        HistoryParam::Co2,
        HistoryParam::Temperature,
        HistoryParam::Pressure,
        HistoryParam::Humidity,
    ];

    fn value_size(self) -> usize {
        match self {
            HistoryParam::Humidity => 1,
            _ => 2,
        }
    }
}

/// Options for downloading history.
#[derive(Debug, Clone)]
pub struct HistoryOptions {
    /// Delay between the request write and the response read.
    pub read_delay: Duration,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            read_delay: Duration::from_millis(50),
        }
    }
}

impl HistoryOptions {
    #[must_use]
    pub fn read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }
}

/// Information about the stored history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryInfo {
    /// Number of readings stored on the device.
    pub total_readings: u16,
    /// Logging interval in seconds.
    pub interval_seconds: u16,
    /// Seconds since the last reading.
    pub seconds_since_update: u16,
}

impl HistoryInfo {
    /// When the newest stored reading was taken.
    pub fn latest_reading_time(&self, now: OffsetDateTime) -> OffsetDateTime {
        now - time::Duration::seconds(i64::from(self.seconds_since_update))
    }

    /// Timestamp of the reading at a 1-based `index`.
    pub fn timestamp_of(&self, index: u16, now: OffsetDateTime) -> OffsetDateTime {
        let steps_back = i64::from(self.total_readings.saturating_sub(index));
        self.latest_reading_time(now)
            - time::Duration::seconds(steps_back * i64::from(self.interval_seconds))
    }

    /// Earliest moment a reading must be taken at to count as new.
    ///
    /// Timestamps are rebuilt from the device clock on every download and can
    /// drift by a second between sessions. Anything within half an interval
    /// of `since` is the reading that was already stored.
    pub fn new_after(&self, since: OffsetDateTime) -> OffsetDateTime {
        since + time::Duration::seconds(i64::from(self.interval_seconds / 2))
    }

    /// First 1-based index holding a reading newer than `since`, or `None`
    /// when the device has nothing new.
    pub fn first_index_after(
        &self,
        since: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> Option<u16> {
        if self.total_readings == 0 {
            return None;
        }
        let Some(since) = since else {
            return Some(1);
        };
        if self.interval_seconds == 0 {
            // Cannot locate the cut point; fetch everything and filter.
            return Some(1);
        }

        let delta = (self.latest_reading_time(now) - self.new_after(since)).whole_seconds();
        if delta <= 0 {
            return None;
        }

        let interval = i64::from(self.interval_seconds);
        // Reading k steps before the newest is new iff k * interval < delta.
        let fresh = ((delta + interval - 1) / interval).min(i64::from(self.total_readings));
        Some(self.total_readings - fresh as u16 + 1)
    }
}

/// One decoded V2 history chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HistoryChunk {
    pub start: u16,
    pub values: Vec<u16>,
}

/// Decode a V2 history response.
///
/// Returns `Ok(None)` when the device answered for a different parameter.
pub(crate) fn parse_v2_response(param: HistoryParam, data: &[u8]) -> Result<Option<HistoryChunk>> {
    if data.len() < V2_HEADER_LEN {
        return Err(Error::InvalidData(format!(
            "History response too short: {} bytes",
            data.len()
        )));
    }

    let mut buf = data;
    let resp_param = buf.get_u8();
    if resp_param != param as u8 {
        return Ok(None);
    }
    buf.advance(6); // interval, total, ago
    let start = buf.get_u16_le();
    let count = buf.get_u8() as usize;

    let available = buf.remaining() / param.value_size();
    let mut values = Vec::with_capacity(count.min(available));
    for _ in 0..count.min(available) {
        let value = match param {
            HistoryParam::Humidity => u16::from(buf.get_u8()),
            _ => buf.get_u16_le(),
        };
        values.push(value);
    }

    Ok(Some(HistoryChunk { start, values }))
}

/// Convert raw temperature value to Celsius.
pub fn raw_to_temperature(raw: u16) -> f32 {
    raw as f32 / 20.0
}

/// Convert raw pressure value to hPa.
pub fn raw_to_pressure(raw: u16) -> f32 {
    raw as f32 / 10.0
}

/// Per-parameter values keyed by 1-based index.
#[derive(Debug, Default)]
pub(crate) struct RawHistory {
    pub co2: BTreeMap<u16, u16>,
    pub temperature: BTreeMap<u16, u16>,
    pub pressure: BTreeMap<u16, u16>,
    pub humidity: BTreeMap<u16, u16>,
}

impl RawHistory {
    fn slot(&mut self, param: HistoryParam) -> &mut BTreeMap<u16, u16> {
        match param {
            HistoryParam::Co2 => &mut self.co2,
            HistoryParam::Temperature => &mut self.temperature,
            HistoryParam::Pressure => &mut self.pressure,
            HistoryParam::Humidity => &mut self.humidity,
        }
    }

    /// Join the four series into records, oldest first.
    ///
    /// Indices missing from any series are skipped.
    pub fn into_records(self, info: &HistoryInfo, now: OffsetDateTime) -> Vec<HistoryRecord> {
        let mut records = Vec::with_capacity(self.co2.len());
        for (&index, &co2) in &self.co2 {
            let (Some(&temperature), Some(&pressure), Some(&humidity)) = (
                self.temperature.get(&index),
                self.pressure.get(&index),
                self.humidity.get(&index),
            ) else {
                debug!("Skipping incomplete history index {}", index);
                continue;
            };
            records.push(HistoryRecord {
                timestamp: info.timestamp_of(index, now),
                co2,
                temperature: raw_to_temperature(temperature),
                pressure: raw_to_pressure(pressure),
                humidity: humidity.min(u16::from(u8::MAX)) as u8,
            });
        }
        records
    }
}

fn read_u16(data: &[u8], what: &str) -> Result<u16> {
    match data {
        [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
        _ => Err(Error::InvalidData(format!("Invalid {} data", what))),
    }
}

/// Whole-second UTC now; the store keeps second precision.
fn now_utc() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now - time::Duration::nanoseconds(i64::from(now.nanosecond()))
}

impl Device {
    /// Get information about the stored history.
    pub async fn get_history_info(&self) -> Result<HistoryInfo> {
        let total_readings = read_u16(
            &self.read_characteristic(TOTAL_READINGS).await?,
            "total readings",
        )?;
        let interval_seconds =
            read_u16(&self.read_characteristic(READ_INTERVAL).await?, "interval")?;
        let seconds_since_update =
            read_u16(&self.read_characteristic(SECONDS_SINCE_UPDATE).await?, "age").unwrap_or(0);

        Ok(HistoryInfo {
            total_readings,
            interval_seconds,
            seconds_since_update,
        })
    }

    /// Download every reading taken after `since`, oldest first.
    ///
    /// With `since = None` the whole buffer is downloaded.
    #[tracing::instrument(level = "info", skip(self, options), fields(device = %self.address()))]
    pub async fn download_history_since(
        &self,
        since: Option<OffsetDateTime>,
        options: &HistoryOptions,
    ) -> Result<Vec<HistoryRecord>> {
        let info = self.get_history_info().await?;
        let now = now_utc();
        debug!("History info: {:?}", info);

        let Some(start) = info.first_index_after(since, now) else {
            info!("No new readings on device");
            return Ok(Vec::new());
        };
        let end = info.total_readings;
        info!("Downloading readings {}..={} of {}", start, end, end);

        let mut raw = RawHistory::default();
        for param in HistoryParam::ALL {
            let values = self
                .download_param(param, start, end, options.read_delay)
                .await?;
            *raw.slot(param) = values;
        }

        let mut records = raw.into_records(&info, now);
        if let Some(since) = since {
            let cutoff = info.new_after(since);
            records.retain(|r| r.timestamp > cutoff);
        }
        info!("Downloaded {} new readings", records.len());
        Ok(records)
    }

    async fn download_param(
        &self,
        param: HistoryParam,
        start: u16,
        end: u16,
        read_delay: Duration,
    ) -> Result<BTreeMap<u16, u16>> {
        debug!("Downloading {:?} history from {} to {}", param, start, end);

        let mut values = BTreeMap::new();
        let mut next = u32::from(start);
        let mut mismatches = 0;

        while next <= u32::from(end) {
            let [lo, hi] = (next as u16).to_le_bytes();
            self.write_characteristic(COMMAND, &[HISTORY_V2_REQUEST, param as u8, lo, hi])
                .await?;
            sleep(read_delay).await;
            let response = self.read_characteristic(HISTORY_V2).await?;

            let Some(chunk) = parse_v2_response(param, &response)? else {
                mismatches += 1;
                warn!("Unexpected parameter {} in history response", response[0]);
                if mismatches > MAX_PARAM_MISMATCHES {
                    return Err(Error::InvalidData(format!(
                        "Device kept answering for another parameter than {:?}",
                        param
                    )));
                }
                continue;
            };

            if chunk.values.is_empty() {
                debug!("Reached end of history (count=0)");
                break;
            }

            let chunk_end = u32::from(chunk.start) + chunk.values.len() as u32;
            for (offset, value) in chunk.values.into_iter().enumerate() {
                let index = u32::from(chunk.start) + offset as u32;
                if index > u32::from(end) {
                    break;
                }
                values.insert(index as u16, value);
            }

            if chunk_end <= next {
                return Err(Error::InvalidData(format!(
                    "History index did not advance past {}",
                    next
                )));
            }
            next = chunk_end;
        }

        Ok(values)
    }
}
