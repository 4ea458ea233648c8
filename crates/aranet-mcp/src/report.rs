//! Summaries and tables over stored measurements.

use time::OffsetDateTime;

use aranet_store::Store;
use aranet_types::{Measurement, Sensor};

use crate::error::{ToolError, ToolResult};
use crate::format::{
    Zone, format_reading_line, format_sensor_value, measurements_table, parse_date,
};

/// Rows shown in a table before it is thinned out.
pub const DEFAULT_TABLE_LIMIT: usize = 100;

/// CO2 statistics over a set of measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub co2_min: u16,
    pub co2_max: u16,
    pub co2_avg: f64,
    pub first: OffsetDateTime,
    pub last: OffsetDateTime,
    /// The newest measurement.
    pub latest: Measurement,
}

impl Summary {
    /// `None` for an empty slice. Input order does not matter.
    pub fn from_measurements(rows: &[Measurement]) -> Option<Self> {
        let latest = rows.iter().max_by_key(|m| m.timestamp)?;
        let first = rows.iter().map(|m| m.timestamp).min()?;
        let co2_min = rows.iter().map(|m| m.co2).min()?;
        let co2_max = rows.iter().map(|m| m.co2).max()?;
        let total: u64 = rows.iter().map(|m| u64::from(m.co2)).sum();

        Some(Self {
            count: rows.len(),
            co2_min,
            co2_max,
            co2_avg: total as f64 / rows.len() as f64,
            first,
            last: latest.timestamp,
            latest: latest.clone(),
        })
    }

    pub fn to_markdown(&self, zone: Zone) -> String {
        format!(
            "**Measurements:** {} ({} to {})\n\
             **CO2:** min {} ppm, max {} ppm, avg {:.0} ppm\n\
             **Last reading** ({}): {}",
            self.count,
            zone.format(self.first),
            zone.format(self.last),
            self.co2_min,
            self.co2_max,
            self.co2_avg,
            zone.format(self.latest.timestamp),
            format_reading_line(&self.latest),
        )
    }
}

/// Halve `rows` (keeping every second one) until at most `limit` remain.
pub fn downsample<T>(mut rows: Vec<T>, limit: usize) -> Vec<T> {
    if limit == 0 {
        return rows;
    }
    while rows.len() > limit {
        rows = rows.into_iter().step_by(2).collect();
    }
    rows
}

fn report(title: &str, rows: &[Measurement], sensors: &[Sensor], limit: usize, zone: Zone) -> String {
    // The caller guarantees `rows` is not empty.
    let summary = Summary::from_measurements(rows)
        .map(|s| s.to_markdown(zone))
        .unwrap_or_default();

    let shown = downsample(rows.to_vec(), limit);
    let note = if shown.len() < rows.len() {
        format!(
            "\n\nShowing {} of {} rows, evenly thinned.",
            shown.len(),
            rows.len()
        )
    } else {
        String::new()
    };

    format!(
        "# {}\n\n{}{}\n\n{}",
        title,
        summary,
        note,
        measurements_table(&shown, sensors, zone)
    )
}

/// The `n` newest measurements of `device`, newest first.
pub fn recent_rows(store: &Store, device: &str, n: u32) -> ToolResult<Vec<Measurement>> {
    let rows = store.query_recent_for(device, n)?;
    if rows.is_empty() {
        return Err(ToolError::NoData(format!(
            "for '{}' in the local database. Run `fetch_new_data` to download measurements from the sensor",
            device
        )));
    }
    Ok(rows)
}

/// Measurements of `device` between `from` and `to`, inclusive, oldest first.
pub fn range_rows(
    store: &Store,
    device: &str,
    from: OffsetDateTime,
    to: OffsetDateTime,
    zone: Zone,
) -> ToolResult<Vec<Measurement>> {
    if from > to {
        return Err(ToolError::InvalidArguments(format!(
            "start {} is after end {}",
            zone.format(from),
            zone.format(to)
        )));
    }
    let rows = store.query_range_for(device, from, to)?;
    if rows.is_empty() {
        return Err(ToolError::NoData(format!(
            "between {} and {}",
            zone.format(from),
            zone.format(to)
        )));
    }
    Ok(rows)
}

/// Summary and table of the `n` newest measurements of `device`.
pub fn answer_recent(
    store: &Store,
    device: &str,
    n: u32,
    sensors: &[Sensor],
    zone: Zone,
) -> ToolResult<String> {
    let rows = recent_rows(store, device, n)?;
    Ok(report(
        &format!("Last {} measurements", rows.len()),
        &rows,
        sensors,
        rows.len(),
        zone,
    ))
}

/// Summary of one calendar day (`YYYY-MM-DD`) in `zone`.
pub fn answer_on_date(store: &Store, device: &str, date: &str, zone: Zone) -> ToolResult<String> {
    let day = parse_date(date)?;
    let (from, to) = zone.day_bounds(day);
    let rows = store.query_range_for(device, from, to)?;
    if rows.is_empty() {
        return Err(ToolError::NoData(format!("for {}", day)));
    }
    Ok(report(
        &format!("Measurements on {}", day),
        &rows,
        &Sensor::ALL,
        DEFAULT_TABLE_LIMIT,
        zone,
    ))
}

/// Table of the selected sensors between `from` and `to`, inclusive.
pub fn answer_range(
    store: &Store,
    device: &str,
    from: OffsetDateTime,
    to: OffsetDateTime,
    sensors: &[Sensor],
    limit: usize,
    zone: Zone,
) -> ToolResult<String> {
    if limit == 0 {
        return Err(ToolError::InvalidArguments(
            "limit must be at least 1".to_string(),
        ));
    }
    let rows = range_rows(store, device, from, to, zone)?;
    Ok(report(
        &format!(
            "Measurements from {} to {}",
            zone.format(from),
            zone.format(to)
        ),
        &rows,
        sensors,
        limit,
        zone,
    ))
}

/// One sensor's values over time.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub sensor: Sensor,
    /// Ascending by time.
    pub points: Vec<(OffsetDateTime, f64)>,
}

impl Channel {
    /// Smallest and largest value.
    pub fn range(&self) -> Option<(f64, f64)> {
        self.points.iter().map(|p| p.1).fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}

/// Selected channels over a time span, ready for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotSeries {
    /// Oldest point.
    pub from: OffsetDateTime,
    /// Newest point.
    pub to: OffsetDateTime,
    /// One per selected sensor, in display order.
    pub channels: Vec<Channel>,
}

impl PlotSeries {
    /// Build one channel per sensor from `rows`, in any order.
    pub fn from_measurements(rows: &[Measurement], sensors: &[Sensor]) -> ToolResult<Self> {
        if sensors.is_empty() {
            return Err(ToolError::InvalidArguments(
                "select at least one sensor to plot".to_string(),
            ));
        }
        let mut rows: Vec<&Measurement> = rows.iter().collect();
        rows.sort_by_key(|m| m.timestamp);
        let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
            return Err(ToolError::NoData("to plot".to_string()));
        };

        let channels = sensors
            .iter()
            .map(|&sensor| Channel {
                sensor,
                points: rows.iter().map(|m| (m.timestamp, sensor.value(m))).collect(),
            })
            .collect();
        Ok(Self {
            from: first.timestamp,
            to: last.timestamp,
            channels,
        })
    }

    /// Points per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, |c| c.points.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel(&self, sensor: Sensor) -> Option<&Channel> {
        self.channels.iter().find(|c| c.sensor == sensor)
    }

    /// "CO2, temperature" style list of the plotted sensors.
    pub fn sensor_names(&self) -> String {
        self.channels
            .iter()
            .map(|c| c.sensor.label())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Text accompanying the image: the span and each channel's extremes.
    pub fn caption(&self, zone: Zone) -> String {
        let mut text = format!(
            "{} from {} to {}: {} points.",
            self.sensor_names(),
            zone.format(self.from),
            zone.format(self.to),
            self.len()
        );
        for channel in &self.channels {
            if let Some((min, max)) = channel.range() {
                let sensor = channel.sensor;
                text.push_str(&format!(
                    "\n- {}: min {} {unit}, max {} {unit}",
                    sensor.label(),
                    format_sensor_value(sensor, min),
                    format_sensor_value(sensor, max),
                    unit = sensor.unit()
                ));
            }
        }
        text
    }
}

/// The selected sensors of `device` between `from` and `to`.
pub fn prepare_plot(
    store: &Store,
    device: &str,
    from: OffsetDateTime,
    to: OffsetDateTime,
    sensors: &[Sensor],
    zone: Zone,
) -> ToolResult<PlotSeries> {
    PlotSeries::from_measurements(&range_rows(store, device, from, to, zone)?, sensors)
}

/// Outcome of one `fetch_new_data` call.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchReport {
    pub device: String,
    pub since: Option<OffsetDateTime>,
    pub until: OffsetDateTime,
    /// Valid records downloaded from the device.
    pub fetched: usize,
    /// Rows that were not already stored.
    pub inserted: usize,
    pub summary: Option<Summary>,
}

impl FetchReport {
    pub fn to_text(&self, zone: Zone) -> String {
        let start = self
            .since
            .map_or_else(|| "beginning".to_string(), |ts| zone.format(ts));
        let mut text = format!(
            "Fetched {} measurements from '{}' in range: ({}, {}); {} new rows added to the local database.",
            self.fetched,
            self.device,
            start,
            zone.format(self.until),
            self.inserted
        );
        if let Some(summary) = &self.summary {
            text.push_str("\n\n# Fetched data\n\n");
            text.push_str(&summary.to_markdown(zone));
        }
        text
    }
}
