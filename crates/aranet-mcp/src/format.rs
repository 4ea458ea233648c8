//! Text formatting for tool results: time zones, timestamps, tables and
//! scan listings.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use aranet_core::DiscoveredDevice;
use aranet_types::{Measurement, Sensor};

use crate::error::{ToolError, ToolResult};

/// Where timestamps are displayed and calendar days are cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Utc,
    /// The machine's zone, DST included.
    Local,
    Fixed(UtcOffset),
}

impl Zone {
    pub fn from_config(use_local_tz: bool) -> Self {
        if use_local_tz { Zone::Local } else { Zone::Utc }
    }

    /// UTC offset in force at `ts`.
    pub fn offset_at(self, ts: OffsetDateTime) -> UtcOffset {
        match self {
            Zone::Utc => UtcOffset::UTC,
            Zone::Local => local_offset_at(ts),
            Zone::Fixed(offset) => offset,
        }
    }

    /// Render as `YYYY-MM-DD HH:MM:SS ±HHMM`.
    pub fn format(self, ts: OffsetDateTime) -> String {
        let shown = ts.to_offset(self.offset_at(ts));
        shown
            .format(format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
            ))
            .unwrap_or_else(|_| shown.to_string())
    }

    /// The instant a wall-clock time in this zone designates.
    pub fn resolve(self, wall: PrimitiveDateTime) -> OffsetDateTime {
        match self {
            Zone::Utc => wall.assume_utc(),
            Zone::Fixed(offset) => wall.assume_offset(offset),
            Zone::Local => local_wall_time(wall),
        }
    }

    /// First and last second of `date` in this zone.
    pub fn day_bounds(self, date: Date) -> (OffsetDateTime, OffsetDateTime) {
        let start = self.resolve(date.midnight());
        let next = match date.next_day() {
            Some(next) => self.resolve(next.midnight()),
            None => start + time::Duration::DAY,
        };
        (start, next - time::Duration::SECOND)
    }
}

fn local_offset_at(ts: OffsetDateTime) -> UtcOffset {
    use chrono::{Local, Offset, TimeZone};

    let Some(utc) = chrono::DateTime::from_timestamp(ts.unix_timestamp(), 0) else {
        return UtcOffset::UTC;
    };
    let seconds = Local
        .offset_from_utc_datetime(&utc.naive_utc())
        .fix()
        .local_minus_utc();
    UtcOffset::from_whole_seconds(seconds).unwrap_or(UtcOffset::UTC)
}

fn local_wall_time(wall: PrimitiveDateTime) -> OffsetDateTime {
    use chrono::{Local, LocalResult, NaiveDate, TimeZone};

    let naive = NaiveDate::from_ymd_opt(
        wall.year(),
        u32::from(u8::from(wall.month())),
        u32::from(wall.day()),
    )
    .and_then(|d| {
        d.and_hms_opt(
            u32::from(wall.hour()),
            u32::from(wall.minute()),
            u32::from(wall.second()),
        )
    });
    let resolved = naive.and_then(|n| match Local.from_local_datetime(&n) {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => {
            OffsetDateTime::from_unix_timestamp(t.timestamp()).ok()
        }
        LocalResult::None => None,
    });

    // Wall times skipped by a DST jump take the offset in force just before.
    resolved.unwrap_or_else(|| wall.assume_offset(local_offset_at(wall.assume_utc())))
}

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(input: &str) -> ToolResult<Date> {
    Date::parse(input.trim(), format_description!("[year]-[month]-[day]")).map_err(|_| {
        ToolError::InvalidArguments(format!(
            "invalid date '{}': use the format YYYY-MM-DD",
            input
        ))
    })
}

/// Parse an ISO datetime.
///
/// Accepts RFC 3339 (`2024-01-01T08:00:00Z`, `...+02:00`), a wall-clock time
/// without offset (`2024-01-01T08:00:00`, `2024-01-01 08:00`) read in
/// `zone`, or a bare date meaning its midnight in `zone`.
pub fn parse_datetime(input: &str, zone: Zone) -> ToolResult<OffsetDateTime> {
    let input = input.trim();
    if let Ok(ts) = OffsetDateTime::parse(input, &Rfc3339) {
        return Ok(ts);
    }

    let wall_formats = [
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]"),
    ];
    for format in wall_formats {
        if let Ok(wall) = PrimitiveDateTime::parse(input, format) {
            return Ok(zone.resolve(wall));
        }
    }

    if let Ok(date) = Date::parse(input, format_description!("[year]-[month]-[day]")) {
        return Ok(zone.resolve(date.midnight()));
    }

    Err(ToolError::InvalidArguments(format!(
        "invalid datetime '{}': use ISO format (YYYY-MM-DDTHH:MM:SS)",
        input
    )))
}

/// Like [`parse_datetime`], but a bare date covers the whole day.
pub fn parse_range_end(input: &str, zone: Zone) -> ToolResult<OffsetDateTime> {
    match Date::parse(input.trim(), format_description!("[year]-[month]-[day]")) {
        Ok(date) => Ok(zone.day_bounds(date).1),
        Err(_) => parse_datetime(input, zone),
    }
}

fn format_value(sensor: Sensor, m: &Measurement) -> String {
    match sensor {
        Sensor::Temperature => format!("{:.1}", m.temperature),
        Sensor::Humidity => m.humidity.to_string(),
        Sensor::Pressure => format!("{:.1}", m.pressure),
        Sensor::Co2 => m.co2.to_string(),
    }
}

/// A channel value with the precision the sensor reports.
pub fn format_sensor_value(sensor: Sensor, value: f64) -> String {
    match sensor {
        Sensor::Temperature | Sensor::Pressure => format!("{:.1}", value),
        Sensor::Humidity | Sensor::Co2 => format!("{:.0}", value),
    }
}

/// Markdown-style table: a `timestamp` column followed by `sensors`.
pub fn measurements_table(rows: &[Measurement], sensors: &[Sensor], zone: Zone) -> String {
    let mut columns = vec!["timestamp"];
    columns.extend(sensors.iter().map(Sensor::label));

    let width: usize = columns.iter().map(|c| c.len()).sum::<usize>() + 3 * (columns.len() - 1);
    let mut lines = vec![columns.join(" | "), "-".repeat(width)];

    for m in rows {
        let mut cells = vec![zone.format(m.timestamp)];
        cells.extend(sensors.iter().map(|&s| format_value(s, m)));
        lines.push(cells.join(" | "));
    }
    lines.join("\n")
}

/// All channels of `m` on one line.
pub fn format_reading_line(m: &Measurement) -> String {
    format!(
        "CO2 {} ppm, temperature {:.1} °C, humidity {} %, pressure {:.1} hPa",
        m.co2, m.temperature, m.humidity, m.pressure
    )
}

pub const NO_DEVICES_FOUND: &str = "No Aranet4 devices found nearby. Is your Aranet4 close by? \
     Maybe you should enable extended Bluetooth range on the device.";

/// Human-readable scan results.
pub fn format_scan_text(devices: &[DiscoveredDevice]) -> String {
    if devices.is_empty() {
        return NO_DEVICES_FOUND.to_string();
    }

    devices
        .iter()
        .map(|device| {
            let rssi = device
                .rssi
                .map_or_else(|| "N/A".to_string(), |r| r.to_string());
            let mut lines = vec![format!(
                "Device: {}, MAC: {}, RSSI: {} dBm",
                device.name.as_deref().unwrap_or("Unknown"),
                device.identifier,
                rssi
            )];
            if let Some(reading) = &device.reading {
                lines.push(format!("  CO2: {} ppm", reading.co2));
                lines.push(format!("  Temperature: {:.1} °C", reading.temperature));
                lines.push(format!("  Humidity: {}%", reading.humidity));
                lines.push(format!("  Pressure: {:.1} hPa", reading.pressure));
                lines.push(format!("  Battery: {}%", reading.battery));
            }
            lines.join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use aranet_types::{CurrentReading, DeviceType, Status};
    use time::macros::{date, datetime, offset};

    fn measurement(ts: OffsetDateTime) -> Measurement {
        Measurement {
            device_id: "office".into(),
            timestamp: ts,
            co2: 612,
            temperature: 21.46,
            humidity: 41,
            pressure: 1012.34,
        }
    }

    #[test]
    fn test_format_utc_and_fixed() {
        let ts = datetime!(2024-01-01 08:30:05 UTC);
        assert_eq!(Zone::Utc.format(ts), "2024-01-01 08:30:05 +0000");
        assert_eq!(
            Zone::Fixed(offset!(+2)).format(ts),
            "2024-01-01 10:30:05 +0200"
        );
        assert_eq!(
            Zone::Fixed(offset!(-5:30)).format(ts),
            "2024-01-01 03:00:05 -0530"
        );
    }

    #[test]
    fn test_day_bounds() {
        let (start, end) = Zone::Utc.day_bounds(date!(2024-01-01));
        assert_eq!(start, datetime!(2024-01-01 00:00:00 UTC));
        assert_eq!(end, datetime!(2024-01-01 23:59:59 UTC));

        let (start, end) = Zone::Fixed(offset!(+2)).day_bounds(date!(2024-01-01));
        assert_eq!(start, datetime!(2023-12-31 22:00:00 UTC));
        assert_eq!(end, datetime!(2024-01-01 21:59:59 UTC));
    }

    #[test]
    fn test_local_zone_round_trip() {
        let ts = datetime!(2024-07-01 12:00:00 UTC);
        let offset = Zone::Local.offset_at(ts);
        let wall = ts.to_offset(offset);
        let wall = PrimitiveDateTime::new(wall.date(), wall.time());
        assert_eq!(Zone::Local.resolve(wall), ts);
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2024-01-01").unwrap(), date!(2024-01-01));
        assert!(matches!(
            parse_date("01/01/2024"),
            Err(ToolError::InvalidArguments(_))
        ));
        assert!(parse_date("2024-02-30").is_err());
    }

    #[test]
    fn test_parse_datetime_forms() {
        let zone = Zone::Fixed(offset!(+1));
        assert_eq!(
            parse_datetime("2024-01-01T08:00:00Z", zone).unwrap(),
            datetime!(2024-01-01 08:00:00 UTC)
        );
        assert_eq!(
            parse_datetime("2024-01-01T08:00:00+02:00", zone).unwrap(),
            datetime!(2024-01-01 06:00:00 UTC)
        );
        assert_eq!(
            parse_datetime("2024-01-01T08:00:00", zone).unwrap(),
            datetime!(2024-01-01 07:00:00 UTC)
        );
        assert_eq!(
            parse_datetime("2024-01-01 08:00", zone).unwrap(),
            datetime!(2024-01-01 07:00:00 UTC)
        );
        assert_eq!(
            parse_datetime("2024-01-01", zone).unwrap(),
            datetime!(2023-12-31 23:00:00 UTC)
        );
        assert!(parse_datetime("yesterday", zone).is_err());
    }

    #[test]
    fn test_parse_range_end() {
        assert_eq!(
            parse_range_end("2024-01-01", Zone::Utc).unwrap(),
            datetime!(2024-01-01 23:59:59 UTC)
        );
        assert_eq!(
            parse_range_end("2024-01-01T12:00:00Z", Zone::Utc).unwrap(),
            datetime!(2024-01-01 12:00:00 UTC)
        );
    }

    #[test]
    fn test_measurements_table() {
        let rows = [measurement(datetime!(2024-01-01 08:00:00 UTC))];
        let table = measurements_table(&rows, &[Sensor::Temperature, Sensor::Co2], Zone::Utc);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "timestamp | temperature | CO2");
        assert_eq!(lines[1], "-".repeat(lines[0].len()));
        assert_eq!(lines[2], "2024-01-01 08:00:00 +0000 | 21.5 | 612");
    }

    #[test]
    fn test_reading_line() {
        let line = format_reading_line(&measurement(datetime!(2024-01-01 08:00:00 UTC)));
        assert_eq!(
            line,
            "CO2 612 ppm, temperature 21.5 °C, humidity 41 %, pressure 1012.3 hPa"
        );
    }

    #[test]
    fn test_scan_text_empty() {
        assert_eq!(format_scan_text(&[]), NO_DEVICES_FOUND);
    }

    #[test]
    fn test_scan_text_with_reading() {
        let devices = vec![
            DiscoveredDevice {
                name: Some("Aranet4 1A2B3".into()),
                identifier: "AA:BB:CC:DD:EE:FF".into(),
                rssi: Some(-61),
                device_type: Some(DeviceType::Aranet4),
                reading: Some(CurrentReading {
                    co2: 640,
                    temperature: 21.5,
                    pressure: 1008.0,
                    humidity: 41,
                    battery: 77,
                    status: Status::Green,
                    interval: 300,
                    age: 12,
                }),
            },
            DiscoveredDevice {
                name: None,
                identifier: "11:22:33:44:55:66".into(),
                rssi: None,
                device_type: None,
                reading: None,
            },
        ];

        let text = format_scan_text(&devices);
        assert!(text.starts_with("Device: Aranet4 1A2B3, MAC: AA:BB:CC:DD:EE:FF, RSSI: -61 dBm"));
        assert!(text.contains("  CO2: 640 ppm"));
        assert!(text.contains("  Battery: 77%"));
        assert!(text.contains("Device: Unknown, MAC: 11:22:33:44:55:66, RSSI: N/A dBm"));
    }
}
