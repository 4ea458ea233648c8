//! Core types for Aranet4 sensor data.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Raw CO2 values with this bit set are not valid samples.
///
/// The sensor reports them while warming up or after a calibration fault.
pub const CO2_INVALID_FLAG: u16 = 0x8000;

/// Type of Aranet device.
///
/// Only the Aranet4 carries CO2 history; the others are recognised so a scan
/// can tell the user what it saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum DeviceType {
    /// Aranet4 CO2, temperature, humidity, and pressure sensor.
    Aranet4 = 0xF1,
    /// Aranet2 temperature and humidity sensor.
    Aranet2 = 0xF2,
    /// Aranet Radon sensor.
    AranetRadon = 0xF3,
    /// Aranet Radiation sensor.
    AranetRadiation = 0xF4,
}

impl DeviceType {
    /// Guess the device type from its advertised name (case-insensitive).
    ///
    /// ```
    /// use aranet_types::DeviceType;
    ///
    /// assert_eq!(DeviceType::from_name("Aranet4 1A2B3"), Some(DeviceType::Aranet4));
    /// assert_eq!(DeviceType::from_name("Aranet2 Home"), Some(DeviceType::Aranet2));
    /// assert_eq!(DeviceType::from_name("NotAranet4"), None);
    /// ```
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '+')
            .filter(|w| !w.is_empty())
            .collect();

        if words.contains(&"aranet4") {
            Some(DeviceType::Aranet4)
        } else if words.contains(&"aranet2") {
            Some(DeviceType::Aranet2)
        } else if words.iter().any(|w| *w == "rn+" || *w == "radon") {
            Some(DeviceType::AranetRadon)
        } else if words.contains(&"radiation") {
            Some(DeviceType::AranetRadiation)
        } else {
            None
        }
    }

    /// Whether this device keeps a CO2 history that can be downloaded.
    #[must_use]
    pub fn has_co2(&self) -> bool {
        matches!(self, DeviceType::Aranet4)
    }
}

impl TryFrom<u8> for DeviceType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0xF1 => Ok(DeviceType::Aranet4),
            0xF2 => Ok(DeviceType::Aranet2),
            0xF3 => Ok(DeviceType::AranetRadon),
            0xF4 => Ok(DeviceType::AranetRadiation),
            other => Err(other),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::Aranet4 => "Aranet4",
            DeviceType::Aranet2 => "Aranet2",
            DeviceType::AranetRadon => "Aranet Radon",
            DeviceType::AranetRadiation => "Aranet Radiation",
        };
        f.write_str(name)
    }
}

/// CO2 level indicator shown on the device display.
///
/// ```
/// use aranet_types::Status;
///
/// assert!(Status::Red > Status::Yellow);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum Status {
    /// Error or invalid reading.
    Error = 0,
    /// CO2 level is good (green).
    Green = 1,
    /// CO2 level is moderate (yellow).
    Yellow = 2,
    /// CO2 level is high (red).
    Red = 3,
}

impl From<u8> for Status {
    fn from(value: u8) -> Self {
        match value {
            1 => Status::Green,
            2 => Status::Yellow,
            3 => Status::Red,
            _ => Status::Error,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Error => write!(f, "Error"),
            Status::Green => write!(f, "Good"),
            Status::Yellow => write!(f, "Moderate"),
            Status::Red => write!(f, "High"),
        }
    }
}

/// Minimum number of bytes required to parse a [`CurrentReading`].
pub const MIN_CURRENT_READING_BYTES: usize = 13;

/// Live reading from an Aranet4, as carried by the detailed readings
/// characteristic and by Smart Home advertisements.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CurrentReading {
    /// CO2 concentration in ppm.
    pub co2: u16,
    /// Temperature in degrees Celsius.
    pub temperature: f32,
    /// Atmospheric pressure in hPa.
    pub pressure: f32,
    /// Relative humidity percentage (0-100).
    pub humidity: u8,
    /// Battery level percentage (0-100).
    pub battery: u8,
    pub status: Status,
    /// Measurement interval in seconds.
    pub interval: u16,
    /// Seconds since the last measurement.
    pub age: u16,
}

impl CurrentReading {
    /// Parse the 13-byte Aranet4 reading layout.
    ///
    /// - bytes 0-1: CO2 (u16 LE)
    /// - bytes 2-3: temperature (u16 LE, 1/20 °C)
    /// - bytes 4-5: pressure (u16 LE, 1/10 hPa)
    /// - byte 6: humidity, byte 7: battery, byte 8: status
    /// - bytes 9-10: interval (u16 LE), bytes 11-12: age (u16 LE)
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InsufficientBytes`] for payloads shorter than
    /// [`MIN_CURRENT_READING_BYTES`].
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        use bytes::Buf;

        if data.len() < MIN_CURRENT_READING_BYTES {
            return Err(ParseError::InsufficientBytes {
                expected: MIN_CURRENT_READING_BYTES,
                actual: data.len(),
            });
        }

        let mut buf = data;
        Ok(CurrentReading {
            co2: buf.get_u16_le(),
            temperature: f32::from(buf.get_u16_le()) / 20.0,
            pressure: f32::from(buf.get_u16_le()) / 10.0,
            humidity: buf.get_u8(),
            battery: buf.get_u8(),
            status: Status::from(buf.get_u8()),
            interval: buf.get_u16_le(),
            age: buf.get_u16_le(),
        })
    }
}

/// One entry of the on-device history buffer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HistoryRecord {
    /// When the sample was taken, reconstructed from the logging interval.
    pub timestamp: time::OffsetDateTime,
    /// CO2 concentration in ppm.
    pub co2: u16,
    /// Temperature in degrees Celsius.
    pub temperature: f32,
    /// Atmospheric pressure in hPa.
    pub pressure: f32,
    /// Relative humidity percentage.
    pub humidity: u8,
}

impl HistoryRecord {
    /// False for samples the sensor flagged as invalid.
    #[must_use]
    pub fn has_valid_co2(&self) -> bool {
        self.co2 & CO2_INVALID_FLAG == 0
    }
}

/// A history record attributed to a device, as persisted.
///
/// Rows are unique by `(device_id, timestamp)`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Measurement {
    pub device_id: String,
    pub timestamp: time::OffsetDateTime,
    pub co2: u16,
    pub temperature: f32,
    pub humidity: u8,
    pub pressure: f32,
}

impl Measurement {
    /// Attribute a raw history record to `device_id`.
    #[must_use]
    pub fn from_record(device_id: impl Into<String>, record: &HistoryRecord) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp: record.timestamp,
            co2: record.co2,
            temperature: record.temperature,
            humidity: record.humidity,
            pressure: record.pressure,
        }
    }
}

/// A measurement channel that can be selected for reports and plots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Sensor {
    Temperature,
    Humidity,
    Pressure,
    Co2,
}

impl Sensor {
    /// All channels in display order.
    pub const ALL: [Sensor; 4] = [
        Sensor::Temperature,
        Sensor::Humidity,
        Sensor::Pressure,
        Sensor::Co2,
    ];

    /// Column label used in tables and plots.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Sensor::Temperature => "temperature",
            Sensor::Humidity => "humidity",
            Sensor::Pressure => "pressure",
            Sensor::Co2 => "CO2",
        }
    }

    #[must_use]
    pub fn unit(&self) -> &'static str {
        match self {
            Sensor::Temperature => "°C",
            Sensor::Humidity => "%",
            Sensor::Pressure => "hPa",
            Sensor::Co2 => "ppm",
        }
    }

    /// The value of this channel in `m`.
    #[must_use]
    pub fn value(&self, m: &Measurement) -> f64 {
        match self {
            Sensor::Temperature => f64::from(m.temperature),
            Sensor::Humidity => f64::from(m.humidity),
            Sensor::Pressure => f64::from(m.pressure),
            Sensor::Co2 => f64::from(m.co2),
        }
    }

    /// Parse a comma-separated list such as `"co2, Temperature"` or `"all"`.
    ///
    /// Duplicates are removed and the result keeps display order.
    ///
    /// ```
    /// use aranet_types::Sensor;
    ///
    /// let picked = Sensor::parse_list("CO2,temperature").unwrap();
    /// assert_eq!(picked, vec![Sensor::Temperature, Sensor::Co2]);
    /// assert_eq!(Sensor::parse_list("all").unwrap().len(), 4);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::UnknownSensor`] for an unrecognised name and
    /// [`ParseError::EmptySensorList`] when nothing was given.
    pub fn parse_list(input: &str) -> Result<Vec<Sensor>, ParseError> {
        if input.trim().eq_ignore_ascii_case("all") {
            return Ok(Sensor::ALL.to_vec());
        }

        let mut picked = input
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<Sensor>, _>>()?;
        if picked.is_empty() {
            return Err(ParseError::EmptySensorList);
        }
        picked.sort();
        picked.dedup();
        Ok(picked)
    }
}

impl FromStr for Sensor {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "temperature" | "temp" => Ok(Sensor::Temperature),
            "humidity" => Ok(Sensor::Humidity),
            "pressure" => Ok(Sensor::Pressure),
            "co2" => Ok(Sensor::Co2),
            _ => Err(ParseError::UnknownSensor(s.to_string())),
        }
    }
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
