//! Platform-agnostic types for the Aranet4 CO2 sensor.
//!
//! Shared by the BLE layer (aranet-core), the SQLite store (aranet-store)
//! and the MCP server (aranet-mcp).
//!
//! ```
//! use aranet_types::{CurrentReading, Status};
//!
//! let bytes = [0x20, 0x03, 0xC2, 0x01, 0x94, 0x27, 45, 85, 1, 0x2C, 0x01, 0x78, 0x00];
//! let reading = CurrentReading::from_bytes(&bytes).unwrap();
//! assert_eq!(reading.co2, 800);
//! assert_eq!(reading.status, Status::Green);
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{
    CO2_INVALID_FLAG, CurrentReading, DeviceType, HistoryRecord, MIN_CURRENT_READING_BYTES,
    Measurement, Sensor, Status,
};
pub use uuid as uuids;

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_parse_current_reading_from_valid_bytes() {
        let bytes: [u8; 13] = [
            0x20, 0x03, // CO2 = 800
            0xC2, 0x01, // temp_raw = 450
            0x94, 0x27, // pressure_raw = 10132
            45,   // humidity
            85,   // battery
            1,    // status = Green
            0x2C, 0x01, // interval = 300
            0x78, 0x00, // age = 120
        ];

        let reading = CurrentReading::from_bytes(&bytes).unwrap();

        assert_eq!(reading.co2, 800);
        assert!((reading.temperature - 22.5).abs() < 0.01);
        assert!((reading.pressure - 1013.2).abs() < 0.1);
        assert_eq!(reading.humidity, 45);
        assert_eq!(reading.battery, 85);
        assert_eq!(reading.status, Status::Green);
        assert_eq!(reading.interval, 300);
        assert_eq!(reading.age, 120);
    }

    #[test]
    fn test_parse_current_reading_from_insufficient_bytes() {
        let err = CurrentReading::from_bytes(&[0; 10]).unwrap_err();
        assert_eq!(
            err,
            ParseError::InsufficientBytes {
                expected: 13,
                actual: 10
            }
        );
        assert!(err.to_string().contains("requires 13 bytes"));
    }

    #[test]
    fn test_status_from_unknown_byte_is_error() {
        assert_eq!(Status::from(0), Status::Error);
        assert_eq!(Status::from(200), Status::Error);
        assert_eq!(Status::from(3).to_string(), "High");
    }

    #[test]
    fn test_device_type_from_name() {
        assert_eq!(DeviceType::from_name("Aranet4 25A3F"), Some(DeviceType::Aranet4));
        assert_eq!(DeviceType::from_name("aranet4"), Some(DeviceType::Aranet4));
        assert_eq!(DeviceType::from_name("AranetRn+ 1"), None);
        assert_eq!(DeviceType::from_name("RN+ 0012"), Some(DeviceType::AranetRadon));
        assert_eq!(DeviceType::from_name("Aranet Radiation"), Some(DeviceType::AranetRadiation));
        assert_eq!(DeviceType::from_name("Speaker"), None);
        assert!(DeviceType::Aranet4.has_co2());
        assert!(!DeviceType::Aranet2.has_co2());
    }

    #[test]
    fn test_device_type_try_from_byte() {
        assert_eq!(DeviceType::try_from(0xF1), Ok(DeviceType::Aranet4));
        assert_eq!(DeviceType::try_from(0x01), Err(0x01));
    }

    #[test]
    fn test_history_record_invalid_co2_flag() {
        let mut record = HistoryRecord {
            timestamp: datetime!(2024-01-01 12:00 UTC),
            co2: 640,
            temperature: 21.5,
            pressure: 1001.0,
            humidity: 40,
        };
        assert!(record.has_valid_co2());
        record.co2 = 0x8000 | 12;
        assert!(!record.has_valid_co2());
    }

    #[test]
    fn test_measurement_from_record() {
        let record = HistoryRecord {
            timestamp: datetime!(2024-01-01 12:00 UTC),
            co2: 640,
            temperature: 21.5,
            pressure: 1001.0,
            humidity: 40,
        };
        let m = Measurement::from_record("office", &record);
        assert_eq!(m.device_id, "office");
        assert_eq!(m.timestamp, record.timestamp);
        assert_eq!(m.co2, 640);
        assert_eq!(m.humidity, 40);
    }

    #[test]
    fn test_sensor_parse_list() {
        assert_eq!(Sensor::parse_list(" ALL ").unwrap(), Sensor::ALL.to_vec());
        assert_eq!(
            Sensor::parse_list("co2, CO2 ,humidity").unwrap(),
            vec![Sensor::Humidity, Sensor::Co2]
        );
        assert_eq!(Sensor::parse_list(" , "), Err(ParseError::EmptySensorList));
        assert_eq!(
            Sensor::parse_list("co2,radon"),
            Err(ParseError::UnknownSensor("radon".into()))
        );
    }

    #[test]
    fn test_sensor_value_and_units() {
        let m = Measurement {
            device_id: "x".into(),
            timestamp: datetime!(2024-01-01 12:00 UTC),
            co2: 900,
            temperature: 20.5,
            humidity: 33,
            pressure: 1012.5,
        };
        assert_eq!(Sensor::Co2.value(&m), 900.0);
        assert_eq!(Sensor::Humidity.value(&m), 33.0);
        assert_eq!(Sensor::Temperature.unit(), "°C");
        assert_eq!(Sensor::Co2.to_string(), "CO2");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_sensor_serde_lowercase() {
        let json = serde_json::to_string(&Sensor::Co2).unwrap();
        assert_eq!(json, "\"co2\"");
    }

    proptest::proptest! {
        #[test]
        fn prop_current_reading_never_panics(data in proptest::collection::vec(proptest::num::u8::ANY, 0..32)) {
            let parsed = CurrentReading::from_bytes(&data);
            proptest::prop_assert_eq!(parsed.is_ok(), data.len() >= MIN_CURRENT_READING_BYTES);
        }
    }
}
