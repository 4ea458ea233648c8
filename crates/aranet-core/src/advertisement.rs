//! Aranet4 advertisement parsing.
//!
//! With Smart Home integration enabled the sensor broadcasts its latest
//! reading in the manufacturer data, so a scan can report CO2 without
//! connecting.
//!
//! Layout (22 bytes, manufacturer id already stripped):
//!
//! | Offset | Content |
//! |--------|---------|
//! | 0 | flags, bit 5 = Smart Home integration enabled |
//! | 1-7 | firmware version and reserved bytes |
//! | 8-20 | reading, same layout as the detailed readings characteristic |
//! | 21 | packet counter |

use serde::{Deserialize, Serialize};

use aranet_types::{CurrentReading, MIN_CURRENT_READING_BYTES};

use crate::error::{Error, Result};

/// Full Aranet4 advertisement length.
pub const ARANET4_ADVERTISEMENT_LEN: usize = 22;

/// Offset of the reading inside the advertisement.
const READING_OFFSET: usize = 8;

const SMART_HOME_FLAG: u8 = 1 << 5;

/// Decoded Aranet4 manufacturer data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advertisement {
    pub flags: u8,
    /// Present only when Smart Home integration is enabled.
    pub reading: Option<CurrentReading>,
    pub counter: Option<u8>,
}

impl Advertisement {
    pub fn smart_home_enabled(&self) -> bool {
        self.flags & SMART_HOME_FLAG != 0
    }
}

/// Parse Aranet4 manufacturer data.
///
/// Short 7-byte frames (integration disabled) parse to an advertisement
/// without a reading.
pub fn parse_advertisement(data: &[u8]) -> Result<Advertisement> {
    let Some(&flags) = data.first() else {
        return Err(Error::InvalidData(
            "Advertisement data is empty".to_string(),
        ));
    };

    if flags & SMART_HOME_FLAG == 0 {
        return Ok(Advertisement {
            flags,
            reading: None,
            counter: None,
        });
    }

    let end = READING_OFFSET + MIN_CURRENT_READING_BYTES;
    if data.len() < end {
        return Err(Error::InvalidData(format!(
            "Aranet4 advertisement requires {} bytes, got {}",
            ARANET4_ADVERTISEMENT_LEN,
            data.len()
        )));
    }

    let reading = CurrentReading::from_bytes(&data[READING_OFFSET..end])?;

    Ok(Advertisement {
        flags,
        reading: Some(reading),
        counter: data.get(end).copied(),
    })
}
