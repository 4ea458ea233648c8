//! Main store implementation.

use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use time::OffsetDateTime;
use tracing::{debug, info};

use aranet_types::Measurement;

use crate::error::{Error, Result};
use crate::models::{DatabaseStats, DeviceCount};
use crate::queries::MeasurementQuery;
use crate::schema;

/// SQLite-backed measurement store.
///
/// The connection lives as long as the `Store` and is closed on drop, so a
/// store opened inside a request is released on every exit path.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Insert measurements, skipping any whose `(device_id, timestamp)` is
    /// already stored. Returns the number of rows actually added.
    ///
    /// The batch runs in one transaction: on error nothing is kept.
    pub fn insert_many(&mut self, measurements: &[Measurement]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO measurements
                 (device_id, timestamp, co2, temperature, humidity, pressure)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for m in measurements {
                inserted += stmt.execute(rusqlite::params![
                    m.device_id,
                    m.timestamp.unix_timestamp(),
                    m.co2,
                    m.temperature,
                    m.humidity,
                    m.pressure,
                ])?;
            }
        }

        tx.commit()?;
        info!(
            "Stored {} new of {} measurements",
            inserted,
            measurements.len()
        );
        Ok(inserted)
    }

    /// Run a filtered query.
    pub fn query(&self, query: &MeasurementQuery) -> Result<Vec<Measurement>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();
        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        debug!("Executing query: {}", sql);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), measurement_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// The `n` most recent measurements, newest first.
    pub fn query_recent(&self, n: u32) -> Result<Vec<Measurement>> {
        self.query(&MeasurementQuery::new().limit(n))
    }

    /// Measurements with `from <= timestamp <= to`, oldest first.
    pub fn query_range(&self, from: OffsetDateTime, to: OffsetDateTime) -> Result<Vec<Measurement>> {
        self.query(&MeasurementQuery::new().since(from).until(to).oldest_first())
    }

    /// The `n` most recent measurements of one device, newest first.
    pub fn query_recent_for(&self, device_id: &str, n: u32) -> Result<Vec<Measurement>> {
        self.query(&MeasurementQuery::new().device(device_id).limit(n))
    }

    /// One device's measurements with `from <= timestamp <= to`, oldest first.
    pub fn query_range_for(
        &self,
        device_id: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<Measurement>> {
        self.query(
            &MeasurementQuery::new()
                .device(device_id)
                .since(from)
                .until(to)
                .oldest_first(),
        )
    }

    /// Newest stored timestamp for a device.
    pub fn last_timestamp(&self, device_id: &str) -> Result<Option<OffsetDateTime>> {
        let ts: Option<i64> = self.conn.query_row(
            "SELECT MAX(timestamp) FROM measurements WHERE device_id = ?",
            [device_id],
            |row| row.get(0),
        )?;

        ts.map(to_datetime).transpose()
    }

    /// Row counts and time span of the whole store.
    pub fn stats(&self) -> Result<DatabaseStats> {
        let (total, first, last): (i64, Option<i64>, Option<i64>) = self.conn.query_row(
            "SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM measurements",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT device_id, COUNT(*) FROM measurements
             GROUP BY device_id ORDER BY device_id",
        )?;
        let devices = stmt
            .query_map([], |row| {
                Ok(DeviceCount {
                    device_id: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(DatabaseStats {
            total_measurements: total as u64,
            first_timestamp: first.map(to_datetime).transpose()?,
            last_timestamp: last.map(to_datetime).transpose()?,
            devices,
        })
    }
}

fn to_datetime(ts: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(ts).map_err(|e| Error::InvalidTimestamp(e.to_string()))
}

fn measurement_from_row(row: &Row<'_>) -> rusqlite::Result<Measurement> {
    let timestamp = OffsetDateTime::from_unix_timestamp(row.get(1)?)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Integer, Box::new(e)))?;

    Ok(Measurement {
        device_id: row.get(0)?,
        timestamp,
        co2: row.get(2)?,
        temperature: row.get(3)?,
        humidity: row.get(4)?,
        pressure: row.get(5)?,
    })
}
