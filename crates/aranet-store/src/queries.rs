//! Query builder for stored measurements.
//!
//! ```
//! use aranet_store::{MeasurementQuery, Store};
//! use time::{Duration, OffsetDateTime};
//!
//! let store = Store::open_in_memory()?;
//! let yesterday = OffsetDateTime::now_utc() - Duration::hours(24);
//!
//! let query = MeasurementQuery::new()
//!     .device("office")
//!     .since(yesterday)
//!     .limit(50);
//! let rows = store.query(&query)?;
//! assert!(rows.is_empty());
//! # Ok::<(), aranet_store::Error>(())
//! ```

use time::OffsetDateTime;

/// Fluent filter over the `measurements` table.
///
/// [`MeasurementQuery::new`] orders newest first; call
/// [`oldest_first`](Self::oldest_first) for chronological output.
#[derive(Debug, Default, Clone)]
pub struct MeasurementQuery {
    pub device_id: Option<String>,
    /// Inclusive lower bound.
    pub since: Option<OffsetDateTime>,
    /// Inclusive upper bound.
    pub until: Option<OffsetDateTime>,
    pub limit: Option<u32>,
    pub newest_first: bool,
}

impl MeasurementQuery {
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    pub fn device(mut self, device_id: &str) -> Self {
        self.device_id = Some(device_id.to_string());
        self
    }

    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref device_id) = self.device_id {
            conditions.push("device_id = ?");
            params.push(Box::new(device_id.clone()));
        }

        if let Some(since) = self.since {
            conditions.push("timestamp >= ?");
            params.push(Box::new(since.unix_timestamp()));
        }

        if let Some(until) = self.until {
            conditions.push("timestamp <= ?");
            params.push(Box::new(until.unix_timestamp()));
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (clause, params)
    }

    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT device_id, timestamp, co2, temperature, humidity, pressure
             FROM measurements {} ORDER BY timestamp {}, device_id",
            where_clause, order
        );

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        sql
    }
}
