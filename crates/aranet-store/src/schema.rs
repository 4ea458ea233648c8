//! Database schema and migrations.
//!
//! The applied version lives in a one-row `schema_version` table; each entry
//! of [`MIGRATIONS`] moves the schema one version forward.

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::Result;

/// Migration scripts, oldest first. Version `n` is reached after script `n - 1`.
const MIGRATIONS: &[&str] = &[
    // v1: one table of immutable samples; the primary key rejects duplicates.
    r#"
    CREATE TABLE measurements (
        device_id TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        co2 INTEGER NOT NULL,
        temperature REAL NOT NULL,
        humidity INTEGER NOT NULL,
        pressure REAL NOT NULL,
        PRIMARY KEY (device_id, timestamp)
    );
    CREATE INDEX idx_measurements_time ON measurements(timestamp);
    "#,
];

/// Current schema version.
pub const SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

/// Bring the database up to [`SCHEMA_VERSION`].
pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );",
    )?;

    let current = schema_version(conn)?;
    if current >= SCHEMA_VERSION {
        debug!("Schema is at v{}", current);
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    for (index, script) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        debug!("Applying schema migration v{}", index + 1);
        tx.execute_batch(script)?;
    }
    tx.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
        [SCHEMA_VERSION],
    )?;
    tx.commit()?;

    info!("Database schema migrated from v{} to v{}", current, SCHEMA_VERSION);
    Ok(())
}

/// Applied version, 0 for a fresh database.
fn schema_version(conn: &Connection) -> Result<i32> {
    let version = conn
        .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(version.unwrap_or(0))
}
