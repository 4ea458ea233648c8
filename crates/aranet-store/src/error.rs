//! Store errors.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// SQLite failure, including a rolled-back batch insert.
    #[error("SQLite error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The database file's directory could not be created.
    #[error("Cannot create directory {} for the database: {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stored or requested time outside the unix timestamp range.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
