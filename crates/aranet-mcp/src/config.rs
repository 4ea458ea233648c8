//! Sensor configuration.
//!
//! One sensor per deployment, stored as TOML:
//!
//! ```toml
//! mac = "AA:BB:CC:DD:EE:FF"
//! name = "office"
//! db_path = "~/.local/share/aranet4-mcp/aranet4.db"
//! use_local_tz = true
//! ```
//!
//! `DEVICE_MAC`, `DEVICE_NAME`, `DB_PATH` and `USE_LOCAL_TZ` override the
//! file, so a container can be configured without mounting one.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{debug, info};

/// Environment variables that override the file.
pub const ENV_MAC: &str = "DEVICE_MAC";
pub const ENV_NAME: &str = "DEVICE_NAME";
pub const ENV_DB_PATH: &str = "DB_PATH";
pub const ENV_USE_LOCAL_TZ: &str = "USE_LOCAL_TZ";

/// Directory, next to the config file, holding copies of replaced configs.
pub const BACKUP_DIR: &str = "backups";

/// The configured sensor and where its measurements are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// MAC address, or the CoreBluetooth UUID on macOS.
    pub mac: String,
    /// Friendly name; stored rows are keyed by it.
    pub name: String,
    /// SQLite database file.
    #[serde(default = "aranet_store::default_db_path")]
    pub db_path: PathBuf,
    /// Render timestamps in the machine's local time zone instead of UTC.
    #[serde(default = "default_use_local_tz")]
    pub use_local_tz: bool,
}

fn default_use_local_tz() -> bool {
    true
}

/// File contents before overrides; every field may be missing.
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    mac: Option<String>,
    name: Option<String>,
    db_path: Option<PathBuf>,
    use_local_tz: Option<bool>,
}

impl Config {
    pub fn new(mac: impl Into<String>, name: impl Into<String>, db_path: impl Into<PathBuf>) -> Self {
        Self {
            mac: mac.into(),
            name: name.into(),
            db_path: db_path.into(),
            use_local_tz: default_use_local_tz(),
        }
    }

    /// Load the configuration from `path` and the process environment.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Load the configuration from `path`, taking overrides from `env`.
    ///
    /// A missing file is not an error as long as the overrides provide the
    /// MAC address and name.
    pub fn load_with_env<P, F>(path: P, env: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let path = path.as_ref();
        let mut partial = if path.exists() {
            debug!("Loading config from {}", path.display());
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })?;
            toml::from_str::<PartialConfig>(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?
        } else {
            PartialConfig::default()
        };

        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        if let Some(mac) = env(ENV_MAC) {
            partial.mac = Some(mac);
        }
        if let Some(name) = env(ENV_NAME) {
            partial.name = Some(name);
        }
        if let Some(db_path) = env(ENV_DB_PATH) {
            partial.db_path = Some(PathBuf::from(db_path));
        }
        if let Some(value) = env(ENV_USE_LOCAL_TZ) {
            partial.use_local_tz = Some(parse_bool(&value).ok_or_else(|| ConfigError::Env {
                var: ENV_USE_LOCAL_TZ,
                value,
            })?);
        }

        let (Some(mac), Some(name)) = (partial.mac, partial.name) else {
            return Err(ConfigError::Missing(path.to_path_buf()));
        };

        Ok(Self {
            mac,
            name,
            db_path: expand_tilde(&partial.db_path.unwrap_or_else(aranet_store::default_db_path)),
            use_local_tz: partial.use_local_tz.unwrap_or_else(default_use_local_tz),
        })
    }

    /// Validate and write the configuration to `path`.
    ///
    /// A file already at `path` is first copied into the `backups`
    /// directory beside it; the copy's path is returned. Existing backups
    /// are never overwritten.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<Option<PathBuf>, ConfigError> {
        self.validate()?;
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        let backup = if path.exists() {
            let backup = write_backup(path, OffsetDateTime::now_utc())?;
            info!("Backed up previous config to {}", backup.display());
            Some(backup)
        } else {
            None
        };

        create_parent(path)?;
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
        info!("Saved config to {}", path.display());
        Ok(backup)
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - `mac` is a 48-bit MAC address or a CoreBluetooth UUID
    /// - `name` is not empty
    /// - `db_path` is not empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.mac.trim().is_empty() {
            errors.push(ValidationError {
                field: "mac".to_string(),
                message: "device address cannot be empty".to_string(),
            });
        } else if !is_device_address(&self.mac) {
            errors.push(ValidationError {
                field: "mac".to_string(),
                message: format!(
                    "invalid device address '{}': expected a MAC address like AA:BB:CC:DD:EE:FF or a macOS device UUID",
                    self.mac
                ),
            });
        }

        if self.name.trim().is_empty() {
            errors.push(ValidationError {
                field: "name".to_string(),
                message: "device name cannot be empty".to_string(),
            });
        }

        if self.db_path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "db_path".to_string(),
                message: "database path cannot be empty".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// MAC address (`:`, `-` or `.` separated) or a CoreBluetooth UUID.
pub fn is_device_address(value: &str) -> bool {
    let value = value.trim();
    macaddr::MacAddr6::from_str(value).is_ok() || uuid::Uuid::parse_str(value).is_ok()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Replace a leading `~` with the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// `backups/config_<stamp>.toml` beside `path`; later attempts within the
/// same second get a `_<attempt>` suffix.
fn backup_path(path: &Path, now: OffsetDateTime, attempt: u32) -> PathBuf {
    let stamp = now
        .format(format_description!("[year][month][day]_[hour][minute][second]"))
        .unwrap_or_else(|_| now.unix_timestamp().to_string());
    let file_name = match attempt {
        0 => format!("config_{}.toml", stamp),
        n => format!("config_{}_{}.toml", stamp, n),
    };
    path.parent()
        .unwrap_or_else(|| Path::new("."))
        .join(BACKUP_DIR)
        .join(file_name)
}

/// Copy `path` into a backup file that did not exist before.
fn write_backup(path: &Path, now: OffsetDateTime) -> Result<PathBuf, ConfigError> {
    let content = std::fs::read(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    create_parent(&backup_path(path, now, 0))?;

    let mut attempt = 0;
    loop {
        let backup = backup_path(path, now, attempt);
        match OpenOptions::new().write(true).create_new(true).open(&backup) {
            Ok(mut file) => {
                file.write_all(&content).map_err(|e| ConfigError::Write {
                    path: backup.clone(),
                    source: e,
                })?;
                return Ok(backup);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => {
                return Err(ConfigError::Write {
                    path: backup,
                    source: e,
                });
            }
        }
    }
}

fn create_parent(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No configuration found at {}", .0.display())]
    Missing(PathBuf),
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid value for {var}: '{value}'")]
    Env { var: &'static str, value: String },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The offending field (e.g., `mac`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default config file: `<config dir>/aranet4-mcp/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("aranet4-mcp")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use time::macros::datetime;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config::new("AA:BB:CC:DD:EE:FF", "office", temp_dir.path().join("a.db"));
        config.use_local_tz = false;
        assert_eq!(config.save(&path).unwrap(), None);

        let loaded = Config::load_with_env(&path, no_env).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        let err = Config::load_with_env(&path, no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn test_partial_file_is_missing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "mac = \"AA:BB:CC:DD:EE:FF\"\n").unwrap();
        let err = Config::load_with_env(&path, no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn test_env_only_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("absent.toml");
        let env = env_from(&[
            (ENV_MAC, "AA:BB:CC:DD:EE:FF"),
            (ENV_NAME, "kitchen"),
            (ENV_DB_PATH, "/data/aranet4.db"),
            (ENV_USE_LOCAL_TZ, "false"),
        ]);

        let config = Config::load_with_env(&path, env).unwrap();
        assert_eq!(config.name, "kitchen");
        assert_eq!(config.db_path, PathBuf::from("/data/aranet4.db"));
        assert!(!config.use_local_tz);
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        Config::new("AA:BB:CC:DD:EE:FF", "office", "/tmp/a.db")
            .save(&path)
            .unwrap();

        let env = env_from(&[(ENV_NAME, "bedroom"), (ENV_MAC, "  ")]);
        let config = Config::load_with_env(&path, env).unwrap();
        assert_eq!(config.name, "bedroom");
        assert_eq!(config.mac, "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_bad_use_local_tz_env() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        let env = env_from(&[
            (ENV_MAC, "AA:BB:CC:DD:EE:FF"),
            (ENV_NAME, "office"),
            (ENV_USE_LOCAL_TZ, "maybe"),
        ]);
        let err = Config::load_with_env(&path, env).unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }

    #[test]
    fn test_defaults_when_fields_absent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "mac = \"AA:BB:CC:DD:EE:FF\"\nname = \"office\"\n").unwrap();

        let config = Config::load_with_env(&path, no_env).unwrap();
        assert!(config.use_local_tz);
        assert_eq!(config.db_path, expand_tilde(&aranet_store::default_db_path()));
    }

    #[test]
    fn test_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "mac = [").unwrap();
        let err = Config::load_with_env(&path, no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validate_mac() {
        let ok = Config::new("aa-bb-cc-dd-ee-ff", "office", "/tmp/a.db");
        assert!(ok.validate().is_ok());

        let mac_os = Config::new("5C1F6E0A-3D8B-4B3B-9C1E-2F7A5E9D0B11", "office", "/tmp/a.db");
        assert!(mac_os.validate().is_ok());

        let bad = Config::new("not-a-mac", "office", "/tmp/a.db");
        let err = bad.validate().unwrap_err();
        assert!(err.to_string().contains("mac"));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let config = Config::new("", " ", "");
        match config.validate() {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn test_save_rejects_invalid_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        let config = Config::new("xyz", "office", "/tmp/a.db");
        assert!(config.save(&path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_save_backs_up_previous_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");

        Config::new("AA:BB:CC:DD:EE:FF", "office", "/tmp/a.db")
            .save(&path)
            .unwrap();
        let backup = Config::new("11:22:33:44:55:66", "bedroom", "/tmp/b.db")
            .save(&path)
            .unwrap()
            .expect("expected a backup");

        assert!(backup.starts_with(temp_dir.path().join(BACKUP_DIR)));
        let old = Config::load_with_env(&backup, no_env).unwrap();
        assert_eq!(old.name, "office");
        let current = Config::load_with_env(&path, no_env).unwrap();
        assert_eq!(current.name, "bedroom");
    }

    #[test]
    fn test_backup_file_name() {
        let config = Path::new("/etc/aranet4-mcp/config.toml");
        let now = datetime!(2024-05-06 07:08:09 UTC);
        assert_eq!(
            backup_path(config, now, 0),
            PathBuf::from("/etc/aranet4-mcp/backups/config_20240506_070809.toml")
        );
        assert_eq!(
            backup_path(config, now, 2),
            PathBuf::from("/etc/aranet4-mcp/backups/config_20240506_070809_2.toml")
        );
    }

    #[test]
    fn test_backups_within_one_second_are_kept() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        let now = datetime!(2024-05-06 07:08:09 UTC);

        Config::new("AA:BB:CC:DD:EE:FF", "first", "/tmp/a.db")
            .save(&path)
            .unwrap();
        let first = write_backup(&path, now).unwrap();
        Config::new("AA:BB:CC:DD:EE:FF", "second", "/tmp/a.db")
            .save(&path)
            .unwrap();
        let second = write_backup(&path, now).unwrap();

        assert_ne!(first, second);
        assert_eq!(Config::load_with_env(&first, no_env).unwrap().name, "first");
        assert_eq!(Config::load_with_env(&second, no_env).unwrap().name, "second");
    }

    #[test]
    fn test_rapid_saves_keep_every_backup() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");

        for name in ["a", "b", "c", "d"] {
            Config::new("AA:BB:CC:DD:EE:FF", name, "/tmp/a.db")
                .save(&path)
                .unwrap();
        }

        let mut names: Vec<String> = std::fs::read_dir(temp_dir.path().join(BACKUP_DIR))
            .unwrap()
            .map(|entry| Config::load_with_env(entry.unwrap().path(), no_env).unwrap().name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde(Path::new("/abs/a.db")), PathBuf::from("/abs/a.db"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/a.db")), home.join("a.db"));
        }
    }

    #[test]
    fn test_default_config_path() {
        assert!(default_config_path().ends_with("aranet4-mcp/config.toml"));
    }
}
