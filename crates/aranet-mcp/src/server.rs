//! MCP tool surface.
//!
//! Every call is independent: the config file and the database are opened
//! inside the request and released before it returns. Tool failures come
//! back as error results; they never stop the server.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rmcp::{Error as McpError, RoleServer, ServerHandler, model::*, service::RequestContext};
use schemars::{JsonSchema, SchemaGenerator};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use aranet_core::{BleLink, SensorLink};
use aranet_store::Store;
use aranet_types::{Measurement, Sensor};

use crate::config::{
    Config, ConfigError, ENV_DB_PATH, ENV_MAC, ENV_NAME, ENV_USE_LOCAL_TZ, expand_tilde,
};
use crate::error::{ToolError, ToolResult};
use crate::format::{Zone, format_scan_text, parse_datetime, parse_range_end};
use crate::plot;
use crate::report::{self, FetchReport, PlotSeries, Summary};

pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_RECENT: u32 = 20;
pub const MAX_RECENT: u32 = 10_000;
const MAX_SCAN_TIMEOUT_SECS: u64 = 60;
const MAX_FETCH_TIMEOUT_SECS: u64 = 600;

fn schema_for_type<T: JsonSchema>() -> serde_json::Map<String, serde_json::Value> {
    let schema = SchemaGenerator::default().into_root_schema_for::<T>();
    match serde_json::to_value(schema) {
        Ok(serde_json::Value::Object(object)) => object,
        _ => serde_json::Map::new(),
    }
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct ScanArgs {
    /// How long to listen for advertisements, in seconds (default 5)
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct FetchArgs {
    /// Upper bound for the whole download, in seconds (default 120)
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct RecentArgs {
    /// Number of most recent measurements (default 20, at most 10000)
    pub n: Option<u32>,
    /// Comma-separated sensors: temperature, humidity, pressure, CO2, or "all" (default)
    pub sensors: Option<String>,
    /// Also return a chart of the selected sensors
    pub output_plot: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DateArgs {
    /// Calendar day in the configured time zone, YYYY-MM-DD
    pub date: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RangeArgs {
    /// Start of the range, ISO datetime (e.g. 2024-01-01T08:00:00) or date
    pub start: String,
    /// End of the range, inclusive; a bare date covers the whole day
    pub end: String,
    /// Comma-separated sensors: temperature, humidity, pressure, CO2, or "all" (default)
    pub sensors: Option<String>,
    /// Maximum rows to return; longer ranges are thinned (default 100)
    pub limit: Option<usize>,
    /// Also return a chart of the selected sensors
    pub output_plot: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct PlotArgs {
    /// Start of the plot, ISO datetime or date
    pub from: String,
    /// End of the plot, inclusive; a bare date covers the whole day
    pub to: String,
    /// Comma-separated sensors, one panel each, or "all"; CO2 when omitted
    pub sensors: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ConfigureArgs {
    /// MAC address of the Aranet4 (the UUID reported by `scan_devices` on macOS)
    pub mac: String,
    /// Friendly name for the sensor, e.g. "office"
    pub name: String,
    /// SQLite database file; keeps the current one when omitted
    pub db_path: Option<String>,
    /// Show times in the local time zone instead of UTC
    pub use_local_tz: Option<bool>,
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct EmptyArgs {}

/// Lookup for `DEVICE_MAC`-style configuration overrides.
pub type EnvSource = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Aranet4 tool server, generic over the radio link.
pub struct Aranet4Server<L> {
    config_path: PathBuf,
    env: EnvSource,
    link: Arc<L>,
}

impl<L> Clone for Aranet4Server<L> {
    fn clone(&self) -> Self {
        Self {
            config_path: self.config_path.clone(),
            env: Arc::clone(&self.env),
            link: Arc::clone(&self.link),
        }
    }
}

impl<L: std::fmt::Debug> std::fmt::Debug for Aranet4Server<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aranet4Server")
            .field("config_path", &self.config_path)
            .field("link", &self.link)
            .finish_non_exhaustive()
    }
}

impl Aranet4Server<BleLink> {
    /// Server talking to real sensors over Bluetooth LE.
    pub fn bluetooth(config_path: impl Into<PathBuf>) -> Self {
        Self::new(config_path, BleLink::default())
    }
}

impl<L: SensorLink + 'static> Aranet4Server<L> {
    /// Server reading `config_path` with overrides from the process
    /// environment.
    pub fn new(config_path: impl Into<PathBuf>, link: L) -> Self {
        Self {
            config_path: config_path.into(),
            env: Arc::new(|key: &str| std::env::var(key).ok()),
            link: Arc::new(link),
        }
    }

    /// Take configuration overrides from `env` instead of the process
    /// environment.
    pub fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(env);
        self
    }

    /// Ignore environment overrides and read only the config file.
    pub fn without_env(self) -> Self {
        self.with_env(|_| None)
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    fn load_config(&self) -> Result<Config, ConfigError> {
        Config::load_with_env(&self.config_path, |key| (self.env)(key))
    }

    fn open_store(config: &Config) -> ToolResult<Store> {
        Ok(Store::open(&config.db_path)?)
    }

    pub fn tools() -> Vec<Tool> {
        vec![
            Tool {
                name: "scan_devices".into(),
                description: Some(
                    "Scan for nearby Aranet4 sensors and list their name, MAC address, signal strength and current reading".into(),
                ),
                input_schema: Arc::new(schema_for_type::<ScanArgs>()),
                annotations: None,
            },
            Tool {
                name: "fetch_new_data".into(),
                description: Some(
                    "Download measurements recorded since the last fetch from the configured Aranet4 into the local database".into(),
                ),
                input_schema: Arc::new(schema_for_type::<FetchArgs>()),
                annotations: None,
            },
            Tool {
                name: "get_recent".into(),
                description: Some(
                    "Summary and table of the most recent stored measurements, optionally restricted to selected sensors and with a chart".into(),
                ),
                input_schema: Arc::new(schema_for_type::<RecentArgs>()),
                annotations: None,
            },
            Tool {
                name: "get_on_date".into(),
                description: Some(
                    "Summary and table of the measurements stored for one calendar day".into(),
                ),
                input_schema: Arc::new(schema_for_type::<DateArgs>()),
                annotations: None,
            },
            Tool {
                name: "get_data_by_timerange".into(),
                description: Some(
                    "Stored measurements between two times, restricted to selected sensors and thinned to a row limit, optionally with a chart".into(),
                ),
                input_schema: Arc::new(schema_for_type::<RangeArgs>()),
                annotations: None,
            },
            Tool {
                name: "plot".into(),
                description: Some(
                    "Chart of the selected sensors (CO2 by default) between two times, one panel per sensor, as a PNG image".into(),
                ),
                input_schema: Arc::new(schema_for_type::<PlotArgs>()),
                annotations: None,
            },
            Tool {
                name: "configure".into(),
                description: Some(
                    "Set the Aranet4 to use (MAC address and name) and where to store its data".into(),
                ),
                input_schema: Arc::new(schema_for_type::<ConfigureArgs>()),
                annotations: None,
            },
            Tool {
                name: "get_configuration_and_db_stats".into(),
                description: Some(
                    "Show the current configuration and what the local database contains".into(),
                ),
                input_schema: Arc::new(schema_for_type::<EmptyArgs>()),
                annotations: None,
            },
        ]
    }

    /// Run tool `name` with `arguments`.
    ///
    /// Unknown tools are protocol errors; everything else becomes a tool
    /// result, failures included.
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call {} {:?}", name, arguments);
        let result = match name {
            "scan_devices" => match parse_args(arguments) {
                Ok(args) => self.scan_devices(args).await.map(text),
                Err(e) => Err(e),
            },
            "fetch_new_data" => match parse_args(arguments) {
                Ok(args) => self.fetch_new_data(args).await.map(text),
                Err(e) => Err(e),
            },
            "get_recent" => parse_args(arguments).and_then(|args| self.get_recent(args)),
            "get_on_date" => parse_args(arguments).and_then(|args| self.get_on_date(args)).map(text),
            "get_data_by_timerange" => {
                parse_args(arguments).and_then(|args| self.get_data_by_timerange(args))
            }
            "plot" => parse_args(arguments).and_then(|args| self.plot(args)),
            "configure" => parse_args(arguments).and_then(|args| self.configure(args)).map(text),
            "get_configuration_and_db_stats" => parse_args::<EmptyArgs>(arguments)
                .and_then(|_| self.get_configuration_and_db_stats())
                .map(text),
            other => {
                return Err(McpError::invalid_params(
                    format!("Unknown tool: {}", other),
                    None,
                ));
            }
        };

        Ok(match result {
            Ok(content) => CallToolResult::success(content),
            Err(e) => {
                warn!("Tool {} failed: {}", name, e);
                CallToolResult::error(vec![Content::text(e.to_string())])
            }
        })
    }

    pub async fn scan_devices(&self, args: ScanArgs) -> ToolResult<String> {
        let secs = args.timeout_secs.unwrap_or(DEFAULT_SCAN_TIMEOUT_SECS);
        if !(1..=MAX_SCAN_TIMEOUT_SECS).contains(&secs) {
            return Err(ToolError::InvalidArguments(format!(
                "timeout_secs must be between 1 and {}",
                MAX_SCAN_TIMEOUT_SECS
            )));
        }
        let devices = self.link.scan(Duration::from_secs(secs)).await?;
        info!("Scan found {} device(s)", devices.len());
        Ok(format_scan_text(&devices))
    }

    pub async fn fetch_new_data(&self, args: FetchArgs) -> ToolResult<String> {
        let secs = args.timeout_secs.unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS);
        if !(1..=MAX_FETCH_TIMEOUT_SECS).contains(&secs) {
            return Err(ToolError::InvalidArguments(format!(
                "timeout_secs must be between 1 and {}",
                MAX_FETCH_TIMEOUT_SECS
            )));
        }
        let config = self.load_config()?;
        let since = Self::open_store(&config)?.last_timestamp(&config.name)?;

        // The store is not held across the device exchange.
        let records = self
            .link
            .fetch_history(&config.mac, since, Duration::from_secs(secs))
            .await?;
        let rows: Vec<Measurement> = records
            .iter()
            .map(|record| Measurement::from_record(config.name.as_str(), record))
            .collect();

        let inserted = Self::open_store(&config)?.insert_many(&rows)?;
        info!(
            "Fetched {} records from {}, stored {} new",
            rows.len(),
            config.name,
            inserted
        );

        let fetch = FetchReport {
            device: config.name.clone(),
            since,
            until: rows
                .last()
                .map_or_else(OffsetDateTime::now_utc, |m| m.timestamp),
            fetched: rows.len(),
            inserted,
            summary: Summary::from_measurements(&rows),
        };
        Ok(fetch.to_text(Zone::from_config(config.use_local_tz)))
    }

    pub fn get_recent(&self, args: RecentArgs) -> ToolResult<Vec<Content>> {
        let n = args.n.unwrap_or(DEFAULT_RECENT);
        if !(1..=MAX_RECENT).contains(&n) {
            return Err(ToolError::InvalidArguments(format!(
                "n must be between 1 and {}",
                MAX_RECENT
            )));
        }
        let sensors = parse_sensors(args.sensors.as_deref(), &Sensor::ALL)?;
        let config = self.load_config()?;
        let zone = Zone::from_config(config.use_local_tz);
        let store = Self::open_store(&config)?;

        let mut content = text(report::answer_recent(&store, &config.name, n, &sensors, zone)?);
        if args.output_plot.unwrap_or(false) {
            let rows = report::recent_rows(&store, &config.name, n)?;
            let series = PlotSeries::from_measurements(&rows, &sensors)?;
            content.push(chart(&series, zone)?);
        }
        Ok(content)
    }

    pub fn get_on_date(&self, args: DateArgs) -> ToolResult<String> {
        let config = self.load_config()?;
        let store = Self::open_store(&config)?;
        report::answer_on_date(
            &store,
            &config.name,
            &args.date,
            Zone::from_config(config.use_local_tz),
        )
    }

    pub fn get_data_by_timerange(&self, args: RangeArgs) -> ToolResult<Vec<Content>> {
        let config = self.load_config()?;
        let zone = Zone::from_config(config.use_local_tz);
        let from = parse_datetime(&args.start, zone)?;
        let to = parse_range_end(&args.end, zone)?;
        let sensors = parse_sensors(args.sensors.as_deref(), &Sensor::ALL)?;
        let limit = args.limit.unwrap_or(report::DEFAULT_TABLE_LIMIT);

        let store = Self::open_store(&config)?;
        let mut content = text(report::answer_range(
            &store,
            &config.name,
            from,
            to,
            &sensors,
            limit,
            zone,
        )?);
        if args.output_plot.unwrap_or(false) {
            let series = report::prepare_plot(&store, &config.name, from, to, &sensors, zone)?;
            content.push(chart(&series, zone)?);
        }
        Ok(content)
    }

    pub fn plot(&self, args: PlotArgs) -> ToolResult<Vec<Content>> {
        let config = self.load_config()?;
        let zone = Zone::from_config(config.use_local_tz);
        let from = parse_datetime(&args.from, zone)?;
        let to = parse_range_end(&args.to, zone)?;
        let sensors = parse_sensors(args.sensors.as_deref(), &[Sensor::Co2])?;

        let store = Self::open_store(&config)?;
        let series = report::prepare_plot(&store, &config.name, from, to, &sensors, zone)?;
        Ok(vec![Content::text(series.caption(zone)), chart(&series, zone)?])
    }

    pub fn configure(&self, args: ConfigureArgs) -> ToolResult<String> {
        // Omitted settings keep their file values, not their overrides.
        let current = match Config::load_with_env(&self.config_path, |_| None) {
            Ok(config) => Some(config),
            Err(ConfigError::Missing(_)) => None,
            Err(e) => {
                warn!("Replacing unreadable config: {}", e);
                None
            }
        };

        let db_path = match (args.db_path, &current) {
            (Some(path), _) => expand_tilde(Path::new(&path)),
            (None, Some(current)) => current.db_path.clone(),
            (None, None) => aranet_store::default_db_path(),
        };
        let mut config = Config::new(args.mac.trim(), args.name.trim(), db_path);
        config.use_local_tz = args
            .use_local_tz
            .or(current.as_ref().map(|c| c.use_local_tz))
            .unwrap_or(config.use_local_tz);

        let backup = config.save(&self.config_path)?;
        let shadowed = self.shadowed_fields(&config)?;
        if !shadowed.is_empty() {
            return Err(ToolError::InvalidConfig(format!(
                "saved to {}, but environment variables override it and stay in effect: {}. \
                 Unset them for the new settings to apply",
                self.config_path.display(),
                shadowed.join(", ")
            )));
        }
        let mut message = format!(
            "Configuration saved to {}:\n{}",
            self.config_path.display(),
            to_json(&config)
        );
        if let Some(backup) = backup {
            message.push_str(&format!(
                "\nThe previous configuration was backed up to {}.",
                backup.display()
            ));
        }
        Ok(message)
    }

    /// Settings of `saved` that an environment override replaces, as
    /// `VAR=value` entries.
    fn shadowed_fields(&self, saved: &Config) -> ToolResult<Vec<String>> {
        let effective = self.load_config()?;
        let mut shadowed = Vec::new();
        if effective.mac != saved.mac {
            shadowed.push(format!("{}={}", ENV_MAC, effective.mac));
        }
        if effective.name != saved.name {
            shadowed.push(format!("{}={}", ENV_NAME, effective.name));
        }
        if effective.db_path != saved.db_path {
            shadowed.push(format!("{}={}", ENV_DB_PATH, effective.db_path.display()));
        }
        if effective.use_local_tz != saved.use_local_tz {
            shadowed.push(format!("{}={}", ENV_USE_LOCAL_TZ, effective.use_local_tz));
        }
        Ok(shadowed)
    }

    pub fn get_configuration_and_db_stats(&self) -> ToolResult<String> {
        let config = self.load_config()?;
        let stats = Self::open_store(&config)?.stats()?;
        Ok(format!(
            "# Configuration\n\n{}\n\n# Database\n\n{}",
            to_json(&config),
            to_json(&stats)
        ))
    }
}

fn parse_args<T: DeserializeOwned>(
    arguments: serde_json::Map<String, serde_json::Value>,
) -> ToolResult<T> {
    serde_json::from_value(serde_json::Value::Object(arguments))
        .map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

fn parse_sensors(list: Option<&str>, default: &[Sensor]) -> ToolResult<Vec<Sensor>> {
    match list {
        Some(list) => Ok(Sensor::parse_list(list)?),
        None => Ok(default.to_vec()),
    }
}

/// PNG chart content sized to the number of panels.
fn chart(series: &PlotSeries, zone: Zone) -> ToolResult<Content> {
    let (width, height) = plot::default_size(series.channels.len());
    let png = plot::render_png(series, zone, width, height)?;
    debug!(
        "Rendered {} points x {} sensors into {} bytes",
        series.len(),
        series.channels.len(),
        png.len()
    );
    Ok(Content::image(STANDARD.encode(&png), "image/png"))
}

fn text(body: String) -> Vec<Content> {
    vec![Content::text(body)]
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unserializable: {}>", e))
}

impl<L: SensorLink + 'static> ServerHandler for Aranet4Server<L> {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Reads CO2, temperature, humidity and pressure history from an Aranet4 sensor into a local database. \
                 Start with `scan_devices` and `configure`, then `fetch_new_data` before querying."
                    .into(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: Self::tools(),
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let arguments = request.arguments.unwrap_or_default();
        self.dispatch(request.name.as_ref(), arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aranet_core::{MockFailure, MockLink};
    use aranet_types::HistoryRecord;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use time::macros::datetime;

    const MAC: &str = "AA:BB:CC:DD:EE:FF";

    fn record(ts: OffsetDateTime, co2: u16) -> HistoryRecord {
        HistoryRecord {
            timestamp: ts,
            co2,
            temperature: 21.5,
            pressure: 1012.3,
            humidity: 41,
        }
    }

    fn history() -> Vec<HistoryRecord> {
        vec![
            record(datetime!(2024-01-01 08:00:00 UTC), 600),
            record(datetime!(2024-01-01 12:00:00 UTC), 800),
            record(datetime!(2024-01-01 18:00:00 UTC), 1000),
        ]
    }

    struct Fixture {
        dir: TempDir,
        server: Aranet4Server<MockLink>,
    }

    impl Fixture {
        fn unconfigured() -> Self {
            let dir = TempDir::new().unwrap();
            let server =
                Aranet4Server::new(dir.path().join("config.toml"), MockLink::new()).without_env();
            Self { dir, server }
        }

        async fn configured() -> Self {
            let fixture = Self::unconfigured();
            let mut config = Config::new(MAC, "office", fixture.dir.path().join("aranet4.db"));
            config.use_local_tz = false;
            config.save(fixture.dir.path().join("config.toml")).unwrap();
            fixture
                .server
                .link()
                .add_device_at("Aranet4 1A2B3", MAC, history())
                .await;
            fixture
        }

        async fn call(&self, name: &str, args: Value) -> CallToolResult {
            let Value::Object(map) = args else {
                panic!("arguments must be an object");
            };
            self.server.dispatch(name, map).await.unwrap()
        }
    }

    fn content_json(result: &CallToolResult) -> Vec<Value> {
        result
            .content
            .iter()
            .map(|c| serde_json::to_value(c).unwrap())
            .collect()
    }

    fn body(result: &CallToolResult) -> String {
        content_json(result)[0]["text"].as_str().unwrap().to_string()
    }

    fn is_error(result: &CallToolResult) -> bool {
        result.is_error == Some(true)
    }

    #[test]
    fn test_tool_list() {
        let tools = Aranet4Server::<MockLink>::tools();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_ref()).collect();
        assert_eq!(
            names,
            [
                "scan_devices",
                "fetch_new_data",
                "get_recent",
                "get_on_date",
                "get_data_by_timerange",
                "plot",
                "configure",
                "get_configuration_and_db_stats",
            ]
        );
        let date = &tools[3].input_schema;
        assert!(date["properties"]["date"].is_object());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_protocol_error() {
        let fixture = Fixture::unconfigured();
        let map = serde_json::Map::new();
        assert!(fixture.server.dispatch("make_coffee", map).await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_arguments() {
        let fixture = Fixture::configured().await;
        let result = fixture.call("get_on_date", json!({ "day": "2024-01-01" })).await;
        assert!(is_error(&result));
        assert!(body(&result).starts_with("Invalid arguments"));
    }

    #[tokio::test]
    async fn test_missing_config() {
        let fixture = Fixture::unconfigured();
        let result = fixture.call("fetch_new_data", json!({})).await;
        assert!(is_error(&result));
        assert!(body(&result).contains("configure"));
    }

    #[tokio::test]
    async fn test_scan_empty_is_success() {
        let fixture = Fixture::unconfigured();
        let result = fixture.call("scan_devices", json!({ "timeout_secs": 1 })).await;
        assert!(!is_error(&result));
        assert_eq!(body(&result), crate::format::NO_DEVICES_FOUND);
    }

    #[tokio::test]
    async fn test_scan_lists_devices() {
        let fixture = Fixture::configured().await;
        let result = fixture.call("scan_devices", json!({})).await;
        assert!(body(&result).contains(MAC));
        assert_eq!(fixture.server.link().scan_count(), 1);
    }

    #[tokio::test]
    async fn test_scan_rejects_bad_timeout() {
        let fixture = Fixture::unconfigured();
        let result = fixture.call("scan_devices", json!({ "timeout_secs": 0 })).await;
        assert!(is_error(&result));
        assert_eq!(fixture.server.link().scan_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_then_query() {
        let fixture = Fixture::configured().await;

        let result = fixture.call("fetch_new_data", json!({})).await;
        assert!(!is_error(&result), "{}", body(&result));
        let text = body(&result);
        assert!(text.starts_with("Fetched 3 measurements from 'office'"));
        assert!(text.contains("3 new rows"));
        assert_eq!(fixture.server.link().last_since().await, Some(None));

        let result = fixture.call("get_on_date", json!({ "date": "2024-01-01" })).await;
        let text = body(&result);
        assert!(text.contains("min 600 ppm"));
        assert!(text.contains("max 1000 ppm"));
        assert!(text.contains("avg 800 ppm"));

        let result = fixture.call("get_recent", json!({ "n": 2 })).await;
        assert!(body(&result).contains("Last 2 measurements"));
    }

    #[tokio::test]
    async fn test_fetch_resumes_from_last_stored() {
        let fixture = Fixture::configured().await;
        fixture.call("fetch_new_data", json!({})).await;

        fixture
            .server
            .link()
            .push_history(MAC, vec![record(datetime!(2024-01-01 18:05:00 UTC), 900)])
            .await;
        let result = fixture.call("fetch_new_data", json!({})).await;
        assert!(body(&result).starts_with("Fetched 1 measurements"));
        assert_eq!(
            fixture.server.link().last_since().await,
            Some(Some(datetime!(2024-01-01 18:00:00 UTC)))
        );

        let result = fixture.call("get_configuration_and_db_stats", json!({})).await;
        assert!(body(&result).contains("\"total_measurements\": 4"));
    }

    #[tokio::test]
    async fn test_fetch_device_busy() {
        let fixture = Fixture::configured().await;
        fixture.server.link().set_failure(Some(MockFailure::Busy)).await;
        let result = fixture.call("fetch_new_data", json!({})).await;
        assert!(is_error(&result));
        assert!(body(&result).contains("busy"));
    }

    #[tokio::test]
    async fn test_fetch_device_unreachable() {
        let fixture = Fixture::configured().await;
        fixture
            .server
            .link()
            .set_failure(Some(MockFailure::Unreachable))
            .await;
        let result = fixture.call("fetch_new_data", json!({})).await;
        assert!(is_error(&result));
        assert!(body(&result).starts_with("Could not reach the sensor"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_stores_nothing() {
        let fixture = Fixture::configured().await;
        fixture.server.link().set_failure(Some(MockFailure::Timeout)).await;
        let result = fixture.call("fetch_new_data", json!({ "timeout_secs": 3 })).await;
        assert!(is_error(&result));

        let result = fixture.call("get_recent", json!({})).await;
        assert!(body(&result).starts_with("No data found"));
    }

    #[tokio::test]
    async fn test_get_on_date_no_data() {
        let fixture = Fixture::configured().await;
        fixture.call("fetch_new_data", json!({})).await;
        let result = fixture.call("get_on_date", json!({ "date": "2023-06-01" })).await;
        assert!(is_error(&result));
        assert_eq!(body(&result), "No data found for 2023-06-01");
    }

    #[tokio::test]
    async fn test_get_recent_bounds() {
        let fixture = Fixture::configured().await;
        let result = fixture.call("get_recent", json!({ "n": 0 })).await;
        assert!(is_error(&result));
        let result = fixture.call("get_recent", json!({ "n": 10_001 })).await;
        assert!(is_error(&result));
    }

    #[tokio::test]
    async fn test_timerange_with_sensors() {
        let fixture = Fixture::configured().await;
        fixture.call("fetch_new_data", json!({})).await;
        let result = fixture
            .call(
                "get_data_by_timerange",
                json!({ "start": "2024-01-01T00:00:00", "end": "2024-01-01", "sensors": "co2" }),
            )
            .await;
        assert!(!is_error(&result), "{}", body(&result));
        let text = body(&result);
        assert!(text.contains("timestamp | CO2"));
        assert!(!text.contains("temperature |"));

        let result = fixture
            .call(
                "get_data_by_timerange",
                json!({ "start": "2024-01-01", "end": "2024-01-01", "sensors": "radon" }),
            )
            .await;
        assert!(is_error(&result));
    }

    #[tokio::test]
    async fn test_plot_returns_png() {
        let fixture = Fixture::configured().await;
        fixture.call("fetch_new_data", json!({})).await;
        let result = fixture
            .call("plot", json!({ "from": "2024-01-01", "to": "2024-01-01" }))
            .await;
        assert!(!is_error(&result));

        let content = content_json(&result);
        assert_eq!(content.len(), 2);
        assert!(content[0]["text"].as_str().unwrap().contains("3 points"));
        assert_eq!(content[1]["type"], "image");
        assert_eq!(content[1]["mimeType"], "image/png");
        let png = STANDARD.decode(content[1]["data"].as_str().unwrap()).unwrap();
        assert_eq!(&png[..4], b"\x89PNG");
    }

    #[tokio::test]
    async fn test_plot_without_data() {
        let fixture = Fixture::configured().await;
        let result = fixture
            .call("plot", json!({ "from": "2024-01-01", "to": "2024-01-02" }))
            .await;
        assert!(is_error(&result));
        assert!(body(&result).starts_with("No data found"));
    }

    #[tokio::test]
    async fn test_configure_writes_and_backs_up() {
        let fixture = Fixture::unconfigured();
        let db = fixture.dir.path().join("data.db");

        let result = fixture
            .call(
                "configure",
                json!({ "mac": MAC, "name": "office", "db_path": db.to_str().unwrap() }),
            )
            .await;
        assert!(!is_error(&result), "{}", body(&result));
        assert!(!body(&result).contains("backed up"));

        let result = fixture
            .call("configure", json!({ "mac": MAC, "name": "bedroom" }))
            .await;
        assert!(body(&result).contains("backed up"));

        let config = Config::load_with_env(fixture.dir.path().join("config.toml"), |_| None).unwrap();
        assert_eq!(config.name, "bedroom");
        assert_eq!(config.db_path, db);
    }

    #[tokio::test]
    async fn test_configure_rejects_bad_mac() {
        let fixture = Fixture::unconfigured();
        let result = fixture
            .call("configure", json!({ "mac": "not-a-mac", "name": "office" }))
            .await;
        assert!(is_error(&result));
        assert!(body(&result).starts_with("Invalid configuration"));
        assert!(!fixture.dir.path().join("config.toml").exists());
    }

    #[tokio::test]
    async fn test_stats_on_empty_store() {
        let fixture = Fixture::configured().await;
        let result = fixture.call("get_configuration_and_db_stats", json!({})).await;
        assert!(!is_error(&result));
        let text = body(&result);
        assert!(text.contains("\"name\": \"office\""));
        assert!(text.contains("\"total_measurements\": 0"));
    }

    fn image_content(result: &CallToolResult) -> Option<Vec<u8>> {
        content_json(result)
            .iter()
            .find(|c| c["type"] == "image")
            .map(|c| STANDARD.decode(c["data"].as_str().unwrap()).unwrap())
    }

    #[tokio::test]
    async fn test_bluetooth_server_serves_tools() {
        let dir = TempDir::new().unwrap();
        let server = Aranet4Server::bluetooth(dir.path().join("config.toml")).without_env();
        assert_eq!(Aranet4Server::<BleLink>::tools().len(), 8);

        let result = server
            .dispatch("get_configuration_and_db_stats", serde_json::Map::new())
            .await
            .unwrap();
        assert!(is_error(&result));
        assert!(body(&result).contains("configure"));
    }

    #[tokio::test]
    async fn test_get_recent_sensor_selection_and_plot() {
        let fixture = Fixture::configured().await;
        fixture.call("fetch_new_data", json!({})).await;

        let result = fixture
            .call("get_recent", json!({ "n": 3, "sensors": "co2,humidity" }))
            .await;
        assert!(!is_error(&result), "{}", body(&result));
        assert!(body(&result).contains("timestamp | humidity | CO2\n"));
        assert!(image_content(&result).is_none());

        let result = fixture
            .call("get_recent", json!({ "sensors": "temperature", "output_plot": true }))
            .await;
        assert!(!is_error(&result), "{}", body(&result));
        let png = image_content(&result).unwrap();
        let image = image::load_from_memory(&png).unwrap();
        assert_eq!(image.height(), plot::default_size(1).1);

        let result = fixture.call("get_recent", json!({ "sensors": "radon" })).await;
        assert!(is_error(&result));
    }

    #[tokio::test]
    async fn test_timerange_with_plot() {
        let fixture = Fixture::configured().await;
        fixture.call("fetch_new_data", json!({})).await;
        let result = fixture
            .call(
                "get_data_by_timerange",
                json!({ "start": "2024-01-01", "end": "2024-01-01", "output_plot": true }),
            )
            .await;
        assert!(!is_error(&result), "{}", body(&result));
        let png = image_content(&result).unwrap();
        let image = image::load_from_memory(&png).unwrap();
        assert_eq!(image.height(), plot::default_size(4).1);
    }

    #[tokio::test]
    async fn test_plot_one_panel_per_selected_sensor() {
        let fixture = Fixture::configured().await;
        fixture.call("fetch_new_data", json!({})).await;
        let result = fixture
            .call(
                "plot",
                json!({ "from": "2024-01-01", "to": "2024-01-01", "sensors": "temperature,co2" }),
            )
            .await;
        assert!(!is_error(&result), "{}", body(&result));

        let caption = body(&result);
        assert!(caption.starts_with("temperature, CO2 from"));
        assert!(caption.contains("- CO2: min 600 ppm, max 1000 ppm"));
        assert!(caption.contains("- temperature: min 21.5 °C, max 21.5 °C"));

        let image = image::load_from_memory(&image_content(&result).unwrap())
            .unwrap()
            .to_rgb8();
        assert_eq!(image.dimensions(), plot::default_size(2));
        for sensor in [Sensor::Temperature, Sensor::Co2] {
            let color = plot::sensor_color(sensor);
            let wanted = image::Rgb([color.0, color.1, color.2]);
            assert!(image.pixels().any(|p| *p == wanted), "{:?} not drawn", sensor);
        }
    }

    #[tokio::test]
    async fn test_queries_only_read_the_configured_device() {
        let fixture = Fixture::configured().await;
        fixture.call("fetch_new_data", json!({})).await;
        let bedroom = Measurement {
            device_id: "bedroom".into(),
            timestamp: datetime!(2024-01-01 20:00:00 UTC),
            co2: 2222,
            temperature: 19.0,
            humidity: 55,
            pressure: 1000.0,
        };
        Store::open(fixture.dir.path().join("aranet4.db"))
            .unwrap()
            .insert_many(&[bedroom])
            .unwrap();

        let result = fixture.call("get_recent", json!({})).await;
        let text = body(&result);
        assert!(text.starts_with("# Last 3 measurements"));
        assert!(!text.contains("2222"));

        let result = fixture.call("get_on_date", json!({ "date": "2024-01-01" })).await;
        assert!(body(&result).contains("max 1000 ppm"));

        let result = fixture
            .call(
                "get_data_by_timerange",
                json!({ "start": "2024-01-01", "end": "2024-01-01", "sensors": "co2" }),
            )
            .await;
        assert!(!body(&result).contains("2222"));

        let result = fixture
            .call("plot", json!({ "from": "2024-01-01", "to": "2024-01-01" }))
            .await;
        assert!(body(&result).contains("max 1000 ppm"));

        let result = fixture.call("get_configuration_and_db_stats", json!({})).await;
        assert!(body(&result).contains("\"total_measurements\": 4"));
    }

    #[tokio::test]
    async fn test_configure_reports_environment_override() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let server = Aranet4Server::new(&path, MockLink::new())
            .with_env(|key| (key == "DEVICE_NAME").then(|| "from_env".to_string()));

        let result = server
            .dispatch(
                "configure",
                json!({ "mac": MAC, "name": "bedroom", "db_path": dir.path().join("a.db") })
                    .as_object()
                    .unwrap()
                    .clone(),
            )
            .await
            .unwrap();
        assert!(is_error(&result));
        let text = body(&result);
        assert!(text.contains("DEVICE_NAME=from_env"), "{}", text);
        assert!(!text.contains("DEVICE_MAC"));

        // The file holds the requested value; the override still wins.
        let saved = Config::load_with_env(&path, |_| None).unwrap();
        assert_eq!(saved.name, "bedroom");
        let result = server
            .dispatch("get_configuration_and_db_stats", serde_json::Map::new())
            .await
            .unwrap();
        assert!(body(&result).contains("\"name\": \"from_env\""));
    }

    #[tokio::test]
    async fn test_configure_without_overrides_succeeds() {
        let dir = TempDir::new().unwrap();
        let server = Aranet4Server::new(dir.path().join("config.toml"), MockLink::new())
            .with_env(|key| (key == "UNRELATED").then(|| "1".to_string()));
        let result = server
            .dispatch(
                "configure",
                json!({ "mac": MAC, "name": "office", "db_path": dir.path().join("a.db") })
                    .as_object()
                    .unwrap()
                    .clone(),
            )
            .await
            .unwrap();
        assert!(!is_error(&result), "{}", body(&result));
        assert!(body(&result).starts_with("Configuration saved to"));
    }
}
