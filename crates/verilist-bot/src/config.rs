//! Bot configuration loading from file and environment variables.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use verilist_engine::Pacing;
use verilist_types::VerifierProfile;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub account: AccountConfig,

    #[serde(default)]
    pub endpoints: EndpointsConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Health and status endpoint, served while watching.
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub pacing: PacingConfig,

    #[serde(default)]
    pub backfill: BackfillConfig,

    #[serde(default)]
    pub lists: ListsConfig,

    #[serde(default)]
    pub announcements: AnnouncementsConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default)]
    pub blacklist: BlacklistConfig,

    /// Known verifiers and the lists their subjects go to.
    #[serde(default)]
    pub verifiers: Vec<VerifierProfile>,
}

/// Credentials of the account that owns the lists and writes the posts.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    #[serde(default)]
    pub identifier: String,

    #[serde(default)]
    pub password: String,

    /// PDS hosting the account.
    #[serde(default = "default_service")]
    pub service: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_jetstream")]
    pub jetstream: String,

    /// Public app view used for profile lookups.
    #[serde(default = "default_appview")]
    pub appview: String,

    /// Backlink index consulted before every side effect.
    #[serde(default = "default_constellation")]
    pub constellation: String,

    #[serde(default = "default_plc_directory")]
    pub plc_directory: String,

    /// Used for backfill when a verifier's PDS cannot be resolved.
    #[serde(default = "default_service")]
    pub default_pds: String,

    #[serde(default = "default_chat_proxy")]
    pub chat_proxy: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "verilist_engine=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamConfig {
    /// Start position (`time_us`) overriding the stored checkpoint.
    #[serde(default)]
    pub cursor: Option<i64>,

    #[serde(default)]
    pub reconnect_delay_ms: Option<u64>,

    /// Unset retries forever.
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
}

/// Minimum spacing between calls, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct PacingConfig {
    #[serde(default = "default_sink_ms")]
    pub sink_ms: u64,

    #[serde(default = "default_record_ms")]
    pub record_ms: u64,

    #[serde(default = "default_page_ms")]
    pub page_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackfillConfig {
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,

    /// Verifiers walked in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Whether backfilled verifications are announced.
    #[serde(default)]
    pub announce: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListsConfig {
    /// Record key of the list every verified account is added to.
    #[serde(default = "default_catch_all")]
    pub catch_all: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnnouncementsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifyConfig {
    /// DID that receives a DM when an unknown verifier shows up.
    #[serde(default)]
    pub operator: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlacklistConfig {
    /// Verifier DIDs whose events are ignored.
    #[serde(default)]
    pub verifiers: Vec<String>,
}

fn default_service() -> String {
    "https://bsky.social".to_string()
}

fn default_jetstream() -> String {
    "wss://jetstream2.us-east.bsky.network/subscribe".to_string()
}

fn default_appview() -> String {
    "https://public.api.bsky.app".to_string()
}

fn default_constellation() -> String {
    "https://constellation.microcosm.blue".to_string()
}

fn default_plc_directory() -> String {
    verilist_atproto::DEFAULT_PLC_DIRECTORY.to_string()
}

fn default_chat_proxy() -> String {
    verilist_atproto::DEFAULT_CHAT_PROXY.to_string()
}

fn default_db_path() -> String {
    "verilist.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_sink_ms() -> u64 {
    100
}

fn default_record_ms() -> u64 {
    50
}

fn default_page_ms() -> u64 {
    1_000
}

fn default_page_limit() -> u32 {
    100
}

fn default_concurrency() -> usize {
    4
}

fn default_catch_all() -> String {
    "3lngcmewutk2z".to_string()
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            identifier: String::new(),
            password: String::new(),
            service: default_service(),
        }
    }
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            jetstream: default_jetstream(),
            appview: default_appview(),
            constellation: default_constellation(),
            plc_directory: default_plc_directory(),
            default_pds: default_service(),
            chat_proxy: default_chat_proxy(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            sink_ms: default_sink_ms(),
            record_ms: default_record_ms(),
            page_ms: default_page_ms(),
        }
    }
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            page_limit: default_page_limit(),
            concurrency: default_concurrency(),
            announce: false,
        }
    }
}

impl Default for ListsConfig {
    fn default() -> Self {
        Self {
            catch_all: default_catch_all(),
        }
    }
}

impl Default for AnnouncementsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl PacingConfig {
    pub fn to_pacing(&self) -> Pacing {
        Pacing {
            sink: Duration::from_millis(self.sink_ms),
            record: Duration::from_millis(self.record_ms),
            page: Duration::from_millis(self.page_ms),
        }
    }
}

impl StreamConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms.unwrap_or(5_000))
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `VERILIST_IDENTIFIER`, `VERILIST_PASSWORD`, `VERILIST_SERVICE` override `account.*`
/// - `VERILIST_DB_PATH` overrides `database.path`
/// - `VERILIST_LOG_LEVEL` overrides `logging.level`
/// - `VERILIST_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `VERILIST_CURSOR` overrides `stream.cursor`
/// - `VERILIST_HOST`, `VERILIST_PORT` override `server.*`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies `VERILIST_*` overrides read through `var`.
///
/// Unparseable numeric values are ignored.
pub fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(identifier) = var("VERILIST_IDENTIFIER") {
        config.account.identifier = identifier;
    }
    if let Some(password) = var("VERILIST_PASSWORD") {
        config.account.password = password;
    }
    if let Some(service) = var("VERILIST_SERVICE") {
        config.account.service = service;
    }
    if let Some(db_path) = var("VERILIST_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("VERILIST_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("VERILIST_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(cursor) = var("VERILIST_CURSOR") {
        if let Ok(parsed) = cursor.trim().parse() {
            config.stream.cursor = Some(parsed);
        }
    }
    if let Some(host) = var("VERILIST_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("VERILIST_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
}
