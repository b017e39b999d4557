//! Configuration management for the station status tracker
//!
//! This module handles loading and validating configuration from environment variables
//! and TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Worker count used when the configured value is missing or invalid
pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;

/// Hard ceiling on worker count regardless of configuration
pub const MAX_FETCH_CONCURRENCY: usize = 6;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Polling cycle configuration
    pub fetcher: FetcherConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// HTTP server configuration
    pub server: ServerConfig,

    /// Provider secrets
    pub credentials: ProviderCredentials,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Polling cycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Requested number of concurrent fetch workers (0 means default)
    pub concurrency: usize,

    /// Deadline for a single outbound call, in milliseconds
    pub request_timeout_ms: u64,

    /// Deadline for one station's adapter run, in milliseconds
    pub station_timeout_ms: u64,

    /// Cycle length in seconds; drives rotation and the interval trigger
    pub cycle_interval_secs: u64,

    /// Optional ceiling on outbound calls per cycle
    pub max_outbound_calls: Option<usize>,

    /// Append every snapshot to the usage history table
    pub history_enabled: bool,

    /// Skip cycles during the UTC+8 overnight window
    pub night_pause: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_FETCH_CONCURRENCY,
            request_timeout_ms: 8_000,
            station_timeout_ms: 30_000,
            cycle_interval_secs: 120,
            max_outbound_calls: None,
            history_enabled: true,
            night_pause: true,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/charger.db"),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind_address: SocketAddr,

    /// Permissive CORS on every route
    pub enable_cors: bool,

    /// Log each request through the tracing layer
    pub enable_request_logging: bool,

    /// Requests per minute per client and path on read routes
    pub rate_limit_per_minute: Option<u32>,

    /// Run the interval trigger alongside the API
    pub schedule_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            enable_cors: true,
            enable_request_logging: true,
            rate_limit_per_minute: None,
            schedule_enabled: false,
        }
    }
}

/// Provider secrets; any missing value disables that provider's fetches
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderCredentials {
    pub neptune_junior_openid: Option<String>,
    pub neptune_junior_unionid: Option<String>,
    pub dlmm_token: Option<String>,
    pub opentool_token: Option<String>,
    pub letfungo_token: Option<String>,
    pub wanchong_token: Option<String>,
    pub wkd_token: Option<String>,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn mask(value: &Option<String>) -> &'static str {
            if value.is_some() {
                "<set>"
            } else {
                "<unset>"
            }
        }

        f.debug_struct("ProviderCredentials")
            .field("neptune_junior_openid", &mask(&self.neptune_junior_openid))
            .field("neptune_junior_unionid", &mask(&self.neptune_junior_unionid))
            .field("dlmm_token", &mask(&self.dlmm_token))
            .field("opentool_token", &mask(&self.opentool_token))
            .field("letfungo_token", &mask(&self.letfungo_token))
            .field("wanchong_token", &mask(&self.wanchong_token))
            .field("wkd_token", &mask(&self.wkd_token))
            .finish()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_secret(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Unset or anything but `false` (case-insensitive) counts as enabled
pub fn parse_enabled_flag(raw: Option<&str>) -> bool {
    match raw {
        None => true,
        Some(value) => !value.trim().eq_ignore_ascii_case("false"),
    }
}

/// Parse a requested concurrency: non-numeric or non-positive input means "default"
pub fn parse_concurrency(raw: Option<&str>) -> usize {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
        .map(|v| v as usize)
        .unwrap_or(DEFAULT_FETCH_CONCURRENCY)
}

impl ProviderCredentials {
    /// Fill every unset secret from its environment variable
    pub fn or_env(self) -> Self {
        Self {
            neptune_junior_openid: self
                .neptune_junior_openid
                .or_else(|| env_secret("NEPTUNE_JUNIOR_OPENID")),
            neptune_junior_unionid: self
                .neptune_junior_unionid
                .or_else(|| env_secret("NEPTUNE_JUNIOR_UNIONID")),
            dlmm_token: self.dlmm_token.or_else(|| env_secret("DLMM_TOKEN")),
            opentool_token: self
                .opentool_token
                .or_else(|| env_secret("ELSE_PROVIDER_OPENTOOL_TOKEN")),
            letfungo_token: self
                .letfungo_token
                .or_else(|| env_secret("ELSE_PROVIDER_LETFUNGO_TOKEN")),
            wanchong_token: self
                .wanchong_token
                .or_else(|| env_secret("ELSE_PROVIDER_WANCHONG_TOKEN")),
            wkd_token: self.wkd_token.or_else(|| env_secret("ELSE_PROVIDER_WKD_TOKEN")),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let concurrency =
            parse_concurrency(std::env::var("CHARGER_FETCH_CONCURRENCY").ok().as_deref());

        let request_timeout_ms = std::env::var("CHARGER_FETCH_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.fetcher.request_timeout_ms);

        let station_timeout_ms = std::env::var("CHARGER_STATION_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.fetcher.station_timeout_ms);

        let cycle_interval_secs = std::env::var("CHARGER_CYCLE_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.fetcher.cycle_interval_secs);

        let max_outbound_calls = std::env::var("CHARGER_MAX_OUTBOUND_CALLS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok());

        let history_enabled =
            parse_enabled_flag(std::env::var("CHARGER_HISTORY_ENABLED").ok().as_deref());
        let night_pause = parse_enabled_flag(std::env::var("CHARGER_NIGHT_PAUSE").ok().as_deref());

        let sqlite_path = std::env::var("CHARGER_SQLITE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.database.sqlite_path);

        let bind_address = match std::env::var("CHARGER_BIND") {
            Ok(raw) => raw
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid CHARGER_BIND address: {raw}"))?,
            Err(_) => defaults.server.bind_address,
        };

        let rate_limit_per_minute = std::env::var("CHARGER_RATE_LIMIT_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse::<u32>().ok());

        let schedule_enabled = std::env::var("CHARGER_SCHEDULE")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        let log_level = std::env::var("CHARGER_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));
        let log_format =
            std::env::var("CHARGER_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            fetcher: FetcherConfig {
                concurrency,
                request_timeout_ms,
                station_timeout_ms,
                cycle_interval_secs,
                max_outbound_calls,
                history_enabled,
                night_pause,
            },
            database: DatabaseConfig { sqlite_path },
            server: ServerConfig {
                bind_address,
                rate_limit_per_minute,
                schedule_enabled,
                ..defaults.server
            },
            credentials: ProviderCredentials::default().or_env(),
            logging: LoggingConfig {
                level: log_level,
                format: log_format,
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        // Secrets usually stay out of the file.
        config.credentials = config.credentials.or_env();

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.fetcher.request_timeout_ms == 0 {
            anyhow::bail!("request_timeout_ms must be greater than 0");
        }

        if self.fetcher.station_timeout_ms == 0 {
            anyhow::bail!("station_timeout_ms must be greater than 0");
        }

        if self.fetcher.cycle_interval_secs == 0 {
            anyhow::bail!("cycle_interval_secs must be greater than 0");
        }

        if self.server.rate_limit_per_minute == Some(0) {
            anyhow::bail!("rate_limit_per_minute must be greater than 0 when set");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("log format must be 'text' or 'json'");
        }

        Ok(())
    }

    /// Worker count after applying the default and the hard ceiling
    #[must_use]
    pub fn resolved_concurrency(&self) -> usize {
        let requested = if self.fetcher.concurrency == 0 {
            DEFAULT_FETCH_CONCURRENCY
        } else {
            self.fetcher.concurrency
        };
        requested.min(MAX_FETCH_CONCURRENCY)
    }

    /// Get outbound call timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.fetcher.request_timeout_ms)
    }

    /// Get per-station timeout as Duration
    #[must_use]
    pub fn station_timeout(&self) -> Duration {
        Duration::from_millis(self.fetcher.station_timeout_ms)
    }

    /// Get cycle interval as Duration
    #[must_use]
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.fetcher.cycle_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.resolved_concurrency(), 4);
        assert!(config.fetcher.history_enabled);
    }

    #[test]
    fn test_concurrency_is_clamped() {
        let mut config = Config::default();
        config.fetcher.concurrency = 50;
        assert_eq!(config.resolved_concurrency(), MAX_FETCH_CONCURRENCY);

        config.fetcher.concurrency = 0;
        assert_eq!(config.resolved_concurrency(), DEFAULT_FETCH_CONCURRENCY);
    }

    #[test]
    fn test_parse_concurrency() {
        assert_eq!(parse_concurrency(None), 4);
        assert_eq!(parse_concurrency(Some("abc")), 4);
        assert_eq!(parse_concurrency(Some("-2")), 4);
        assert_eq!(parse_concurrency(Some("0")), 4);
        assert_eq!(parse_concurrency(Some("5")), 5);
    }

    #[test]
    fn test_parse_enabled_flag() {
        assert!(parse_enabled_flag(None));
        assert!(parse_enabled_flag(Some("true")));
        assert!(parse_enabled_flag(Some("yes")));
        assert!(!parse_enabled_flag(Some("FALSE")));
        assert!(!parse_enabled_flag(Some(" false ")));
    }

    #[test]
    fn test_invalid_timeouts() {
        let mut config = Config::default();
        config.fetcher.request_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.fetcher.cycle_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_conversion() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(8));
        assert_eq!(config.cycle_interval(), Duration::from_secs(120));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [fetcher]
            concurrency = 2
            history_enabled = false

            [credentials]
            dlmm_token = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.resolved_concurrency(), 2);
        assert!(!config.fetcher.history_enabled);
        assert_eq!(config.fetcher.request_timeout_ms, 8_000);
        assert_eq!(config.credentials.dlmm_token.as_deref(), Some("secret"));
        assert!(!format!("{:?}", config.credentials).contains("secret"));
    }
}
