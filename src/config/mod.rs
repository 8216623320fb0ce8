//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::CacheConfig;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "stanza";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3600;
const DEFAULT_ROUTE_PREFIX: &str = "/stanza";
const DEFAULT_CONTENT_FILE: &str = "stanza.json";
const DEFAULT_WATCH_POLL_SECS: u64 = 2;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Command-line arguments for the Stanza binary.
#[derive(Debug, Parser)]
#[command(name = "stanza", version, about = "Stanza inline content editing server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "STANZA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the edit surface over the configured backing store.
    Serve(ServeArgs),
    /// Dump all content items as JSON.
    Export(ExportArgs),
    /// Bulk-load content items from a JSON dump.
    Import(ImportArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Args, Clone)]
pub struct ExportArgs {
    /// Write the dump here instead of standard output.
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Args, Clone)]
pub struct ImportArgs {
    /// The JSON dump to load.
    #[arg(value_name = "PATH")]
    pub file: PathBuf,

    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the route prefix the edit surface is mounted under.
    #[arg(long = "route-prefix", value_name = "PATH")]
    pub route_prefix: Option<String>,

    /// Override the content file path (file-backed store).
    #[arg(long = "content-file", value_name = "PATH")]
    pub content_file: Option<PathBuf>,

    /// Use Postgres instead of the content file.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the content-file watch poll cadence.
    #[arg(long = "watch-poll-seconds", value_name = "SECONDS")]
    pub watch_poll_seconds: Option<u64>,

    /// Toggle the overlay cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the overlay cache key prefix.
    #[arg(long = "cache-key-prefix", value_name = "PREFIX")]
    pub cache_key_prefix: Option<String>,

    /// Override the overlay cache item TTL.
    #[arg(long = "cache-item-ttl-seconds", value_name = "SECONDS")]
    pub cache_item_ttl_seconds: Option<u64>,

    /// Override the overlay cache operation timeout.
    #[arg(long = "cache-op-timeout-seconds", value_name = "SECONDS")]
    pub cache_op_timeout_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub store: StoreSettings,
    pub cache: CacheConfig,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub route_prefix: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            route_prefix: DEFAULT_ROUTE_PREFIX.to_string(),
        }
    }
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Path of the JSON content file. Ignored when `database_url` is set.
    pub content_file: PathBuf,
    /// Cadence of the external-modification poll on the content file.
    pub watch_poll_seconds: u64,
    /// When set, items are persisted in Postgres instead of the file.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            content_file: PathBuf::from(DEFAULT_CONTENT_FILE),
            watch_poll_seconds: DEFAULT_WATCH_POLL_SECS,
            database_url: None,
            database_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
        }
    }
}

impl StoreSettings {
    pub fn watch_poll(&self) -> Duration {
        Duration::from_secs(self.watch_poll_seconds.max(1))
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Compact,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl LoggingSettings {
    pub fn level_filter(&self) -> LevelFilter {
        LevelFilter::from_str(&self.level).unwrap_or(LevelFilter::INFO)
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("invalid setting `{field}`: {message}")]
    Invalid { field: &'static str, message: String },
}

impl SettingsError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

impl Settings {
    /// Load settings with file → env → CLI precedence.
    pub fn load(
        config_file: Option<&std::path::Path>,
        overrides: &Overrides,
    ) -> Result<Self, SettingsError> {
        let mut builder = Config::builder()
            .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
            .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));
        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path.to_path_buf()));
        }
        let config = builder
            .add_source(Environment::with_prefix("STANZA").separator("__"))
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.apply(overrides);
        settings.validate()?;
        Ok(settings)
    }

    fn apply(&mut self, overrides: &Overrides) {
        if let Some(host) = &overrides.server_host {
            self.server.host = host.clone();
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(prefix) = &overrides.route_prefix {
            self.server.route_prefix = prefix.clone();
        }
        if let Some(path) = &overrides.content_file {
            self.store.content_file = path.clone();
        }
        if let Some(url) = &overrides.database_url {
            self.store.database_url = Some(url.clone());
        }
        if let Some(count) = overrides.database_max_connections {
            self.store.database_max_connections = count;
        }
        if let Some(secs) = overrides.watch_poll_seconds {
            self.store.watch_poll_seconds = secs;
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = enabled;
        }
        if let Some(prefix) = &overrides.cache_key_prefix {
            self.cache.key_prefix = prefix.clone();
        }
        if let Some(secs) = overrides.cache_item_ttl_seconds {
            self.cache.item_ttl_seconds = Some(secs);
        }
        if let Some(secs) = overrides.cache_op_timeout_seconds {
            self.cache.op_timeout_seconds = secs;
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
        if let Some(json) = overrides.log_json {
            self.logging.format = if json {
                LogFormat::Json
            } else {
                LogFormat::Compact
            };
        }
    }

    fn validate(&self) -> Result<(), SettingsError> {
        let prefix = &self.server.route_prefix;
        if !prefix.starts_with('/') || prefix.len() < 2 {
            return Err(SettingsError::invalid(
                "server.route_prefix",
                "must start with `/` and name at least one path segment",
            ));
        }
        if prefix.ends_with('/') {
            return Err(SettingsError::invalid(
                "server.route_prefix",
                "must not end with `/`",
            ));
        }
        if LevelFilter::from_str(&self.logging.level).is_err() {
            return Err(SettingsError::invalid(
                "logging.level",
                format!("`{}` is not a log level", self.logging.level),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_a_file_backed_local_server() {
        let settings = Settings::default();
        assert_eq!(settings.server.bind_addr(), "127.0.0.1:3600");
        assert_eq!(settings.server.route_prefix, "/stanza");
        assert_eq!(settings.store.content_file, PathBuf::from("stanza.json"));
        assert_eq!(settings.store.database_url, None);
        assert!(settings.cache.enabled);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn cli_overrides_win() {
        let mut settings = Settings::default();
        let overrides = Overrides {
            server_port: Some(8080),
            route_prefix: Some("/content".to_string()),
            database_url: Some("postgres://localhost/stanza".to_string()),
            cache_enabled: Some(false),
            log_json: Some(true),
            ..Overrides::default()
        };
        settings.apply(&overrides);

        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.route_prefix, "/content");
        assert_eq!(
            settings.store.database_url.as_deref(),
            Some("postgres://localhost/stanza")
        );
        assert!(!settings.cache.enabled);
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn route_prefix_must_be_a_rooted_segment() {
        for bad in ["", "stanza", "/", "/stanza/"] {
            let mut settings = Settings::default();
            settings.server.route_prefix = bad.to_string();
            assert!(settings.validate().is_err(), "prefix {bad:?} should fail");
        }
    }

    #[test]
    fn unknown_log_levels_are_rejected() {
        let mut settings = Settings::default();
        settings.logging.level = "chatty".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn watch_poll_has_a_floor() {
        let settings = StoreSettings {
            watch_poll_seconds: 0,
            ..StoreSettings::default()
        };
        assert_eq!(settings.watch_poll(), Duration::from_secs(1));
    }
}
