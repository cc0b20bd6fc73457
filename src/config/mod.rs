//! Configuration layer: typed settings with layered precedence
//! (file → legacy environment → prefixed environment → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Parser, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "vetrina";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_UPLOAD_DIR: &str = "uploaded_files";
const DEFAULT_STATIC_DIR: &str = "static";
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_REQUEST_DEADLINE_SECS: u64 = 10;
const DEFAULT_FLUSH_BATCH: usize = 64;
const DEFAULT_FLUSH_TICK_SECS: u64 = 1;
const DEFAULT_BACKPRESSURE_THRESHOLD: usize = 10_000;
const DEFAULT_RATES_RELOAD_SECS: u64 = 3600;

/// In-memory persistence selector for `storage.data_dir`.
pub const MEMORY_DATA_DIR: &str = ":memory:";

/// Command-line arguments for the Vetrina binary.
#[derive(Debug, Parser, Default)]
#[command(name = "vetrina", version, about = "Vetrina classifieds server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "VETRINA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub graceful_shutdown_seconds: Option<u64>,

    /// Override the per-request deadline.
    #[arg(long = "server-request-deadline-seconds", value_name = "SECONDS")]
    pub request_deadline_seconds: Option<u64>,

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

    /// Override the data directory (`:memory:` for the in-memory driver).
    #[arg(long = "data-dir", value_name = "PATH")]
    pub data_dir: Option<String>,

    /// Override the uploaded-photos directory.
    #[arg(long = "uploads-directory", value_name = "PATH")]
    pub uploads_directory: Option<PathBuf>,

    /// Override the static assets directory.
    #[arg(long = "static-directory", value_name = "PATH")]
    pub static_directory: Option<PathBuf>,

    /// Override the cookie domain.
    #[arg(long = "session-domain", value_name = "DOMAIN")]
    pub session_domain: Option<String>,

    /// Override the dirty-queue backpressure threshold (0 disables).
    #[arg(long = "cache-backpressure-threshold", value_name = "COUNT")]
    pub backpressure_threshold: Option<usize>,

    /// Override the flush batch size.
    #[arg(long = "cache-flush-batch", value_name = "COUNT")]
    pub flush_batch: Option<usize>,

    /// Override the rate-table reload cadence.
    #[arg(long = "rates-reload-seconds", value_name = "SECONDS")]
    pub rates_reload_seconds: Option<u64>,
}

/// Fully-resolved deployment settings after precedence resolution and
/// validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
    pub uploads: UploadSettings,
    pub session: SessionSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    pub request_deadline: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Filesystem root for persisted records, or `:memory:`.
    pub data_dir: String,
}

impl StorageSettings {
    pub fn is_memory(&self) -> bool {
        self.data_dir == MEMORY_DATA_DIR
    }

    /// `rates.json` lives next to the data directory.
    pub fn rates_path(&self) -> PathBuf {
        if self.is_memory() {
            PathBuf::from(crate::domain::currency::RATES_FILE)
        } else {
            PathBuf::from(&self.data_dir).join(crate::domain::currency::RATES_FILE)
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub directory: PathBuf,
    pub static_directory: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Cookie `Domain` attribute; empty leaves the attribute off.
    pub domain: String,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub flush_batch: usize,
    pub flush_tick: Duration,
    pub backpressure_threshold: usize,
    pub rates_reload: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence.
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("VETRINA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_legacy_env(|name| std::env::var(name).ok());
    raw.apply_cli_overrides(cli);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning
/// both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    storage: RawStorageSettings,
    uploads: RawUploadSettings,
    session: RawSessionSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    /// The flat environment names honoured by earlier deployments keep
    /// working alongside the `VETRINA__` scheme.
    fn apply_legacy_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var("UPLOADED_FILES_PATH") {
            self.uploads.directory = Some(PathBuf::from(dir));
        }
        if let Some(dir) = var("STATIC_FILES_PATH") {
            self.uploads.static_directory = Some(PathBuf::from(dir));
        }
        if let Some(port) = var("HTTP_SERVER_PORT")
            && let Ok(port) = port.parse::<u16>()
        {
            self.server.port = Some(port);
        }
        if let Some(dir) = var("DATA_DIR") {
            self.storage.data_dir = Some(dir);
        }
        if let Some(domain) = var("DOMAIN") {
            self.session.domain = Some(domain);
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = Some(level);
        }
    }

    fn apply_cli_overrides(&mut self, cli: &CliArgs) {
        if let Some(host) = cli.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = cli.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = cli.graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(seconds) = cli.request_deadline_seconds {
            self.server.request_deadline_seconds = Some(seconds);
        }
        if let Some(level) = cli.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = cli.log_json {
            self.logging.json = Some(json);
        }
        if let Some(dir) = cli.data_dir.as_ref() {
            self.storage.data_dir = Some(dir.clone());
        }
        if let Some(dir) = cli.uploads_directory.as_ref() {
            self.uploads.directory = Some(dir.clone());
        }
        if let Some(dir) = cli.static_directory.as_ref() {
            self.uploads.static_directory = Some(dir.clone());
        }
        if let Some(domain) = cli.session_domain.as_ref() {
            self.session.domain = Some(domain.clone());
        }
        if let Some(threshold) = cli.backpressure_threshold {
            self.cache.backpressure_threshold = Some(threshold);
        }
        if let Some(batch) = cli.flush_batch {
            self.cache.flush_batch = Some(batch);
        }
        if let Some(seconds) = cli.rates_reload_seconds {
            self.cache.rates_reload_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            storage,
            uploads,
            session,
            cache,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            storage: build_storage_settings(storage)?,
            uploads: build_upload_settings(uploads),
            session: SessionSettings {
                domain: session.domain.unwrap_or_default(),
            },
            cache: build_cache_settings(cache)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = format!("{host}:{port}")
        .parse()
        .map_err(|err| LoadError::invalid("server.addr", format!("invalid address: {err}")))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    let deadline_secs = server
        .request_deadline_seconds
        .unwrap_or(DEFAULT_REQUEST_DEADLINE_SECS);
    if deadline_secs == 0 {
        return Err(LoadError::invalid(
            "server.request_deadline_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        request_deadline: Duration::from_secs(deadline_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let data_dir = storage
        .data_dir
        .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
    if data_dir.trim().is_empty() {
        return Err(LoadError::invalid(
            "storage.data_dir",
            "path must not be empty",
        ));
    }
    Ok(StorageSettings { data_dir })
}

fn build_upload_settings(uploads: RawUploadSettings) -> UploadSettings {
    UploadSettings {
        directory: uploads
            .directory
            .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR)),
        static_directory: uploads
            .static_directory
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR)),
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let flush_batch = cache.flush_batch.unwrap_or(DEFAULT_FLUSH_BATCH);
    if flush_batch == 0 {
        return Err(LoadError::invalid(
            "cache.flush_batch",
            "must be greater than zero",
        ));
    }

    let tick_secs = cache.flush_tick_seconds.unwrap_or(DEFAULT_FLUSH_TICK_SECS);
    if tick_secs == 0 {
        return Err(LoadError::invalid(
            "cache.flush_tick_seconds",
            "must be greater than zero",
        ));
    }

    let reload_secs = cache
        .rates_reload_seconds
        .unwrap_or(DEFAULT_RATES_RELOAD_SECS);
    if reload_secs == 0 {
        return Err(LoadError::invalid(
            "cache.rates_reload_seconds",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        flush_batch,
        flush_tick: Duration::from_secs(tick_secs),
        backpressure_threshold: cache
            .backpressure_threshold
            .unwrap_or(DEFAULT_BACKPRESSURE_THRESHOLD),
        rates_reload: Duration::from_secs(reload_secs),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    request_deadline_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    data_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUploadSettings {
    directory: Option<PathBuf>,
    static_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSessionSettings {
    domain: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    flush_batch: Option<usize>,
    flush_tick_seconds: Option<u64>,
    backpressure_threshold: Option<usize>,
    rates_reload_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
        assert_eq!(settings.storage.data_dir, DEFAULT_DATA_DIR);
        assert_eq!(settings.cache.flush_batch, DEFAULT_FLUSH_BATCH);
        assert!(settings.session.domain.is_empty());
    }

    #[test]
    fn legacy_env_names_are_honoured() {
        let mut raw = RawSettings::default();
        raw.apply_legacy_env(|name| match name {
            "UPLOADED_FILES_PATH" => Some("/srv/uploads".to_string()),
            "STATIC_FILES_PATH" => Some("/srv/static".to_string()),
            "HTTP_SERVER_PORT" => Some("9090".to_string()),
            "DATA_DIR" => Some("/srv/data".to_string()),
            "DOMAIN" => Some("example.com".to_string()),
            "LOG_LEVEL" => Some("debug".to_string()),
            _ => None,
        });
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.server.addr.port(), 9090);
        assert_eq!(settings.storage.data_dir, "/srv/data");
        assert_eq!(settings.uploads.directory, PathBuf::from("/srv/uploads"));
        assert_eq!(
            settings.uploads.static_directory,
            PathBuf::from("/srv/static")
        );
        assert_eq!(settings.session.domain, "example.com");
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.apply_legacy_env(|name| match name {
            "HTTP_SERVER_PORT" => Some("5000".to_string()),
            _ => None,
        });
        let cli = CliArgs {
            server_port: Some(4321),
            log_level: Some("warn".to_string()),
            ..Default::default()
        };
        raw.apply_cli_overrides(&cli);
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.server.addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::WARN);
    }

    #[test]
    fn memory_selector_is_recognised() {
        let mut raw = RawSettings::default();
        raw.storage.data_dir = Some(MEMORY_DATA_DIR.to_string());
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert!(settings.storage.is_memory());
    }

    #[test]
    fn zero_flush_batch_is_rejected() {
        let mut raw = RawSettings::default();
        raw.cache.flush_batch = Some(0);
        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid { key, .. }) if key == "cache.flush_batch"
        ));
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let args = CliArgs::parse_from(["vetrina", "--log-json", "true", "--server-port", "81"]);
        let mut raw = RawSettings::default();
        raw.apply_cli_overrides(&args);
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert!(matches!(settings.logging.format, LogFormat::Json));
        assert_eq!(settings.server.addr.port(), 81);
    }
}
