//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::BTreeMap,
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment as EnvSource, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use uuid::Uuid;

use crate::cache::{DEFAULT_KEY_PREFIX, TtlOverride, TtlPolicy};
use crate::domain::types::ResourceKind;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "wayfarer";
const ENV_PREFIX: &str = "WAYFARER";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_ACQUIRE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_CACHE_OPERATION_TIMEOUT_MS: u64 = 250;
const DEFAULT_CACHE_MEMORY_CAPACITY: usize = 10_000;
const DEFAULT_WARMER_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Command-line arguments for the wayfarer binary.
#[derive(Debug, Parser)]
#[command(
    name = "wayfarer",
    version,
    about = "Tour booking resource layer: caching and rating consistency"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "WAYFARER_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Build the resource layer and run the cache warmer until interrupted.
    Serve(Box<ServeArgs>),
    /// Run one cache warm pass and exit.
    #[command(name = "warm-cache")]
    WarmCache(BackendOverrides),
    /// Recompute rating aggregates for one tour or every tour.
    #[command(name = "recompute-ratings")]
    RecomputeRatings(RecomputeArgs),
    /// Load seed JSON files from a directory.
    #[command(name = "import")]
    Import(ImportArgs),
    /// Delete every document and flush the cache namespace.
    #[command(name = "purge")]
    Purge(PurgeArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct BackendOverrides {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the cache connection URL.
    #[arg(long = "cache-url", value_name = "URL")]
    pub cache_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub backends: BackendOverrides,

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

    /// Toggle the cache-aside layer.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the cache warmer cadence.
    #[arg(long = "warmer-interval-seconds", value_name = "SECONDS")]
    pub warmer_interval_seconds: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct RecomputeArgs {
    #[command(flatten)]
    pub backends: BackendOverrides,

    /// Only recompute this tour.
    #[arg(long = "tour", value_name = "ID")]
    pub tour: Option<Uuid>,
}

#[derive(Debug, Args, Clone)]
pub struct ImportArgs {
    #[command(flatten)]
    pub backends: BackendOverrides,

    /// Directory holding tours.json, users.json, reviews.json and bookings.json.
    #[arg(value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub dir: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct PurgeArgs {
    #[command(flatten)]
    pub backends: BackendOverrides,

    /// Confirm the deletion.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub yes: bool,
}

/// Deployment mode. Decides how much error detail reaches callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment `{other}`")),
        }
    }
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub environment: Environment,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub query: QuerySettings,
    pub warmer: WarmerSettings,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub backend: DatabaseBackend,
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub backend: CacheBackend,
    pub url: Option<String>,
    pub key_prefix: String,
    pub operation_timeout_ms: NonZeroU64,
    pub memory_capacity: NonZeroUsize,
    pub default_ttl: TtlPolicy,
    pub ttl_overrides: BTreeMap<ResourceKind, TtlOverride>,
}

#[derive(Debug, Clone, Copy)]
pub struct QuerySettings {
    /// Upper bound on `limit`; `None` leaves page size unbounded.
    pub max_limit: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
pub struct WarmerSettings {
    pub enabled: bool,
    pub interval: Duration,
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

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(EnvSource::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::WarmCache(backends)) => raw.apply_backend_overrides(backends),
        Some(Command::RecomputeRatings(args)) => raw.apply_backend_overrides(&args.backends),
        Some(Command::Import(args)) => raw.apply_backend_overrides(&args.backends),
        Some(Command::Purge(args)) => raw.apply_backend_overrides(&args.backends),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    environment: Option<String>,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    query: RawQuerySettings,
    warmer: RawWarmerSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_backend_overrides(&overrides.backends);
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(seconds) = overrides.warmer_interval_seconds {
            self.warmer.interval_seconds = Some(seconds);
        }
    }

    fn apply_backend_overrides(&mut self, overrides: &BackendOverrides) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(url) = overrides.cache_url.as_ref() {
            self.cache.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            environment,
            logging,
            database,
            cache,
            query,
            warmer,
        } = raw;

        let environment = match environment {
            Some(value) => Environment::from_str(&value)
                .map_err(|reason| LoadError::invalid("environment", reason))?,
            None => Environment::default(),
        };

        Ok(Self {
            environment,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            query: build_query_settings(query)?,
            warmer: build_warmer_settings(warmer)?,
        })
    }
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

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_empty(database.url);

    // Without an explicit backend, a configured URL selects Postgres.
    let backend = match database.backend.as_deref().map(str::trim) {
        Some("postgres") => DatabaseBackend::Postgres,
        Some("memory") => DatabaseBackend::Memory,
        Some(other) => {
            return Err(LoadError::invalid(
                "database.backend",
                format!("unknown backend `{other}`, expected `postgres` or `memory`"),
            ));
        }
        None if url.is_some() => DatabaseBackend::Postgres,
        None => DatabaseBackend::Memory,
    };
    if backend == DatabaseBackend::Postgres && url.is_none() {
        return Err(LoadError::invalid(
            "database.url",
            "required for the postgres backend",
        ));
    }

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    let acquire_secs = database
        .acquire_timeout_seconds
        .unwrap_or(DEFAULT_DB_ACQUIRE_TIMEOUT_SECS);
    if acquire_secs == 0 {
        return Err(LoadError::invalid(
            "database.acquire_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(DatabaseSettings {
        backend,
        url,
        max_connections,
        acquire_timeout: Duration::from_secs(acquire_secs),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let url = non_empty(cache.url);

    let backend = match cache.backend.as_deref().map(str::trim) {
        Some("redis") => CacheBackend::Redis,
        Some("memory") => CacheBackend::Memory,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("unknown backend `{other}`, expected `redis` or `memory`"),
            ));
        }
        None if url.is_some() => CacheBackend::Redis,
        None => CacheBackend::Memory,
    };
    if backend == CacheBackend::Redis && url.is_none() {
        return Err(LoadError::invalid("cache.url", "required for the redis backend"));
    }

    let key_prefix = cache
        .key_prefix
        .map(|prefix| prefix.trim().trim_end_matches(':').to_string())
        .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());
    if key_prefix.is_empty() || key_prefix.contains(['*', '?', ' ']) {
        return Err(LoadError::invalid(
            "cache.key_prefix",
            "must be non-empty and free of glob characters",
        ));
    }

    let operation_timeout_ms = NonZeroU64::new(
        cache
            .operation_timeout_ms
            .unwrap_or(DEFAULT_CACHE_OPERATION_TIMEOUT_MS),
    )
    .ok_or_else(|| LoadError::invalid("cache.operation_timeout_ms", "must be greater than zero"))?;

    let memory_capacity = NonZeroUsize::new(
        cache
            .memory_capacity
            .unwrap_or(DEFAULT_CACHE_MEMORY_CAPACITY),
    )
    .ok_or_else(|| LoadError::invalid("cache.memory_capacity", "must be greater than zero"))?;

    let default_ttl = cache.ttl.unwrap_or_default();
    if default_ttl.point_secs == 0 || default_ttl.list_secs == 0 || default_ttl.stats_secs == 0 {
        return Err(LoadError::invalid("cache.ttl", "every TTL must be greater than zero"));
    }
    for (kind, ttl) in &cache.ttl_overrides {
        let values = [ttl.point_secs, ttl.list_secs, ttl.stats_secs];
        if values.contains(&Some(0)) {
            return Err(LoadError::invalid(
                "cache.ttl_overrides",
                format!("{} TTLs must be greater than zero", kind.as_str()),
            ));
        }
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        backend,
        url,
        key_prefix,
        operation_timeout_ms,
        memory_capacity,
        default_ttl,
        ttl_overrides: cache.ttl_overrides,
    })
}

fn build_query_settings(query: RawQuerySettings) -> Result<QuerySettings, LoadError> {
    if query.max_limit == Some(0) {
        return Err(LoadError::invalid(
            "query.max_limit",
            "must be greater than zero",
        ));
    }
    Ok(QuerySettings {
        max_limit: query.max_limit,
    })
}

fn build_warmer_settings(warmer: RawWarmerSettings) -> Result<WarmerSettings, LoadError> {
    let interval_seconds = warmer
        .interval_seconds
        .unwrap_or(DEFAULT_WARMER_INTERVAL_SECS);
    if interval_seconds == 0 {
        return Err(LoadError::invalid(
            "warmer.interval_seconds",
            "must be greater than zero",
        ));
    }

    Ok(WarmerSettings {
        enabled: warmer.enabled.unwrap_or(true),
        interval: Duration::from_secs(interval_seconds),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    backend: Option<String>,
    url: Option<String>,
    max_connections: Option<u32>,
    acquire_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    backend: Option<String>,
    url: Option<String>,
    key_prefix: Option<String>,
    operation_timeout_ms: Option<u64>,
    memory_capacity: Option<usize>,
    ttl: Option<TtlPolicy>,
    ttl_overrides: BTreeMap<ResourceKind, TtlOverride>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQuerySettings {
    max_limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWarmerSettings {
    enabled: Option<bool>,
    interval_seconds: Option<u64>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
