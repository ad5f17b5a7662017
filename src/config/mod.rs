//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "statico";
const ENV_PREFIX: &str = "STATICO";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_ROOT: &str = "./static";
const DEFAULT_INDEX_FILE: &str = "index.html";
const DEFAULT_COMPRESSION_LEVEL: u32 = 6;
const DEFAULT_MIN_COMPRESS_SIZE: u64 = 1024;
const DEFAULT_CACHE_SIZE_BYTES: u64 = 100 * 1024 * 1024;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
const DEFAULT_MAX_BODY_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_HEADER_BYTES: u64 = 1024 * 1024;
const DEFAULT_RATE_LIMIT_PER_IP: u32 = 100;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 15;
const DEFAULT_READ_HEADER_TIMEOUT_SECS: u64 = 5;
const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 15;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
const DEFAULT_VERSION_HASH_LENGTH: usize = 8;
const DEFAULT_STATIC_MAX_AGE_SECS: u64 = 86_400;
const DEFAULT_DYNAMIC_MAX_AGE_SECS: u64 = 3_600;
const DEFAULT_METRICS_ENDPOINT: &str = "/metrics";

const MIN_VERSION_HASH_LENGTH: usize = 4;
const MAX_VERSION_HASH_LENGTH: usize = 16;

fn default_compress_types() -> Vec<String> {
    [
        "text/html",
        "text/css",
        "text/javascript",
        "application/javascript",
        "application/json",
        "application/xml",
        "text/xml",
        "text/plain",
        "image/svg+xml",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_static_prefixes() -> Vec<String> {
    ["/static/", "/assets/", "/dist/", "/build/"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Command-line arguments for the statico binary.
#[derive(Debug, Parser)]
#[command(name = "statico", version, about = "Static asset origin server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "STATICO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP origin.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the content root directory.
    #[arg(long = "root", value_name = "PATH")]
    pub root: Option<PathBuf>,

    /// Override the directory index file name.
    #[arg(long = "index-file", value_name = "NAME")]
    pub index_file: Option<String>,

    /// Toggle directory listings for index-less directories.
    #[arg(
        long = "allow-browsing",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub allow_browsing: Option<bool>,

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

    /// Override the cache byte budget.
    #[arg(long = "cache-size-bytes", value_name = "BYTES")]
    pub cache_size_bytes: Option<u64>,

    /// Override the cache entry TTL.
    #[arg(long = "cache-ttl-seconds", value_name = "SECONDS")]
    pub cache_ttl_seconds: Option<u64>,

    /// Override the eviction strategy (lru|lfu).
    #[arg(long = "cache-strategy", value_name = "STRATEGY")]
    pub cache_strategy: Option<String>,

    /// Toggle asset versioning.
    #[arg(
        long = "enable-versioning",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub enable_versioning: Option<bool>,

    /// Override the version hash length (4-16, even).
    #[arg(long = "version-hash-length", value_name = "CHARS")]
    pub version_hash_length: Option<usize>,

    /// Override the versioned filename pattern ({base}, {hash}, {ext}).
    #[arg(long = "versioning-pattern", value_name = "PATTERN")]
    pub versioning_pattern: Option<String>,

    /// Override the public URL prefix assets are served under.
    #[arg(long = "url-prefix", value_name = "PREFIX")]
    pub url_prefix: Option<String>,

    /// Toggle the file-system watcher.
    #[arg(
        long = "enable-watcher",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub enable_watcher: Option<bool>,

    /// Toggle the Prometheus metrics endpoint.
    #[arg(
        long = "enable-metrics",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub enable_metrics: Option<bool>,

    /// Override the per-IP request budget (0 disables rate limiting).
    #[arg(long = "rate-limit-per-ip", value_name = "COUNT")]
    pub rate_limit_per_ip: Option<u32>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "shutdown-timeout-seconds", value_name = "SECONDS")]
    pub shutdown_timeout_seconds: Option<u64>,

    /// Toggle detailed error bodies.
    #[arg(
        long = "debug",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub debug: Option<bool>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub compression: CompressionSettings,
    pub cache: CacheSettings,
    pub limits: LimitSettings,
    pub timeouts: TimeoutSettings,
    pub versioning: VersioningSettings,
    pub cache_control: CacheControlSettings,
    pub watcher: WatcherSettings,
    pub security: SecuritySettings,
    pub metrics: MetricsSettings,
    pub debug: bool,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub root: PathBuf,
    pub index_file: String,
    pub allow_browsing: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            root: PathBuf::from(DEFAULT_ROOT),
            index_file: DEFAULT_INDEX_FILE.to_string(),
            allow_browsing: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CompressionSettings {
    pub gzip: bool,
    pub brotli: bool,
    pub level: u32,
    pub min_compress_size: u64,
    pub compress_types: Vec<String>,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            gzip: true,
            brotli: true,
            level: DEFAULT_COMPRESSION_LEVEL,
            min_compress_size: DEFAULT_MIN_COMPRESS_SIZE,
            compress_types: default_compress_types(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    Lru,
    Lfu,
}

impl FromStr for CacheStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "lru" => Ok(CacheStrategy::Lru),
            "lfu" => Ok(CacheStrategy::Lfu),
            other => Err(format!(
                "unknown cache strategy `{other}` (expected lru or lfu)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub size_bytes: u64,
    pub ttl: Duration,
    pub strategy: CacheStrategy,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            size_bytes: DEFAULT_CACHE_SIZE_BYTES,
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            strategy: CacheStrategy::Lru,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LimitSettings {
    pub max_file_size: u64,
    pub max_body_size: u64,
    pub max_header_bytes: u64,
    /// Requests per second per client IP; 0 disables rate limiting.
    pub rate_limit_per_ip: u32,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            rate_limit_per_ip: DEFAULT_RATE_LIMIT_PER_IP,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutSettings {
    pub read: Duration,
    pub read_header: Duration,
    pub write: Duration,
    pub idle: Duration,
    pub shutdown: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            read_header: Duration::from_secs(DEFAULT_READ_HEADER_TIMEOUT_SECS),
            write: Duration::from_secs(DEFAULT_WRITE_TIMEOUT_SECS),
            idle: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            shutdown: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VersioningSettings {
    pub enable: bool,
    /// Empty selects the default `{base}.{hash}{ext}` expansion.
    pub pattern: String,
    pub hash_length: usize,
    pub static_prefixes: Vec<String>,
    pub url_prefix: String,
}

impl Default for VersioningSettings {
    fn default() -> Self {
        Self {
            enable: false,
            pattern: String::new(),
            hash_length: DEFAULT_VERSION_HASH_LENGTH,
            static_prefixes: default_static_prefixes(),
            url_prefix: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheControlSettings {
    pub static_max_age: u64,
    pub dynamic_max_age: u64,
}

impl Default for CacheControlSettings {
    fn default() -> Self {
        Self {
            static_max_age: DEFAULT_STATIC_MAX_AGE_SECS,
            dynamic_max_age: DEFAULT_DYNAMIC_MAX_AGE_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub enable: bool,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self { enable: true }
    }
}

#[derive(Debug, Clone)]
pub struct SecuritySettings {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    /// Empty selects the built-in restrictive policy.
    pub csp: String,
    pub hsts: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec![
                "GET".to_string(),
                "HEAD".to_string(),
                "OPTIONS".to_string(),
            ],
            csp: String::new(),
            hsts: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSettings {
    pub enable: bool,
    pub endpoint: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enable: false,
            endpoint: DEFAULT_METRICS_ENDPOINT.to_string(),
        }
    }
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
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
    compression: RawCompressionSettings,
    cache: RawCacheSettings,
    limits: RawLimitSettings,
    timeouts: RawTimeoutSettings,
    versioning: RawVersioningSettings,
    cache_control: RawCacheControlSettings,
    watcher: RawWatcherSettings,
    security: RawSecuritySettings,
    metrics: RawMetricsSettings,
    debug: Option<bool>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(root) = overrides.root.as_ref() {
            self.server.root = Some(root.clone());
        }
        if let Some(index) = overrides.index_file.as_ref() {
            self.server.index_file = Some(index.clone());
        }
        if let Some(browsing) = overrides.allow_browsing {
            self.server.allow_browsing = Some(browsing);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(size) = overrides.cache_size_bytes {
            self.cache.size_bytes = Some(size);
        }
        if let Some(ttl) = overrides.cache_ttl_seconds {
            self.cache.ttl_seconds = Some(ttl);
        }
        if let Some(strategy) = overrides.cache_strategy.as_ref() {
            self.cache.strategy = Some(strategy.clone());
        }
        if let Some(enable) = overrides.enable_versioning {
            self.versioning.enable = Some(enable);
        }
        if let Some(length) = overrides.version_hash_length {
            self.versioning.hash_length = Some(length);
        }
        if let Some(pattern) = overrides.versioning_pattern.as_ref() {
            self.versioning.pattern = Some(pattern.clone());
        }
        if let Some(prefix) = overrides.url_prefix.as_ref() {
            self.versioning.url_prefix = Some(prefix.clone());
        }
        if let Some(enable) = overrides.enable_watcher {
            self.watcher.enable = Some(enable);
        }
        if let Some(enable) = overrides.enable_metrics {
            self.metrics.enable = Some(enable);
        }
        if let Some(limit) = overrides.rate_limit_per_ip {
            self.limits.rate_limit_per_ip = Some(limit);
        }
        if let Some(seconds) = overrides.shutdown_timeout_seconds {
            self.timeouts.shutdown_seconds = Some(seconds);
        }
        if let Some(debug) = overrides.debug {
            self.debug = Some(debug);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            compression,
            cache,
            limits,
            timeouts,
            versioning,
            cache_control,
            watcher,
            security,
            metrics,
            debug,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let compression = build_compression_settings(compression);
        let cache = build_cache_settings(cache)?;
        let limits = build_limit_settings(limits)?;
        let timeouts = build_timeout_settings(timeouts)?;
        let versioning = build_versioning_settings(versioning)?;
        let cache_control = build_cache_control_settings(cache_control);
        let watcher = WatcherSettings {
            enable: watcher.enable.unwrap_or(true),
        };
        let security = build_security_settings(security);
        let metrics = build_metrics_settings(metrics)?;

        Ok(Self {
            server,
            logging,
            compression,
            cache,
            limits,
            timeouts,
            versioning,
            cache_control,
            watcher,
            security,
            metrics,
            debug: debug.unwrap_or(false),
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

    let index_file = server
        .index_file
        .unwrap_or_else(|| DEFAULT_INDEX_FILE.to_string());
    if index_file.is_empty() || index_file.contains('/') {
        return Err(LoadError::invalid(
            "server.index_file",
            "must be a bare file name",
        ));
    }

    Ok(ServerSettings {
        addr,
        root: server.root.unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT)),
        index_file,
        allow_browsing: server.allow_browsing.unwrap_or(false),
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

fn build_compression_settings(compression: RawCompressionSettings) -> CompressionSettings {
    CompressionSettings {
        gzip: compression.gzip.unwrap_or(true),
        brotli: compression.brotli.unwrap_or(true),
        level: compression.level.unwrap_or(DEFAULT_COMPRESSION_LEVEL),
        min_compress_size: compression
            .min_compress_size
            .unwrap_or(DEFAULT_MIN_COMPRESS_SIZE),
        compress_types: compression
            .compress_types
            .unwrap_or_else(default_compress_types),
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl_seconds = cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS);
    if ttl_seconds == 0 {
        return Err(LoadError::invalid(
            "cache.ttl_seconds",
            "must be greater than zero",
        ));
    }

    let strategy = match cache.strategy {
        Some(value) => CacheStrategy::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.strategy", reason))?,
        None => CacheStrategy::Lru,
    };

    Ok(CacheSettings {
        size_bytes: cache.size_bytes.unwrap_or(DEFAULT_CACHE_SIZE_BYTES),
        ttl: Duration::from_secs(ttl_seconds),
        strategy,
    })
}

fn build_limit_settings(limits: RawLimitSettings) -> Result<LimitSettings, LoadError> {
    let max_file_size = limits.max_file_size.unwrap_or(DEFAULT_MAX_FILE_SIZE);
    if max_file_size == 0 {
        return Err(LoadError::invalid(
            "limits.max_file_size",
            "must be greater than zero",
        ));
    }

    let max_body_size = limits.max_body_size.unwrap_or(DEFAULT_MAX_BODY_SIZE);
    if max_body_size == 0 {
        return Err(LoadError::invalid(
            "limits.max_body_size",
            "must be greater than zero",
        ));
    }

    Ok(LimitSettings {
        max_file_size,
        max_body_size,
        max_header_bytes: limits.max_header_bytes.unwrap_or(DEFAULT_MAX_HEADER_BYTES),
        rate_limit_per_ip: limits
            .rate_limit_per_ip
            .unwrap_or(DEFAULT_RATE_LIMIT_PER_IP),
    })
}

fn build_timeout_settings(timeouts: RawTimeoutSettings) -> Result<TimeoutSettings, LoadError> {
    let entries: [(&'static str, Option<u64>, u64); 5] = [
        (
            "timeouts.read_seconds",
            timeouts.read_seconds,
            DEFAULT_READ_TIMEOUT_SECS,
        ),
        (
            "timeouts.read_header_seconds",
            timeouts.read_header_seconds,
            DEFAULT_READ_HEADER_TIMEOUT_SECS,
        ),
        (
            "timeouts.write_seconds",
            timeouts.write_seconds,
            DEFAULT_WRITE_TIMEOUT_SECS,
        ),
        (
            "timeouts.idle_seconds",
            timeouts.idle_seconds,
            DEFAULT_IDLE_TIMEOUT_SECS,
        ),
        (
            "timeouts.shutdown_seconds",
            timeouts.shutdown_seconds,
            DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        ),
    ];

    let mut resolved = [0u64; 5];
    for (slot, (key, value, default)) in resolved.iter_mut().zip(entries) {
        let seconds = value.unwrap_or(default);
        if seconds == 0 {
            return Err(LoadError::invalid(key, "must be greater than zero"));
        }
        *slot = seconds;
    }

    Ok(TimeoutSettings {
        read: Duration::from_secs(resolved[0]),
        read_header: Duration::from_secs(resolved[1]),
        write: Duration::from_secs(resolved[2]),
        idle: Duration::from_secs(resolved[3]),
        shutdown: Duration::from_secs(resolved[4]),
    })
}

fn build_versioning_settings(
    versioning: RawVersioningSettings,
) -> Result<VersioningSettings, LoadError> {
    let hash_length = versioning
        .hash_length
        .unwrap_or(DEFAULT_VERSION_HASH_LENGTH);
    if !(MIN_VERSION_HASH_LENGTH..=MAX_VERSION_HASH_LENGTH).contains(&hash_length) {
        return Err(LoadError::invalid(
            "versioning.hash_length",
            format!(
                "must be between {MIN_VERSION_HASH_LENGTH} and {MAX_VERSION_HASH_LENGTH}, got {hash_length}"
            ),
        ));
    }
    if hash_length % 2 != 0 {
        return Err(LoadError::invalid(
            "versioning.hash_length",
            format!("must be even, got {hash_length}"),
        ));
    }

    let pattern = versioning.pattern.unwrap_or_default();
    if !pattern.is_empty() && !pattern.contains("{hash}") {
        return Err(LoadError::invalid(
            "versioning.pattern",
            "custom pattern must contain the {hash} placeholder",
        ));
    }

    let enable = versioning.enable.unwrap_or(false);
    let static_prefixes = versioning
        .static_prefixes
        .unwrap_or_else(default_static_prefixes);
    let url_prefix = versioning.url_prefix.unwrap_or_default();

    // A serve prefix that no static prefix can ever match would register
    // assets no HTML reference resolves to.
    if enable && !url_prefix.is_empty() && !static_prefixes.is_empty() {
        let compatible = static_prefixes.iter().any(|prefix| {
            prefix.starts_with(&url_prefix) || url_prefix == prefix.trim_end_matches('/')
        });
        if !compatible {
            return Err(LoadError::invalid(
                "versioning.url_prefix",
                format!(
                    "no static prefix is compatible with url_prefix `{url_prefix}` (expected e.g. `{url_prefix}/`)"
                ),
            ));
        }
    }

    Ok(VersioningSettings {
        enable,
        pattern,
        hash_length,
        static_prefixes,
        url_prefix,
    })
}

fn build_cache_control_settings(cache_control: RawCacheControlSettings) -> CacheControlSettings {
    CacheControlSettings {
        static_max_age: cache_control
            .static_max_age
            .unwrap_or(DEFAULT_STATIC_MAX_AGE_SECS),
        dynamic_max_age: cache_control
            .dynamic_max_age
            .unwrap_or(DEFAULT_DYNAMIC_MAX_AGE_SECS),
    }
}

fn build_security_settings(security: RawSecuritySettings) -> SecuritySettings {
    let defaults = SecuritySettings::default();
    SecuritySettings {
        allowed_origins: security.allowed_origins.unwrap_or(defaults.allowed_origins),
        allowed_methods: security.allowed_methods.unwrap_or(defaults.allowed_methods),
        csp: security.csp.unwrap_or_default(),
        hsts: security.hsts.unwrap_or(false),
    }
}

fn build_metrics_settings(metrics: RawMetricsSettings) -> Result<MetricsSettings, LoadError> {
    let endpoint = metrics
        .endpoint
        .unwrap_or_else(|| DEFAULT_METRICS_ENDPOINT.to_string());
    if !endpoint.starts_with('/') {
        return Err(LoadError::invalid(
            "metrics.endpoint",
            "must be an absolute path",
        ));
    }

    Ok(MetricsSettings {
        enable: metrics.enable.unwrap_or(false),
        endpoint,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    root: Option<PathBuf>,
    index_file: Option<String>,
    allow_browsing: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCompressionSettings {
    gzip: Option<bool>,
    brotli: Option<bool>,
    level: Option<u32>,
    min_compress_size: Option<u64>,
    compress_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    size_bytes: Option<u64>,
    ttl_seconds: Option<u64>,
    strategy: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLimitSettings {
    max_file_size: Option<u64>,
    max_body_size: Option<u64>,
    max_header_bytes: Option<u64>,
    rate_limit_per_ip: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTimeoutSettings {
    read_seconds: Option<u64>,
    read_header_seconds: Option<u64>,
    write_seconds: Option<u64>,
    idle_seconds: Option<u64>,
    shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawVersioningSettings {
    enable: Option<bool>,
    pattern: Option<String>,
    hash_length: Option<usize>,
    static_prefixes: Option<Vec<String>>,
    url_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheControlSettings {
    static_max_age: Option<u64>,
    dynamic_max_age: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWatcherSettings {
    enable: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSecuritySettings {
    allowed_origins: Option<Vec<String>>,
    allowed_methods: Option<Vec<String>>,
    csp: Option<String>,
    hsts: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMetricsSettings {
    enable: Option<bool>,
    endpoint: Option<String>,
}
