//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{net::SocketAddr, num::NonZeroUsize, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{
    CliArgs, Command, DiscoveryOverrides, PluginsArgs, RenderArgs, ServeArgs, ServeOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "mdrelay";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_ROUTES_ENV: &str = "PLATFORM_ROUTES";
const DEFAULT_SELF_PREFIX: &str = "https://controller";
const DEFAULT_SECURE_PREFIX: &str = "https://";
const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_DISCOVERY_CONCURRENCY: u64 = 8;
const DEFAULT_PLUGIN_TIMEOUT_MS: u64 = 10_000;
const PORT_ENV: &str = "PORT";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub discovery: DiscoverySettings,
    pub plugins: PluginSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
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
pub struct DiscoverySettings {
    /// Base64-encoded JSON route table; `None` means no plugins are available.
    pub routes: Option<String>,
    /// Routes with this prefix belong to this service and are never queried.
    pub self_prefix: String,
    /// Only routes with this prefix are queried.
    pub secure_prefix: String,
    pub timeout: Duration,
    pub concurrency: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct PluginSettings {
    pub timeout: Duration,
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

    builder = builder.add_source(Environment::with_prefix("MDRELAY").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_environment_fallbacks(|name| std::env::var(name).ok());

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Render(args)) => raw.apply_discovery_overrides(&args.overrides),
        Some(Command::Plugins(args)) => raw.apply_discovery_overrides(&args.overrides),
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
    discovery: RawDiscoverySettings,
    plugins: RawPluginSettings,
}

impl RawSettings {
    /// Fill gaps from the platform's conventional variables: the listener port and the route
    /// table variable named by `discovery.routes_env`.
    fn apply_environment_fallbacks(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.server.port.is_none() {
            self.server.port_env = lookup(PORT_ENV);
        }
        if self.discovery.routes.is_none() {
            let name = self
                .discovery
                .routes_env
                .clone()
                .unwrap_or_else(|| DEFAULT_ROUTES_ENV.to_string());
            self.discovery.routes = lookup(&name);
        }
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }

        self.apply_discovery_overrides(&overrides.discovery);
    }

    fn apply_discovery_overrides(&mut self, overrides: &DiscoveryOverrides) {
        if let Some(routes) = overrides.discovery_routes.as_ref() {
            self.discovery.routes = Some(routes.clone());
        }
        if let Some(timeout) = overrides.discovery_timeout_ms {
            self.discovery.timeout_ms = Some(timeout);
        }
        if let Some(timeout) = overrides.plugins_timeout_ms {
            self.plugins.timeout_ms = Some(timeout);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            discovery,
            plugins,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let discovery = build_discovery_settings(discovery)?;
        let plugins = build_plugin_settings(plugins)?;

        Ok(Self {
            server,
            logging,
            discovery,
            plugins,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = match (server.port, server.port_env) {
        (Some(port), _) => port,
        (None, Some(raw)) => raw.trim().parse::<u16>().map_err(|err| {
            LoadError::invalid("server.port", format!("`{PORT_ENV}` is not a port: {err}"))
        })?,
        (None, None) => DEFAULT_PORT,
    };
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
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

fn build_discovery_settings(
    discovery: RawDiscoverySettings,
) -> Result<DiscoverySettings, LoadError> {
    let routes = discovery.routes.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let self_prefix = discovery
        .self_prefix
        .unwrap_or_else(|| DEFAULT_SELF_PREFIX.to_string());
    if self_prefix.is_empty() {
        return Err(LoadError::invalid(
            "discovery.self_prefix",
            "prefix must not be empty",
        ));
    }

    let secure_prefix = discovery
        .secure_prefix
        .unwrap_or_else(|| DEFAULT_SECURE_PREFIX.to_string());

    let timeout = non_zero_millis(
        discovery.timeout_ms.unwrap_or(DEFAULT_DISCOVERY_TIMEOUT_MS),
        "discovery.timeout_ms",
    )?;

    let concurrency = discovery
        .concurrency
        .unwrap_or(DEFAULT_DISCOVERY_CONCURRENCY);
    let concurrency = usize::try_from(concurrency)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid("discovery.concurrency", "must be greater than zero")
        })?;

    Ok(DiscoverySettings {
        routes,
        self_prefix,
        secure_prefix,
        timeout,
        concurrency,
    })
}

fn build_plugin_settings(plugins: RawPluginSettings) -> Result<PluginSettings, LoadError> {
    let timeout = non_zero_millis(
        plugins.timeout_ms.unwrap_or(DEFAULT_PLUGIN_TIMEOUT_MS),
        "plugins.timeout_ms",
    )?;
    Ok(PluginSettings { timeout })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    #[serde(skip)]
    port_env: Option<String>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDiscoverySettings {
    routes: Option<String>,
    routes_env: Option<String>,
    self_prefix: Option<String>,
    secure_prefix: Option<String>,
    timeout_ms: Option<u64>,
    concurrency: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPluginSettings {
    timeout_ms: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}
