use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the mdrelay binary.
#[derive(Debug, Parser)]
#[command(
    name = "mdrelay",
    version,
    about = "Markdown renderer with plugin-provided node overrides"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "MDRELAY_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the rendering HTTP service.
    Serve(Box<ServeArgs>),
    /// Render a markdown file (or stdin) through the discovered plugins.
    Render(RenderArgs),
    /// Discover plugins and print them in trial order as JSON.
    Plugins(PluginsArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: DiscoveryOverrides,

    /// Markdown file to render; reads stdin when omitted.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct PluginsArgs {
    #[command(flatten)]
    pub overrides: DiscoveryOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct DiscoveryOverrides {
    /// Override the base64-encoded route table.
    #[arg(long = "discovery-routes", value_name = "BASE64")]
    pub discovery_routes: Option<String>,

    /// Override the per-candidate discovery timeout.
    #[arg(long = "discovery-timeout-ms", value_name = "MILLIS")]
    pub discovery_timeout_ms: Option<u64>,

    /// Override the per-invocation plugin timeout.
    #[arg(long = "plugins-timeout-ms", value_name = "MILLIS")]
    pub plugins_timeout_ms: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub discovery: DiscoveryOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

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
