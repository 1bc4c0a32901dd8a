use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the `smartcache` binary.
#[derive(Debug, Parser)]
#[command(
    name = "smartcache",
    version,
    about = "Inspect SmartCache entity relations and configuration"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "SMARTCACHE_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: CacheOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone, PartialEq, Eq)]
pub enum Command {
    /// List cacheable entity types and their tables.
    Entities,
    /// Print the invalidation relations as a Mermaid diagram.
    Relations,
    /// List the tables cleared together with TABLE.
    Related(RelatedArgs),
    /// Print the resolved cache configuration as JSON.
    Config,
}

#[derive(Debug, Args, Clone, PartialEq, Eq)]
pub struct RelatedArgs {
    /// Table whose declared targets should be resolved.
    #[arg(value_name = "TABLE")]
    pub table: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Override the cache enable switch.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub enabled: Option<bool>,

    /// Override the default TTL in minutes (0 = until invalidated).
    #[arg(long = "cache-ttl-minutes", value_name = "MINUTES", global = true)]
    pub ttl_minutes: Option<u64>,

    /// Override the key and tag prefix.
    #[arg(long = "cache-prefix", value_name = "PREFIX", global = true)]
    pub prefix: Option<String>,

    /// Toggle hit/miss and invalidation log lines.
    #[arg(
        long = "cache-logging",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub logging: Option<bool>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}
