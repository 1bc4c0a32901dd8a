//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{num::NonZeroUsize, str::FromStr};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{DEFAULT_PREFIX, EntityDeclaration, SmartCacheConfig};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "smartcache";
const ENV_PREFIX: &str = "SMARTCACHE";

pub use cli::{CacheOverrides, CliArgs, Command, RelatedArgs};

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache: SmartCacheConfig,
    pub logging: LoggingSettings,
    pub entities: Vec<EntityDeclaration>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
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
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    cache: RawCacheSettings,
    logging: RawLoggingSettings,
    entities: Vec<EntityDeclaration>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(enabled) = overrides.enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(ttl) = overrides.ttl_minutes {
            self.cache.ttl_minutes = Some(ttl);
        }
        if let Some(prefix) = overrides.prefix.as_ref() {
            self.cache.prefix = Some(prefix.clone());
        }
        if let Some(logging) = overrides.logging {
            self.cache.logging = Some(logging);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            cache,
            logging,
            entities,
        } = raw;

        let cache = build_cache_settings(cache)?;
        let logging = build_logging_settings(logging)?;
        let entities = build_entity_declarations(entities)?;

        Ok(Self {
            cache,
            logging,
            entities,
        })
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<SmartCacheConfig, LoadError> {
    let defaults = SmartCacheConfig::default();

    let prefix = cache
        .prefix
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_PREFIX.to_string());
    if prefix.is_empty() {
        return Err(LoadError::invalid("cache.prefix", "must not be empty"));
    }
    if prefix.chars().any(char::is_whitespace) {
        return Err(LoadError::invalid(
            "cache.prefix",
            "must not contain whitespace",
        ));
    }

    let query_log_limit = non_zero_usize(
        cache.query_log_limit.unwrap_or(defaults.query_log_limit),
        "cache.query_log_limit",
    )?;

    Ok(SmartCacheConfig {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        ttl_minutes: cache.ttl_minutes.unwrap_or(defaults.ttl_minutes),
        prefix,
        logging: cache.logging.unwrap_or(defaults.logging),
        query_log_limit: query_log_limit.get(),
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

fn build_entity_declarations(
    entities: Vec<EntityDeclaration>,
) -> Result<Vec<EntityDeclaration>, LoadError> {
    let mut seen = std::collections::HashSet::new();
    for entity in &entities {
        if entity.name.trim().is_empty() {
            return Err(LoadError::invalid("entities.name", "must not be empty"));
        }
        if entity.table.trim().is_empty() {
            return Err(LoadError::invalid(
                "entities.table",
                format!("entity `{}` has no table", entity.name),
            ));
        }
        if !seen.insert(entity.name.as_str()) {
            return Err(LoadError::invalid(
                "entities.name",
                format!("entity `{}` is declared more than once", entity.name),
            ));
        }
    }
    Ok(entities)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    ttl_minutes: Option<u64>,
    prefix: Option<String>,
    logging: Option<bool>,
    query_log_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

fn non_zero_usize(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
