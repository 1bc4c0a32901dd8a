use std::process;

use serde_json::json;
use smartcache::{
    CacheError,
    cache::{EntityRegistry, mermaid_diagram, related_tables},
    config::{self, LoadError, LogFormat, Settings},
    telemetry::{self, TelemetryError},
};
use thiserror::Error;
use tracing::{Dispatch, Level, debug, dispatcher, error};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("failed to render output: {0}")]
    Output(#[from] serde_json::Error),
}

fn main() {
    if let Err(error) = run() {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    let command = cli_args.command.unwrap_or(config::Command::Entities);

    telemetry::init(&settings.logging)?;

    let registry = EntityRegistry::builder()
        .declare_all(settings.entities.iter().cloned())
        .build()?;
    debug!(entities = registry.len(), "Entity registry built");

    match command {
        config::Command::Entities => print_entities(&registry),
        config::Command::Relations => {
            println!("{}", mermaid_diagram(&registry.discover()));
            Ok(())
        }
        config::Command::Related(args) => print_related(&registry, &args.table),
        config::Command::Config => print_config(&settings),
    }
}

fn print_entities(registry: &EntityRegistry) -> Result<(), AppError> {
    let entities = registry.discover();
    if entities.is_empty() {
        println!("No cacheable entities declared.");
        return Ok(());
    }

    let name_width = entities
        .iter()
        .map(|e| e.short_name.len())
        .chain(std::iter::once("ENTITY".len()))
        .max()
        .unwrap_or_default();
    let table_width = entities
        .iter()
        .map(|e| e.table.len())
        .chain(std::iter::once("TABLE".len()))
        .max()
        .unwrap_or_default();

    println!(
        "{:<name_width$}  {:<table_width$}  {:<8}  INVALIDATES",
        "ENTITY", "TABLE", "CACHED"
    );
    for entity in &entities {
        let cached = if registry.is_enabled(&entity.short_name) {
            "yes"
        } else {
            "no"
        };
        let invalidates = if entity.invalidates.is_empty() {
            "-".to_string()
        } else {
            entity.invalidates.join(", ")
        };
        println!(
            "{:<name_width$}  {:<table_width$}  {:<8}  {}",
            entity.short_name, entity.table, cached, invalidates
        );
    }
    Ok(())
}

fn print_related(registry: &EntityRegistry, table: &str) -> Result<(), AppError> {
    if registry.by_table(table).is_none() {
        return Err(CacheError::unknown_table(table).into());
    }
    for related in related_tables(table, &registry.discover()) {
        println!("{related}");
    }
    Ok(())
}

fn print_config(settings: &Settings) -> Result<(), AppError> {
    let format = match settings.logging.format {
        LogFormat::Json => "json",
        LogFormat::Compact => "compact",
    };
    let resolved = json!({
        "cache": settings.cache,
        "logging": {
            "level": settings.logging.level.to_string(),
            "format": format,
        },
        "entities": settings.entities,
    });
    println!("{}", serde_json::to_string_pretty(&resolved)?);
    Ok(())
}
