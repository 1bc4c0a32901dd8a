use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use thiserror::Error;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metric_names::{
    METRIC_BYPASS_TOTAL, METRIC_HIT_TOTAL, METRIC_INVALIDATE_MS, METRIC_INVALIDATION_DROPPED_TOTAL,
    METRIC_MISS_TOTAL, METRIC_MUTATION_TOTAL, METRIC_TAG_FLUSH_TOTAL,
};
use crate::config::{LogFormat, LoggingSettings};

static METRIC_DESCRIPTIONS: Once = Once::new();

#[derive(Debug, Error)]
#[error("telemetry initialization failed: {0}")]
pub struct TelemetryError(String);

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), TelemetryError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| TelemetryError(format!("failed to install tracing subscriber: {err}")))
}

/// Register descriptions for every metric the cache emits. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_HIT_TOTAL,
            Unit::Count,
            "Total number of cached lookups served from the store."
        );
        describe_counter!(
            METRIC_MISS_TOTAL,
            Unit::Count,
            "Total number of cached lookups that ran the query."
        );
        describe_counter!(
            METRIC_BYPASS_TOTAL,
            Unit::Count,
            "Total number of lookups that ran the query without consulting the cache."
        );
        describe_counter!(
            METRIC_TAG_FLUSH_TOTAL,
            Unit::Count,
            "Total number of tags purged."
        );
        describe_counter!(
            METRIC_INVALIDATION_DROPPED_TOTAL,
            Unit::Count,
            "Total number of tag purges dropped because the store has no tag support."
        );
        describe_counter!(
            METRIC_MUTATION_TOTAL,
            Unit::Count,
            "Total number of entity mutations handled by the invalidation coordinator."
        );
        describe_histogram!(
            METRIC_INVALIDATE_MS,
            Unit::Milliseconds,
            "Invalidation latency per mutation in milliseconds."
        );
    });
}
