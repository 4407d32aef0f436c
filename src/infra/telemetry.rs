use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr; stdout carries command output.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(std::io::stderr)
            .compact()
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "tracker_cache_query_total",
            Unit::Count,
            "Total number of router queries, labelled by route."
        );
        describe_histogram!(
            "tracker_cache_query_ms",
            Unit::Milliseconds,
            "Router query latency in milliseconds."
        );
        describe_histogram!(
            "tracker_cache_shard_load_ms",
            Unit::Milliseconds,
            "Initial shard scan and index build latency in milliseconds."
        );
        describe_counter!(
            "tracker_cache_change_applied_total",
            Unit::Count,
            "Total number of change entries applied to shard indexes."
        );
        describe_counter!(
            "tracker_cache_change_stale_total",
            Unit::Count,
            "Total number of change entries dropped by the revision gate."
        );
        describe_counter!(
            "tracker_cache_rollover_total",
            Unit::Count,
            "Total number of daily shard teardowns."
        );
    });
}
