use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    application::{
        registry::METRIC_DISCOVERY_SKIPPED,
        render::{METRIC_PLUGIN_FAILURES, METRIC_PLUGIN_INVOCATIONS, METRIC_PLUGIN_LATENCY},
    },
    config::{LogFormat, LoggingSettings},
};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
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
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_PLUGIN_INVOCATIONS,
            Unit::Count,
            "Total number of plugin invocations, labelled by plugin and outcome."
        );
        describe_counter!(
            METRIC_PLUGIN_FAILURES,
            Unit::Count,
            "Total number of plugin invocations that fell back to default rendering."
        );
        describe_histogram!(
            METRIC_PLUGIN_LATENCY,
            Unit::Milliseconds,
            "Plugin invocation latency in milliseconds."
        );
        describe_counter!(
            METRIC_DISCOVERY_SKIPPED,
            Unit::Count,
            "Total number of route-table candidates skipped during discovery."
        );
    });
}
