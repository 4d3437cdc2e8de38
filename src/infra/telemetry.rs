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

pub const METRIC_RENDER_TOTAL: &str = "docmgr_render_total";
pub const METRIC_RENDER_FAILURES: &str = "docmgr_render_failures_total";
pub const METRIC_VALIDATION_REJECTIONS: &str = "docmgr_validation_rejections_total";
pub const METRIC_IMAGES_EMBEDDED: &str = "docmgr_images_embedded_total";
pub const METRIC_IMAGE_FAILURES: &str = "docmgr_image_failures_total";
pub const METRIC_RENDER_MS: &str = "docmgr_render_ms";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so rendered HTML on stdout stays clean.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
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

/// Register metric descriptions with whichever recorder the host installed.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_RENDER_TOTAL,
            Unit::Count,
            "Total number of render requests handled by the pipeline."
        );
        describe_counter!(
            METRIC_RENDER_FAILURES,
            Unit::Count,
            "Renders that produced an error panel instead of content."
        );
        describe_counter!(
            METRIC_VALIDATION_REJECTIONS,
            Unit::Count,
            "Files refused by the validator, labelled by reason."
        );
        describe_counter!(
            METRIC_IMAGES_EMBEDDED,
            Unit::Count,
            "Relative images inlined as data URIs."
        );
        describe_counter!(
            METRIC_IMAGE_FAILURES,
            Unit::Count,
            "Image references replaced by an inline error marker."
        );
        describe_histogram!(
            METRIC_RENDER_MS,
            Unit::Milliseconds,
            "End-to-end render latency in milliseconds."
        );
    });
}
