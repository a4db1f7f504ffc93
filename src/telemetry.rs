//! OpenTelemetry tracing export
//!
//! Spans are shipped over OTLP/gRPC when an endpoint is configured. The W3C
//! trace-context propagator is installed so that the server can continue
//! traces started by the API server.

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::{runtime, trace, Resource};
use tracing::Subscriber;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;

use crate::error::{Error, Result};

/// Environment variable holding the collector endpoint
pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// `service.name` reported with every span
pub const SERVICE_NAME: &str = "admission-webhook";

/// Build the tracing layer that exports spans to `endpoint`
///
/// `_subscriber` only pins the layer's subscriber type.
pub fn init_telemetry<S>(
    _subscriber: &S,
    endpoint: &str,
) -> Result<OpenTelemetryLayer<S, opentelemetry_sdk::trace::Tracer>>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    global::set_text_map_propagator(TraceContextPropagator::new());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(trace::config().with_resource(Resource::new(vec![
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])))
        .install_batch(runtime::Tokio)
        .map_err(|e| Error::ConfigError(format!("Failed to install OTLP pipeline: {e}")))?;

    Ok(tracing_opentelemetry::layer().with_tracer(tracer))
}

/// Flush pending spans
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}
