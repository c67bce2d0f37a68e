//! Tracing setup: compact console logs plus an OpenTelemetry layer, with
//! OTLP span export behind the `telemetry` cargo feature.

use opentelemetry::trace::{TraceContextExt as _, TraceId};
use tracing_opentelemetry::OpenTelemetrySpanExt as _;
use tracing_subscriber::{EnvFilter, prelude::*};

/// Service name stamped on exported traces; also used as the Kubernetes
/// event reporter.
pub static SERVICE_NAME: &str = "topology-controller";

/// Trace id of the current span, for correlating log lines with exported
/// spans. [`TraceId::INVALID`] outside an instrumented span.
pub fn get_trace_id() -> TraceId {
    tracing::Span::current()
        .context()
        .span()
        .span_context()
        .trace_id()
}

fn build_tracer() -> opentelemetry_sdk::trace::Tracer {
    use opentelemetry::trace::TracerProvider as _;

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder();
    #[cfg(feature = "telemetry")]
    let provider = provider.with_batch_exporter(
        opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .build()
            .expect("failed to build the OTLP span exporter"),
    );
    provider.build().tracer(SERVICE_NAME)
}

/// Installs the global subscriber. `RUST_LOG` controls filtering and
/// defaults to `info`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_opentelemetry::layer().with_tracer(build_tracer()))
        .with(tracing_subscriber::fmt::layer().compact())
        .with(filter)
        .init();
}
