//! Process-wide tracing init: env-filtered `fmt` subscriber, an optional
//! OTLP layer when `OTEL_EXPORTER_OTLP_ENDPOINT` is set, plus an optional
//! Prometheus metrics exporter bound on a side port.

use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber from `RUST_LOG`, defaulting
/// to `info` when unset. Adds an OpenTelemetry layer exporting spans over
/// OTLP/gRPC when `OTEL_EXPORTER_OTLP_ENDPOINT` names a collector.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer();

    match std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Ok(endpoint) => match build_otlp_layer(&endpoint) {
            Ok(otel_layer) => {
                tracing_subscriber::registry().with(env_filter).with(otel_layer).with(fmt_layer).init();
            }
            Err(e) => {
                tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
                tracing::warn!(error = %e, endpoint, "failed to start OTLP exporter, continuing with local logs only");
            }
        },
        Err(_) => {
            tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
        }
    }
}

fn build_otlp_layer(endpoint: &str) -> Result<impl tracing_subscriber::Layer<tracing_subscriber::Registry>, String> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| e.to_string())?;
    let provider = SdkTracerProvider::builder().with_batch_exporter(exporter).build();
    global::set_tracer_provider(provider);
    let tracer = global::tracer("cascade-cli");
    Ok(tracing_opentelemetry::layer().with_tracer(tracer))
}

/// Starts the Prometheus metrics exporter on `METRICS_PORT` (default
/// 9464), if the environment var is parseable or unset. A malformed value
/// is logged and the exporter is skipped rather than failing the run.
pub fn init_metrics_exporter() {
    let port: u16 = std::env::var("METRICS_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(9464);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(%addr, "metrics exporter listening"),
        Err(e) => tracing::warn!(error = %e, "failed to start metrics exporter, continuing without it"),
    }
}
