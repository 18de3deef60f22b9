//! Distributed tracing configuration.

use codemode_core::config::TelemetryConfig;
use codemode_core::{Error, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SERVICE_NAME: &str = "codemode";

/// Configure stdout logging and, when `OTEL_EXPORTER_OTLP_ENDPOINT` is set,
/// OpenTelemetry export.
pub fn configure_tracing(config: &TelemetryConfig) -> Result<()> {
    // RUST_LOG wins over the configured filter
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    // Exactly one of these is Some
    let (json_layer, text_layer) = if config.json_logs {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer);

    // Check OTLP endpoint
    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        let provider = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint.clone()),
            )
            .with_trace_config(
                sdktrace::Config::default().with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    SERVICE_NAME,
                )])),
            )
            .install_batch(runtime::Tokio)
            .map_err(|e| Error::config(format!("Failed to install OTLP pipeline: {}", e)))?;
        let tracer = provider.tracer(SERVICE_NAME);
        opentelemetry::global::set_tracer_provider(provider);

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        registry
            .with(otel_layer)
            .try_init()
            .map_err(|e| Error::config(format!("Failed to install tracing subscriber: {}", e)))?;
        tracing::info!(endpoint = %endpoint, "OpenTelemetry tracing enabled");
    } else {
        registry
            .try_init()
            .map_err(|e| Error::config(format!("Failed to install tracing subscriber: {}", e)))?;
    }

    Ok(())
}

/// Flush pending spans. Call once on the way out.
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
