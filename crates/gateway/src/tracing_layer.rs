//! Log and trace subscriber setup.

use opentelemetry::{trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use codemode_core::{Error, Result};

const DEFAULT_FILTER: &str = "info,codemode=debug";
const SERVICE_NAME: &str = "open-codemode";

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the filter, `CODEMODE_JSON_LOGS=1` switches stdout to
/// JSON lines and `OTEL_EXPORTER_OTLP_ENDPOINT` adds an OTLP exporter.
pub fn configure_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.into()),
    );

    let json = std::env::var("CODEMODE_JSON_LOGS").map_or(false, |v| v == "1" || v == "true");
    let fmt_layer = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    let installed = if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        let provider = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint.clone()),
            )
            .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", SERVICE_NAME),
            ])))
            .install_batch(runtime::Tokio)
            .map_err(|e| Error::config(format!("Failed to install OTLP pipeline: {}", e)))?;
        let tracer = provider.tracer(SERVICE_NAME);
        opentelemetry::global::set_tracer_provider(provider);

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        let installed = registry.with(otel_layer).try_init();
        tracing::info!(endpoint = %endpoint, "OpenTelemetry tracing enabled");
        installed
    } else {
        registry.try_init()
    };

    installed.map_err(|e| Error::config(format!("Failed to install subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_tracing_installs_once() {
        std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT");
        assert!(configure_tracing().is_ok());
        // A second global subscriber is refused.
        assert!(matches!(configure_tracing(), Err(Error::Config(_))));
    }
}
