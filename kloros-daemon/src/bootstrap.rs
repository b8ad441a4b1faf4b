//! Tracing subscriber bootstrap: a `fmt` layer always, plus an optional
//! OpenTelemetry OTLP exporter layer behind the `otel` feature, grounded on
//! `knhk-autonomous-system::telemetry::OTelIntegration`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber. Safe to call once per process;
/// a component binary calls this before doing anything else.
pub fn init_tracing(service_name: &str) {
    let filter = EnvFilter::try_from_env("KLOROS_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(feature = "otel")]
    {
        if let Some(layer) = otel_layer(service_name) {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(layer)
                .try_init();
            return;
        }
    }

    #[cfg(not(feature = "otel"))]
    let _ = service_name;

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(feature = "otel")]
fn otel_layer<S>(service_name: &str) -> Option<impl tracing_subscriber::Layer<S>>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{trace::Config, Resource};

    let endpoint = std::env::var("KLOROS_OTLP_ENDPOINT").ok()?;

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
        .with_trace_config(
            Config::default().with_resource(Resource::new(vec![KeyValue::new(
                "service.name",
                service_name.to_string(),
            )])),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .ok()?;

    Some(tracing_opentelemetry::layer().with_tracer(tracer))
}
