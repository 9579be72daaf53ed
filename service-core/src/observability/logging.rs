use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

fn env_filter(log_level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level))
}

fn json_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .json()
        .flatten_event(true)
}

/// Install the global subscriber: env-filtered JSON logs, plus OTLP span
/// export when an endpoint is configured. A collector that cannot be set up
/// leaves logging on the JSON layer alone.
pub fn init_tracing(service_name: &str, log_level: &str, otlp_endpoint: Option<&str>) {
    let Some(endpoint) = otlp_endpoint else {
        tracing_subscriber::registry()
            .with(env_filter(log_level))
            .with(json_layer())
            .init();
        return;
    };

    let otlp_exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint);

    let tracer = match opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(otlp_exporter)
        .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
            KeyValue::new("service.name", service_name.to_string()),
        ])))
        .install_batch(runtime::Tokio)
    {
        Ok(t) => t,
        Err(e) => {
            tracing_subscriber::registry()
                .with(env_filter(log_level))
                .with(json_layer())
                .init();
            tracing::error!(
                service_name,
                endpoint,
                error = %e,
                "Failed to initialize OTLP tracer, exporting logs only"
            );
            return;
        }
    };

    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(telemetry)
        .with(json_layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::Registry;

    #[test]
    fn json_layer_stacks_on_filtered_and_traced_registries() {
        let plain = Registry::default()
            .with(env_filter("info"))
            .with(json_layer());
        tracing::subscriber::with_default(plain, || tracing::info!("plain"));

        let traced = Registry::default()
            .with(env_filter("info"))
            .with(tracing_opentelemetry::layer())
            .with(json_layer());
        tracing::subscriber::with_default(traced, || tracing::info!("traced"));
    }
}
