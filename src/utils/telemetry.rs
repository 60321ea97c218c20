//! Logging and tracing setup.
//!
//! A `tracing-subscriber` registry with an env filter, a console layer
//! (plain or JSON), an optional daily-rolling file and, with the `otel`
//! feature, an OTLP span exporter.

use std::error::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;

type BoxedLayer =
    Box<dyn Layer<tracing_subscriber::layer::Layered<EnvFilter, Registry>> + Send + Sync>;

/// Keeps the file writer flushing and the OTLP pipeline alive. Drop at exit.
pub struct TelemetryGuard {
    _file: Option<WorkerGuard>,
    #[cfg(feature = "otel")]
    otlp: bool,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otel")]
        {
            if self.otlp {
                opentelemetry::global::shutdown_tracer_provider();
            }
        }
    }
}

pub fn init_telemetry(
    config: &LoggingConfig,
) -> Result<TelemetryGuard, Box<dyn Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.filter))?;
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.json {
        layers.push(fmt::layer().json().with_current_span(true).boxed());
    } else {
        layers.push(fmt::layer().with_target(false).boxed());
    }

    let file_guard = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sisas.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(fmt::layer().with_ansi(false).with_writer(writer).boxed());
            Some(guard)
        }
        None => None,
    };

    #[cfg(feature = "otel")]
    let otlp = if config.otlp {
        layers.push(otlp_layer(&config.service_name)?);
        true
    } else {
        false
    };

    Registry::default().with(filter).with(layers).try_init()?;

    #[cfg(not(feature = "otel"))]
    {
        if config.otlp {
            tracing::warn!("OTLP export requested but sisas was built without the `otel` feature");
        }
    }

    Ok(TelemetryGuard {
        _file: file_guard,
        #[cfg(feature = "otel")]
        otlp,
    })
}

#[cfg(feature = "otel")]
fn otlp_layer(service_name: &str) -> Result<BoxedLayer, Box<dyn Error + Send + Sync>> {
    use opentelemetry::trace::TracerProvider;
    use opentelemetry::{global, KeyValue};
    use opentelemetry_sdk::{
        propagation::TraceContextPropagator, runtime, trace as sdktrace, Resource,
    };

    global::set_text_map_propagator(TraceContextPropagator::new());

    let exporter = opentelemetry_otlp::new_exporter().tonic().build_span_exporter()?;
    let trace_config = sdktrace::Config::default().with_resource(Resource::new(vec![KeyValue::new(
        "service.name",
        service_name.to_string(),
    )]));
    let provider = sdktrace::TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(trace_config)
        .build();
    global::set_tracer_provider(provider.clone());

    let tracer = provider.tracer(service_name.to_string());
    Ok(tracing_opentelemetry::layer().with_tracer(tracer).boxed())
}
