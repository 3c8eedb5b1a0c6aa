use std::fs::File;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{self, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::Config;

const METRICS_EXPORT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("cannot open telemetry sink {path}: {source}")]
    Sink { path: String, source: io::Error },
    #[error(transparent)]
    Metrics(#[from] opentelemetry::metrics::MetricsError),
    #[error("{0}")]
    Joined(String),
}

fn join_errors(mut errors: Vec<TelemetryError>) -> Result<(), TelemetryError> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(TelemetryError::Joined(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        )),
    }
}

type ShutdownStep = Box<dyn FnOnce() -> Result<(), TelemetryError> + Send>;

/// Cleanup steps accumulated while the export pipelines are built. The set
/// is frozen once bootstrap returns; nothing registers steps afterwards.
#[derive(Default)]
pub struct TelemetryShutdown {
    steps: Vec<ShutdownStep>,
}

impl TelemetryShutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register<F>(&mut self, step: F)
    where
        F: FnOnce() -> Result<(), TelemetryError> + Send + 'static,
    {
        self.steps.push(Box::new(step));
    }

    /// Run every registered step in registration order, joining their
    /// errors instead of stopping at the first. The list is drained, so a
    /// second invocation does nothing and reports no error.
    pub fn shutdown(&mut self) -> Result<(), TelemetryError> {
        let errors: Vec<TelemetryError> = self
            .steps
            .drain(..)
            .filter_map(|step| step().err())
            .collect();
        join_errors(errors)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Everything bootstrap hands back to the caller: the composed shutdown
/// handle, and the tracer the `tracing` bridge layer should use when trace
/// export is on.
pub struct Telemetry {
    pub shutdown: TelemetryShutdown,
    pub tracer: Option<trace::Tracer>,
}

/// Build the trace and metrics export pipelines for whichever sinks are
/// configured. On failure, already-registered cleanup steps are run and
/// their errors joined onto the original one.
pub fn start(
    service_name: &str,
    service_version: &str,
    config: &Config,
) -> Result<Telemetry, TelemetryError> {
    let mut shutdown = TelemetryShutdown::new();
    let resource = Resource::new(vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", service_version.to_string()),
        KeyValue::new("environment", config.environment.clone()),
    ]);

    let mut tracer = None;
    if let Some(path) = config.trace_destination.as_deref() {
        match init_trace_pipeline(path, service_name, resource.clone(), &mut shutdown) {
            Ok(t) => tracer = Some(t),
            Err(err) => return Err(unwind(shutdown, err)),
        }
    }

    if let Some(path) = config.metrics_destination.as_deref() {
        if let Err(err) = init_metrics_pipeline(path, resource, &mut shutdown) {
            return Err(unwind(shutdown, err));
        }
    }

    Ok(Telemetry { shutdown, tracer })
}

/// Release whatever bootstrap managed to set up before failing, keeping
/// both the original error and any cleanup errors.
fn unwind(mut shutdown: TelemetryShutdown, err: TelemetryError) -> TelemetryError {
    match shutdown.shutdown() {
        Ok(()) => err,
        Err(cleanup) => TelemetryError::Joined(format!("{err}; {cleanup}")),
    }
}

/// Create the sink file and register a step that flushes it to disk at
/// shutdown. The handle itself closes when the owning exporter is dropped.
fn open_sink(path: &str, shutdown: &mut TelemetryShutdown) -> Result<File, TelemetryError> {
    let sink = File::create(path).map_err(|source| TelemetryError::Sink {
        path: path.to_string(),
        source,
    })?;
    let handle = sink.try_clone().map_err(|source| TelemetryError::Sink {
        path: path.to_string(),
        source,
    })?;
    let path = path.to_string();
    shutdown.register(move || {
        handle
            .sync_all()
            .map_err(|source| TelemetryError::Sink { path, source })
    });
    Ok(sink)
}

fn init_trace_pipeline(
    path: &str,
    service_name: &str,
    resource: Resource,
    shutdown: &mut TelemetryShutdown,
) -> Result<trace::Tracer, TelemetryError> {
    let sink = open_sink(path, shutdown)?;
    let exporter = opentelemetry_stdout::SpanExporterBuilder::default()
        .with_writer(sink)
        .build();
    // Batched export on the tokio runtime; the SDK's default batch delay
    // is five seconds.
    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(trace::Config::default().with_resource(resource))
        .build();
    let tracer = provider.tracer(service_name.to_string());
    global::set_tracer_provider(provider);
    shutdown.register(|| {
        global::shutdown_tracer_provider();
        Ok(())
    });
    Ok(tracer)
}

fn init_metrics_pipeline(
    path: &str,
    resource: Resource,
    shutdown: &mut TelemetryShutdown,
) -> Result<(), TelemetryError> {
    let sink = open_sink(path, shutdown)?;
    let exporter = opentelemetry_stdout::MetricsExporterBuilder::default()
        .with_writer(sink)
        .build();
    let reader = PeriodicReader::builder(exporter, runtime::Tokio)
        .with_interval(METRICS_EXPORT_INTERVAL)
        .build();
    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build();
    global::set_meter_provider(provider.clone());
    shutdown.register(move || provider.shutdown().map_err(TelemetryError::from));
    Ok(())
}

/// Install the global subscriber: a fmt layer on stderr, optionally teed
/// into an append-mode log file, plus the OpenTelemetry bridge when trace
/// export is on.
pub fn init_logging(log_file: Option<File>, tracer: Option<trace::Tracer>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = match log_file {
        Some(file) => fmt::layer()
            .with_writer(io::stderr.and(Arc::new(file)))
            .boxed(),
        None => fmt::layer().with_writer(io::stderr).boxed(),
    };

    let otel_layer =
        tracer.map(|tracer| OpenTelemetryLayer::new(tracer).with_filter(LevelFilter::INFO));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();
}
