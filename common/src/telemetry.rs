// Telemetry module for structured logging, metrics, and tracing

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "outcall-scheduler";

/// Initialize structured logging with JSON formatting and trace context
///
/// This function sets up the tracing subscriber with:
/// - JSON formatting for structured logs
/// - Trace context (trace_id, span_id) in all log entries
/// - Log levels from configuration or environment
/// - Optional OpenTelemetry integration
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    // Create environment filter from log level
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    // Create JSON formatting layer with trace context
    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    // Initialize the subscriber with optional OpenTelemetry layer
    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized with JSON formatting"
    );

    Ok(())
}

/// Initialize OpenTelemetry tracer with OTLP exporter
#[tracing::instrument(skip_all)]
fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());

    let tracer = tracer_provider.tracer(SERVICE_NAME);

    tracing::info!(
        endpoint = endpoint,
        "OpenTelemetry tracer initialized with OTLP exporter"
    );

    Ok(tracer)
}

/// Shutdown OpenTelemetry tracer provider
///
/// This should be called on graceful shutdown to flush remaining spans
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Initialize Prometheus metrics exporter
///
/// Registers the scheduler's metric families:
/// - scheduler_wakes_total: Counter for timer wakes
/// - scheduler_drains_total: Counter for completed drain cycles
/// - scheduler_drain_failures_total: Counter for failed drain cycles
/// - scheduler_jobs_processed_total: Counter for jobs claimed by drains
/// - scheduler_drain_duration_seconds: Histogram of drain cycle duration
/// - scheduler_registry_size: Gauge of registered campaign windows
/// - calls_dispatched_total / calls_dispatch_failed_total: dispatch outcomes
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!("scheduler_wakes_total", "Total number of timer wakes");
    describe_counter!(
        "scheduler_drains_total",
        "Total number of completed drain cycles"
    );
    describe_counter!(
        "scheduler_drain_failures_total",
        "Total number of failed drain cycles"
    );
    describe_counter!(
        "scheduler_jobs_processed_total",
        "Total number of call jobs claimed by drain cycles"
    );
    describe_histogram!(
        "scheduler_drain_duration_seconds",
        "Duration of drain cycles in seconds"
    );
    describe_gauge!(
        "scheduler_registry_size",
        "Number of campaign windows currently registered"
    );
    describe_counter!(
        "calls_dispatched_total",
        "Total number of calls accepted by the voice gateway"
    );
    describe_counter!(
        "calls_dispatch_failed_total",
        "Total number of calls the voice gateway rejected or that failed to send"
    );

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

/// Record a timer wake
#[inline]
pub fn record_wake() {
    counter!("scheduler_wakes_total").increment(1);
}

/// Record a completed drain cycle
#[inline]
pub fn record_drain(jobs_processed: u64, duration: Duration) {
    counter!("scheduler_drains_total").increment(1);
    counter!("scheduler_jobs_processed_total").increment(jobs_processed);
    histogram!("scheduler_drain_duration_seconds").record(duration.as_secs_f64());
}

/// Record a failed drain cycle
#[inline]
pub fn record_drain_failure() {
    counter!("scheduler_drain_failures_total").increment(1);
}

/// Update the registered window count gauge
#[inline]
pub fn record_registry_size(size: usize) {
    gauge!("scheduler_registry_size").set(size as f64);
}

/// Record the outcome of a single call dispatch
#[inline]
pub fn record_call_dispatched(success: bool) {
    if success {
        counter!("calls_dispatched_total").increment(1);
    } else {
        counter!("calls_dispatch_failed_total").increment(1);
    }
}
