//! Service counters and the Prometheus exposition endpoint.
//!
//! Timing histograms are opt-in: observing them on the hot path costs
//! enough that the collection is off unless the operator asks for it. The
//! counters are always live.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{
    exponential_buckets, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use tracing::{error, info};

/// Every metric the service exposes.
pub struct Telemetry {
    registry: Registry,

    namespace_count: IntCounter,
    processed_msg: IntCounter,
    filtered_msg: IntCounterVec,
    monitors_ticks_generated: IntCounterVec,
    monitors_sent: IntCounterVec,

    processing_time: Option<Histogram>,
    filter_time: Option<Histogram>,
    push_time: Option<Histogram>,
}

impl Telemetry {
    /// Build and register the metric set. `collect_timing` turns the
    /// microsecond histograms on.
    pub fn new(collect_timing: bool) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let namespace_count = IntCounter::new(
            "namespace_count",
            "The total number of namespaces",
        )?;
        registry.register(Box::new(namespace_count.clone()))?;

        let processed_msg = IntCounter::new(
            "pulsar_processed_msg",
            "The total number of processed messages from pulsar.",
        )?;
        registry.register(Box::new(processed_msg.clone()))?;

        let filtered_msg = IntCounterVec::new(
            Opts::new(
                "filtered_messages",
                "The number of metrics generated per namespace",
            ),
            &["namespace"],
        )?;
        registry.register(Box::new(filtered_msg.clone()))?;

        let monitors_ticks_generated = IntCounterVec::new(
            Opts::new(
                "monitors_ticks_generated",
                "The number monitors requested to run",
            ),
            &["namespace"],
        )?;
        registry.register(Box::new(monitors_ticks_generated.clone()))?;

        let monitors_sent = IntCounterVec::new(
            Opts::new(
                "monitors_sent",
                "The number of monitors run and sent to pulsar",
            ),
            &["namespace", "pulsar_event"],
        )?;
        registry.register(Box::new(monitors_sent.clone()))?;

        let timing = |name: &str, help: &str| -> Result<Option<Histogram>, prometheus::Error> {
            if !collect_timing {
                return Ok(None);
            }
            let histogram = Histogram::with_opts(
                HistogramOpts::new(name, help).buckets(exponential_buckets(1.0, 2.5, 15)?),
            )?;
            registry.register(Box::new(histogram.clone()))?;
            Ok(Some(histogram))
        };

        let processing_time = timing(
            "pulsar_processed_msg_time",
            "The time to process a message from pulsar (µs)",
        )?;
        let filter_time = timing(
            "filter_time",
            "The time to apply all filters to a message (µs)",
        )?;
        let push_time = timing(
            "push_time",
            "The time to push a filtered message per namespace (µs)",
        )?;

        Ok(Self {
            registry,
            namespace_count,
            processed_msg,
            filtered_msg,
            monitors_ticks_generated,
            monitors_sent,
            processing_time,
            filter_time,
            push_time,
        })
    }

    pub fn set_namespace_count(&self, n: usize) {
        self.namespace_count.inc_by(n as u64);
    }

    pub fn inc_processed_msg(&self) {
        self.processed_msg.inc();
    }

    pub fn inc_filtered_msg(&self, namespace: &str) {
        self.filtered_msg.with_label_values(&[namespace]).inc();
    }

    pub fn inc_monitors_ticks(&self, namespace: &str) {
        self.monitors_ticks_generated
            .with_label_values(&[namespace])
            .inc();
    }

    pub fn inc_monitors_sent(&self, namespace: &str, pulsar_event: &str) {
        self.monitors_sent
            .with_label_values(&[namespace, pulsar_event])
            .inc();
    }

    pub fn observe_processing_time(&self, elapsed: Duration) {
        if let Some(histogram) = &self.processing_time {
            histogram.observe(elapsed.as_micros() as f64);
        }
    }

    pub fn observe_filter_time(&self, elapsed: Duration) {
        if let Some(histogram) = &self.filter_time {
            histogram.observe(elapsed.as_micros() as f64);
        }
    }

    pub fn observe_push_time(&self, elapsed: Duration) {
        if let Some(histogram) = &self.push_time {
            histogram.observe(elapsed.as_micros() as f64);
        }
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }
}

/// Serve `GET /metrics` in Prometheus text format. Runs until the listener
/// fails; a port of 0 should be handled by the caller (don't serve).
pub async fn serve(registry: Registry, port: u16) {
    let app = Router::new()
        .route("/metrics", get(render))
        .with_state(registry);

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("metrics listener bind on port {port}: {e}");
            return;
        }
    };
    info!("metrics exposed at: localhost:{port}/metrics");

    if let Err(e) = axum::serve(listener, app).await {
        error!("metrics server: {e}");
    }
}

async fn render(State(registry): State<Registry>) -> (StatusCode, String) {
    let mut buf = String::new();
    let encoder = TextEncoder::new();
    match encoder.encode_utf8(&registry.gather(), &mut buf) {
        Ok(()) => (StatusCode::OK, buf),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
