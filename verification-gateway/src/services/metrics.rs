use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

pub struct GatewayMetrics {
    registry: Registry,
    access_decisions: IntCounterVec,
    scan_outcomes: IntCounterVec,
    handles_released: IntCounter,
}

static METRICS: OnceLock<GatewayMetrics> = OnceLock::new();

fn build() -> GatewayMetrics {
    let registry = Registry::new();

    let access_decisions = IntCounterVec::new(
        Opts::new("access_decisions_total", "Access guard decisions by outcome"),
        &["decision"],
    )
    .expect("metric can be created");

    let scan_outcomes = IntCounterVec::new(
        Opts::new("scan_outcomes_total", "Scanner outcomes by kind"),
        &["outcome"],
    )
    .expect("metric can be created");

    let handles_released = IntCounter::new(
        "camera_handles_released_total",
        "Camera capture handles released",
    )
    .expect("metric can be created");

    registry
        .register(Box::new(access_decisions.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(scan_outcomes.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(handles_released.clone()))
        .expect("collector can be registered");

    GatewayMetrics {
        registry,
        access_decisions,
        scan_outcomes,
        handles_released,
    }
}

fn metrics() -> &'static GatewayMetrics {
    METRICS.get_or_init(build)
}

pub fn init_metrics() {
    metrics();
}

pub fn record_access_decision(decision: &str) {
    metrics()
        .access_decisions
        .with_label_values(&[decision])
        .inc();
}

pub fn record_scan_outcome(outcome: &str) {
    metrics().scan_outcomes.with_label_values(&[outcome]).inc();
}

pub fn record_handle_released() {
    metrics().handles_released.inc();
}

pub fn get_metrics() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = metrics().registry.gather();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
