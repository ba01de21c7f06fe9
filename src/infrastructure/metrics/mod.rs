//! Prometheus Metrics Module
//!
//! Application-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - Active realtime connection gauge
//! - Messages created counter
//! - Rejected realtime events by error code
//! - Inbox fan-out width histogram

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Active realtime connections gauge
pub static CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("connections_active", "Number of active realtime connections")
            .namespace("convoy"),
    )
    .expect("Failed to create CONNECTIONS_ACTIVE metric")
});

/// Total messages committed through the pipeline
pub static MESSAGES_CREATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("messages_created_total", "Total messages committed").namespace("convoy"),
    )
    .expect("Failed to create MESSAGES_CREATED_TOTAL metric")
});

/// Rejected realtime events by envelope error code
pub static EVENTS_REJECTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("events_rejected_total", "Realtime events rejected, by error code")
            .namespace("convoy"),
        &["code"],
    )
    .expect("Failed to create EVENTS_REJECTED_TOTAL metric")
});

/// Inbox fan-out width per committed message
pub static FANOUT_RECIPIENTS: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("fanout_recipients", "Inbox recipients per committed message")
            .namespace("convoy")
            .buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0]),
    )
    .expect("Failed to create FANOUT_RECIPIENTS metric")
});

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(CONNECTIONS_ACTIVE.clone()))
        .expect("Failed to register CONNECTIONS_ACTIVE");
    registry
        .register(Box::new(MESSAGES_CREATED_TOTAL.clone()))
        .expect("Failed to register MESSAGES_CREATED_TOTAL");
    registry
        .register(Box::new(EVENTS_REJECTED_TOTAL.clone()))
        .expect("Failed to register EVENTS_REJECTED_TOTAL");
    registry
        .register(Box::new(FANOUT_RECIPIENTS.clone()))
        .expect("Failed to register FANOUT_RECIPIENTS");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Metrics should be valid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_includes_registered_metrics() {
        MESSAGES_CREATED_TOTAL.inc();
        EVENTS_REJECTED_TOTAL.with_label_values(&["FORBIDDEN"]).inc();
        let output = gather_metrics();
        assert!(output.contains("convoy_messages_created_total"));
        assert!(output.contains("convoy_events_rejected_total"));
    }
}
