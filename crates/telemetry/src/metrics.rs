#![allow(clippy::expect_used)]

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Stream Session Metrics ====
    pub static ref STREAM_SESSIONS_ACTIVE: IntGauge = {
        let metric = IntGauge::new("stream_sessions_active", "Number of sessions with a running worker")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref STREAM_SOURCE_OPEN_ATTEMPTS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "stream_source_open_attempts_total",
                "Video source open attempts by source kind and outcome",
            ),
            &["source", "status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref STREAM_FRAMES_DELIVERED: IntCounter = {
        let metric = IntCounter::new("stream_frames_delivered_total", "Frames handed to a consumer")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref STREAM_FRAMES_DROPPED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("stream_frames_dropped_total", "Frames dropped before delivery"),
            &["reason"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Recognition Metrics ====
    pub static ref DETECTION_PASSES: IntCounter = {
        let metric = IntCounter::new("detection_passes_total", "Detection passes run on sampled frames")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref DETECTION_FAILURES: IntCounter = {
        let metric = IntCounter::new("detection_failures_total", "Detection passes that failed")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATES_REPORTED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("plates_reported_total", "Plates reported to clients"),
            &["format", "known"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref DUPLICATES_SUPPRESSED: IntCounter = {
        let metric = IntCounter::new("duplicate_plates_suppressed_total", "Plates dropped as recent duplicates")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref DETECTION_PASS_TIME: Histogram = {
        let metric = Histogram::with_opts(
            HistogramOpts::new(
                "detection_pass_seconds",
                "Time spent detecting and reading plates on one frame",
            )
            .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0]),
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Helper function to encode metrics for Prometheus scraping
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_metrics_accessible() {
        STREAM_SESSIONS_ACTIVE.set(2);
        assert_eq!(STREAM_SESSIONS_ACTIVE.get(), 2);
    }

    #[test]
    fn test_encode_contains_registered_metrics() {
        STREAM_FRAMES_DELIVERED.inc();
        PLATES_REPORTED.with_label_values(&["legacy", "false"]).inc();

        let text = encode_metrics().unwrap();
        assert!(text.contains("stream_frames_delivered_total"));
        assert!(text.contains("plates_reported_total"));
    }
}
