//! Prometheus metrics for the ferry server.
//!
//! Counters and histograms cover chunk receipt, commits, abandons and
//! request errors. Labels never carry upload or object names.
//!
//! The `/metrics` endpoint is unauthenticated. Restrict it to the scraper at
//! the network level or disable it with `server.metrics_enabled = false`.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Chunk metrics
pub static CHUNKS_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ferry_chunks_received_total",
        "Total number of chunks staged and recorded",
    )
    .expect("metric creation failed")
});

pub static CHUNKS_DUPLICATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ferry_chunks_duplicated_total",
        "Total number of idempotent chunk resends",
    )
    .expect("metric creation failed")
});

pub static BYTES_STAGED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("ferry_bytes_staged_total", "Total payload bytes staged")
        .expect("metric creation failed")
});

// Commit metrics
pub static COMMITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ferry_commits_total",
        "Total number of uploads committed into objects",
    )
    .expect("metric creation failed")
});

pub static COMMIT_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("ferry_commit_failures_total", "Total failed commits by kind"),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static COMMITS_IN_FLIGHT: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "ferry_commits_in_flight",
        "Commits currently holding a lease on this node",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_ABANDONED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ferry_uploads_abandoned_total",
        "Total number of uploads abandoned by request or janitor",
    )
    .expect("metric creation failed")
});

// Timing metrics
pub static CHUNK_RECEIVE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "ferry_chunk_receive_duration_seconds",
            "Time taken to stage and record a single chunk",
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .expect("metric creation failed")
});

pub static COMMIT_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "ferry_commit_duration_seconds",
            "Time taken to assemble and commit an upload",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
    )
    .expect("metric creation failed")
});

// Error metrics
pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("ferry_upload_errors_total", "Total upload errors by code"),
        &["code"],
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(CHUNKS_RECEIVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNKS_DUPLICATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_STAGED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(COMMITS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(COMMIT_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(COMMITS_IN_FLIGHT.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_ABANDONED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNK_RECEIVE_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(COMMIT_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_ERRORS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record an error response by its API code.
pub fn record_upload_error(code: &str) {
    UPLOAD_ERRORS.with_label_values(&[code]).inc();
}

/// Record a failed commit by failure kind.
pub fn record_commit_failure(kind: &str) {
    COMMIT_FAILURES.with_label_values(&[kind]).inc();
}
