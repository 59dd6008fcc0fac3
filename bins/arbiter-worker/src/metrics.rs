//! Prometheus metrics for the worker

use arbiter_common::types::{ExecutionSummary, JobStatus};
use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tracing::{error, info};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Jobs finished, by final status
    pub static ref JOBS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("arbiter_worker_jobs_total", "Jobs processed by final status"),
        &["status"]
    )
    .expect("Failed to create counter");

    /// Test case outcomes, `passed` or the failure kind
    pub static ref CASE_OUTCOMES: IntCounterVec = IntCounterVec::new(
        Opts::new("arbiter_worker_case_outcomes_total", "Test case outcomes by kind"),
        &["outcome"]
    )
    .expect("Failed to create counter");

    pub static ref CASE_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "arbiter_worker_case_duration_seconds",
            "Measured run time of a single test case"
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0])
    )
    .expect("Failed to create histogram");

    pub static ref JOB_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "arbiter_worker_job_duration_seconds",
            "Wall-clock time from dequeue to stored outcome"
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0])
    )
    .expect("Failed to create histogram");

    pub static ref ACTIVE_JOBS: IntGauge =
        IntGauge::new("arbiter_worker_active_jobs", "Jobs currently executing")
            .expect("Failed to create gauge");
}

/// Register every metric with the worker registry
pub fn init_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(JOBS_TOTAL.clone()),
        Box::new(CASE_OUTCOMES.clone()),
        Box::new(CASE_DURATION.clone()),
        Box::new(JOB_DURATION.clone()),
        Box::new(ACTIVE_JOBS.clone()),
    ];
    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            error!(error = %e, "Failed to register metric");
        }
    }
}

pub fn status_label(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
    }
}

pub fn record_job(status: JobStatus, duration_secs: f64) {
    JOBS_TOTAL.with_label_values(&[status_label(status)]).inc();
    JOB_DURATION.observe(duration_secs);
}

pub fn record_cases(summary: &ExecutionSummary) {
    for result in &summary.results {
        let outcome = match result.failure {
            Some(kind) => kind.to_string(),
            None => "passed".to_string(),
        };
        CASE_OUTCOMES.with_label_values(&[outcome.as_str()]).inc();
        CASE_DURATION.observe(result.execution_time_ms as f64 / 1000.0);
    }
}

fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}

async fn metrics_handler() -> (StatusCode, String) {
    match render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// Serve `/metrics` and `/health` until the process exits
pub async fn serve(addr: String) -> anyhow::Result<()> {
    init_metrics();

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(|| async { "OK" }));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Metrics server listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
