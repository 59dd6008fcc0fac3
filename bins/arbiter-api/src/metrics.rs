//! Prometheus metrics for the API

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Jobs accepted onto the queue, by language
    pub static ref JOBS_SUBMITTED: IntCounterVec = IntCounterVec::new(
        Opts::new("arbiter_api_jobs_submitted_total", "Jobs queued by language"),
        &["language"]
    )
    .expect("Failed to create counter");

    /// Submissions refused before queueing, by error code
    pub static ref JOBS_REJECTED: IntCounterVec = IntCounterVec::new(
        Opts::new("arbiter_api_jobs_rejected_total", "Submissions rejected by error code"),
        &["code"]
    )
    .expect("Failed to create counter");
}

/// Register every metric with the API registry
pub fn init_metrics() {
    for collector in [JOBS_SUBMITTED.clone(), JOBS_REJECTED.clone()] {
        if let Err(e) = REGISTRY.register(Box::new(collector)) {
            error!(error = %e, "Failed to register metric");
        }
    }
}

pub fn record_rejection(code: &str) {
    JOBS_REJECTED.with_label_values(&[code]).inc();
}

pub fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}
