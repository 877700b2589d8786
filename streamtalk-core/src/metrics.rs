// ABOUTME: Metric names and recording helpers used across the reply loop
// ABOUTME: The Prometheus recorder is optional; without it every call is a cheap no-op

use anyhow::{Context, Result};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

pub const BATCHES_TOTAL: &str = "streamtalk_batches_total";
pub const BATCH_SIZE: &str = "streamtalk_batch_size";
pub const LLM_CALLS_TOTAL: &str = "streamtalk_llm_calls_total";
pub const LLM_ERRORS_TOTAL: &str = "streamtalk_llm_errors_total";
pub const REPLIES_TOTAL: &str = "streamtalk_replies_total";
pub const SESSIONS_TOTAL: &str = "streamtalk_sessions_total";
pub const REPLY_DURATION_SECONDS: &str = "streamtalk_reply_duration_seconds";

/// Install the global Prometheus recorder and return a handle for rendering
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")
}

pub fn record_batch(size: usize) {
    counter!(BATCHES_TOTAL).increment(1);
    histogram!(BATCH_SIZE).record(size as f64);
}

pub fn record_llm_call(purpose: &'static str) {
    counter!(LLM_CALLS_TOTAL, "purpose" => purpose).increment(1);
}

pub fn record_llm_error(kind: &'static str) {
    counter!(LLM_ERRORS_TOTAL, "kind" => kind).increment(1);
}

pub fn record_reply() {
    counter!(REPLIES_TOTAL).increment(1);
}

/// Session lifecycle outcomes: started, revealed, expired, cancelled, failed
pub fn record_session(outcome: &'static str) {
    counter!(SESSIONS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_reply_duration(duration: Duration) {
    histogram!(REPLY_DURATION_SECONDS).record(duration.as_secs_f64());
}
