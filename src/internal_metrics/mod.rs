//! # Internal Metrics Module
//!
//! This module turns poll outcomes into Prometheus series.
//!
//! ## Components:
//!
//! - **`install_prometheus_recorder`**: installs the global `metrics`
//!   recorder and returns the handle used to render the exposition text.
//!
//! - **`Metrics`**: a cloneable [`MetricSink`] holding pre-registered gauge
//!   and counter handles for every configured account. Every series carries
//!   an `account` label.
//!
//! - **`MetricsServer`**: (Defined in `server.rs`) An `axum`-based web server
//!   exposing `/metrics`, `/healthz` and `/pollers`.
//!
//! - **`OtlpMetrics`**: (Defined in `otlp.rs`) An optional second sink that
//!   pushes the same series over OTLP when `OTEL_EXPORTER_OTLP_ENDPOINT` is
//!   set.
//!
//! - **`FanoutSink`**: forwards every observation to several sinks.

use crate::core::{MetricSink, PollOutcome};
use anyhow::{anyhow, Result};
use metrics::{Counter, Gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub mod otlp;
pub mod server;

pub use otlp::OtlpMetrics;
pub use server::MetricsServer;

// Exported names carry the unit and `_total` suffixes that the OpenTelemetry
// Prometheus exporter derives.
pub const SESSION_UTILIZATION: &str = "claude_usage_session_utilization_percent";
pub const WEEKLY_UTILIZATION: &str = "claude_usage_weekly_utilization_percent";
pub const SESSION_RESET: &str = "claude_usage_session_reset_seconds";
pub const WEEKLY_RESET: &str = "claude_usage_weekly_reset_seconds";
pub const POLL_LAST_SUCCESS: &str = "claude_usage_poll_last_success_seconds";
pub const POLL_INTERVAL: &str = "claude_usage_poll_interval_seconds";
pub const POLL_ERRORS: &str = "claude_usage_poll_errors_total";

/// Installs the Prometheus recorder as the process-wide `metrics` recorder.
///
/// Fails if another recorder is already installed.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle> {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|_| anyhow!("Failed to install Prometheus recorder: a recorder is already set"))?;
    Ok(handle)
}

fn describe() {
    metrics::describe_gauge!(SESSION_UTILIZATION, Unit::Percent, "Claude.ai 5-hour session window utilization (0-100).");
    metrics::describe_gauge!(WEEKLY_UTILIZATION, Unit::Percent, "Claude.ai 7-day weekly utilization (0-100).");
    metrics::describe_gauge!(SESSION_RESET, Unit::Seconds, "Unix timestamp when the 5-hour session window resets.");
    metrics::describe_gauge!(WEEKLY_RESET, Unit::Seconds, "Unix timestamp when the 7-day weekly limit resets.");
    metrics::describe_gauge!(POLL_LAST_SUCCESS, Unit::Seconds, "Unix timestamp of the last successful poll.");
    metrics::describe_gauge!(POLL_INTERVAL, Unit::Seconds, "Current adaptive poll interval in seconds.");
    metrics::describe_counter!(POLL_ERRORS, Unit::Count, "Total number of failed polls per account.");
}

/// The metric sink backed by the global `metrics` recorder.
///
/// Gauges are registered on first write, so a window the API never reported
/// is absent from the exposition rather than exported as 0. The error
/// counter is registered up front for every configured account.
#[derive(Clone)]
pub struct Metrics {
    poll_errors: Arc<HashMap<String, Counter>>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("accounts", &self.poll_errors.len())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new<'a>(accounts: impl IntoIterator<Item = &'a str>) -> Self {
        describe();
        let poll_errors = accounts
            .into_iter()
            .map(|name| {
                let counter = error_counter(name);
                counter.increment(0);
                (name.to_string(), counter)
            })
            .collect();
        Self {
            poll_errors: Arc::new(poll_errors),
        }
    }
}

fn error_counter(account: &str) -> Counter {
    metrics::counter!(POLL_ERRORS, "account" => account.to_string())
}

fn account_gauge(name: &'static str, account: &str) -> Gauge {
    metrics::gauge!(name, "account" => account.to_string())
}

impl MetricSink for Metrics {
    fn record_poll(&self, account: &str, outcome: &PollOutcome) {
        if let Some(value) = outcome.session_utilization {
            account_gauge(SESSION_UTILIZATION, account).set(value);
        }
        if let Some(value) = outcome.weekly_utilization {
            account_gauge(WEEKLY_UTILIZATION, account).set(value);
        }
        if let Some(reset) = outcome.session_reset {
            account_gauge(SESSION_RESET, account).set(reset.timestamp() as f64);
        }
        if let Some(reset) = outcome.weekly_reset {
            account_gauge(WEEKLY_RESET, account).set(reset.timestamp() as f64);
        }
        account_gauge(POLL_LAST_SUCCESS, account).set(outcome.polled_at.timestamp() as f64);
        account_gauge(POLL_INTERVAL, account).set(outcome.next_interval.as_secs_f64());
    }

    fn record_failure(&self, account: &str) {
        match self.poll_errors.get(account) {
            Some(counter) => counter.increment(1),
            None => {
                debug!(account, "Failure for an account registered after start-up");
                error_counter(account).increment(1);
            }
        }
    }
}

/// Forwards every observation to each wrapped sink, in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn MetricSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn MetricSink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl MetricSink for FanoutSink {
    fn record_poll(&self, account: &str, outcome: &PollOutcome) {
        for sink in &self.sinks {
            sink.record_poll(account, outcome);
        }
    }

    fn record_failure(&self, account: &str) {
        for sink in &self.sinks {
            sink.record_failure(account);
        }
    }
}
