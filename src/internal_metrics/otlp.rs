//! OTLP push export of the per-account usage metrics.
//!
//! Enabled only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set; the exporter reads
//! the endpoint and the other standard `OTEL_*` variables itself. Runs next
//! to the Prometheus pull endpoint, never instead of it.

use crate::core::{MetricSink, PollOutcome};
use anyhow::{Context, Result};
use opentelemetry::{
    metrics::{Counter, Gauge, MeterProvider as _},
    KeyValue,
};
use opentelemetry_otlp::{MetricExporter, WithExportConfig as _};
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    runtime,
};
use tracing::{info, warn};

pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

const METER_NAME: &str = "claude-usage-exporter";

/// The configured OTLP endpoint, if any. An empty value counts as unset.
pub fn endpoint_from_env() -> Option<String> {
    std::env::var(OTLP_ENDPOINT_ENV)
        .ok()
        .filter(|endpoint| !endpoint.trim().is_empty())
}

/// A [`MetricSink`] that records into an OpenTelemetry meter pushed over
/// OTLP/gRPC on a periodic reader.
pub struct OtlpMetrics {
    provider: SdkMeterProvider,
    session_utilization: Gauge<f64>,
    weekly_utilization: Gauge<f64>,
    session_reset: Gauge<f64>,
    weekly_reset: Gauge<f64>,
    last_success: Gauge<f64>,
    poll_interval: Gauge<f64>,
    poll_errors: Counter<u64>,
}

impl std::fmt::Debug for OtlpMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtlpMetrics").finish_non_exhaustive()
    }
}

impl OtlpMetrics {
    /// Builds the exporter when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_env() -> Result<Option<Self>> {
        match endpoint_from_env() {
            Some(endpoint) => {
                let metrics = Self::connect(&endpoint)?;
                info!("OTLP exporter enabled: {}", endpoint);
                Ok(Some(metrics))
            }
            None => Ok(None),
        }
    }

    /// Builds an exporter for `endpoint`. The gRPC channel connects lazily.
    pub fn connect(endpoint: &str) -> Result<Self> {
        let exporter = MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .context("Failed to build OTLP metric exporter")?;
        let reader = PeriodicReader::builder(exporter, runtime::Tokio).build();
        let provider = SdkMeterProvider::builder().with_reader(reader).build();
        Ok(Self::with_provider(provider))
    }

    fn with_provider(provider: SdkMeterProvider) -> Self {
        let meter = provider.meter(METER_NAME);
        let gauge = |name: &'static str, unit: &'static str, description: &'static str| {
            meter
                .f64_gauge(name)
                .with_unit(unit)
                .with_description(description)
                .build()
        };

        Self {
            session_utilization: gauge(
                "claude.usage.session.utilization",
                "%",
                "Claude.ai 5-hour session window utilization (0-100)",
            ),
            weekly_utilization: gauge(
                "claude.usage.weekly.utilization",
                "%",
                "Claude.ai 7-day weekly utilization (0-100)",
            ),
            session_reset: gauge(
                "claude.usage.session.reset",
                "s",
                "Unix timestamp when the 5-hour session window resets",
            ),
            weekly_reset: gauge(
                "claude.usage.weekly.reset",
                "s",
                "Unix timestamp when the 7-day weekly limit resets",
            ),
            last_success: gauge(
                "claude.usage.poll.last_success",
                "s",
                "Unix timestamp of the last successful poll",
            ),
            poll_interval: gauge(
                "claude.usage.poll.interval",
                "s",
                "Current adaptive poll interval in seconds",
            ),
            poll_errors: meter
                .u64_counter("claude.usage.poll.errors")
                .with_description("Total number of failed polls per account")
                .build(),
            provider,
        }
    }

    /// Flushes pending data points and stops the periodic reader.
    ///
    /// Blocks until the final export finishes; call it off the async
    /// executor.
    pub fn shutdown(&self) {
        if let Err(e) = self.provider.shutdown() {
            warn!("OTLP exporter shutdown failed: {}", e);
        }
    }
}

fn account_attrs(account: &str) -> [KeyValue; 1] {
    [KeyValue::new("account", account.to_string())]
}

impl MetricSink for OtlpMetrics {
    fn record_poll(&self, account: &str, outcome: &PollOutcome) {
        let attrs = account_attrs(account);
        if let Some(value) = outcome.session_utilization {
            self.session_utilization.record(value, &attrs);
        }
        if let Some(value) = outcome.weekly_utilization {
            self.weekly_utilization.record(value, &attrs);
        }
        if let Some(reset) = outcome.session_reset {
            self.session_reset.record(reset.timestamp() as f64, &attrs);
        }
        if let Some(reset) = outcome.weekly_reset {
            self.weekly_reset.record(reset.timestamp() as f64, &attrs);
        }
        self.last_success
            .record(outcome.polled_at.timestamp() as f64, &attrs);
        self.poll_interval
            .record(outcome.next_interval.as_secs_f64(), &attrs);
    }

    fn record_failure(&self, account: &str) {
        self.poll_errors.add(1, &account_attrs(account));
    }
}
