//! Core domain types and service traits for the usage exporter
//!
//! This module defines the usage data returned by the upstream API and the
//! trait contracts that decouple the polling scheduler from the network and
//! from the metrics backend.

use crate::config::AccountConfig;
use crate::fetcher::FetchError;
use crate::scheduler::Phase;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Lower and upper bounds of a utilization percentage.
pub const MIN_UTILIZATION: f64 = 0.0;
pub const MAX_UTILIZATION: f64 = 100.0;

/// Clamps a raw utilization reading into `[0, 100]`.
///
/// NaN is treated as "nothing used" and maps to 0.
pub fn clamp_utilization(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_UTILIZATION;
    }
    value.clamp(MIN_UTILIZATION, MAX_UTILIZATION)
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or_default())
}

/// One quota window as reported by the usage endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UsageWindow {
    /// Percentage of the window's quota consumed. Not clamped on decode.
    #[serde(default, deserialize_with = "null_as_zero")]
    pub utilization: f64,
    /// RFC 3339 instant at which the window resets, exactly as received.
    #[serde(default)]
    pub resets_at: Option<String>,
}

impl UsageWindow {
    pub fn new(utilization: f64, resets_at: Option<&str>) -> Self {
        Self {
            utilization,
            resets_at: resets_at.map(str::to_string),
        }
    }

    /// The utilization clamped into `[0, 100]`.
    pub fn clamped_utilization(&self) -> f64 {
        clamp_utilization(self.utilization)
    }

    /// Parses the reset timestamp.
    ///
    /// # Returns
    /// * `Ok(Some(instant))` when a timestamp is present and valid
    /// * `Ok(None)` when the upstream omitted it
    /// * `Err` when a timestamp is present but is not RFC 3339
    pub fn reset_instant(&self) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
        match self.resets_at.as_deref() {
            None => Ok(None),
            Some(raw) => DateTime::parse_from_rfc3339(raw).map(|t| Some(t.with_timezone(&Utc))),
        }
    }
}

/// The result of one successful fetch.
///
/// Either window may be missing when the upstream omits it or sends `null`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UsageSnapshot {
    /// The short-horizon (five hour) window.
    #[serde(rename = "five_hour", default)]
    pub session: Option<UsageWindow>,
    /// The long-horizon (seven day) window.
    #[serde(rename = "seven_day", default)]
    pub weekly: Option<UsageWindow>,
}

impl UsageSnapshot {
    pub fn new(session: Option<UsageWindow>, weekly: Option<UsageWindow>) -> Self {
        Self { session, weekly }
    }
}

/// Everything the scheduler learned from one successful poll.
///
/// Utilization fields are `None` when the corresponding window was absent
/// from the snapshot; reset fields are `None` when absent or unparsable.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub polled_at: DateTime<Utc>,
    pub session_utilization: Option<f64>,
    pub weekly_utilization: Option<f64>,
    pub session_reset: Option<DateTime<Utc>>,
    pub weekly_reset: Option<DateTime<Utc>>,
    /// Utilization differed from the previous poll.
    pub changed: bool,
    /// A window resets within the burst window.
    pub burst_needed: bool,
    /// The interval to wait before the next poll.
    pub next_interval: Duration,
    /// Where `next_interval` sits between the active and idle cadences.
    pub phase: Phase,
}

// =============================================================================
// Service Traits
// =============================================================================

/// Retrieves a usage snapshot for one account.
///
/// Implementations must bound each call with a timeout and must not retry;
/// the scheduler's next poll is the retry.
#[async_trait]
pub trait UsageFetcher: Send + Sync {
    async fn fetch(&self, account: &AccountConfig) -> Result<UsageSnapshot, FetchError>;
}

/// Receives per-account observations from the scheduler.
pub trait MetricSink: Send + Sync {
    /// Records the values observed by a successful poll.
    fn record_poll(&self, account: &str, outcome: &PollOutcome);

    /// Counts one failed poll.
    fn record_failure(&self, account: &str);
}
