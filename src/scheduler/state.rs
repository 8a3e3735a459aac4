//! The interval decision for a single account.

use super::{Phase, PollerConfig};
use crate::core::{PollOutcome, UsageSnapshot, UsageWindow};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

/// Per-account memory of the previous poll and the current cadence.
///
/// Only successful polls mutate it; a failed fetch leaves it exactly as it
/// was.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerState {
    current_interval: Duration,
    previous_session_utilization: f64,
    previous_weekly_utilization: f64,
    unchanged_streak: u32,
}

/// What one window contributed to a poll.
struct WindowReading {
    utilization: Option<f64>,
    reset: Option<DateTime<Utc>>,
    burst_needed: bool,
}

impl WindowReading {
    fn read(
        name: &'static str,
        window: Option<&UsageWindow>,
        now: DateTime<Utc>,
        burst_window: Duration,
    ) -> Self {
        let Some(window) = window else {
            return Self {
                utilization: None,
                reset: None,
                burst_needed: false,
            };
        };

        let reset = match window.reset_instant() {
            Ok(reset) => reset,
            Err(e) => {
                debug!(
                    window = name,
                    resets_at = window.resets_at.as_deref().unwrap_or_default(),
                    error = %e,
                    "Ignoring unparsable reset timestamp"
                );
                None
            }
        };

        Self {
            utilization: Some(window.clamped_utilization()),
            reset,
            burst_needed: reset.is_some_and(|r| resets_within(r, now, burst_window)),
        }
    }
}

/// `true` when `reset` is strictly in the future and strictly closer than
/// `window`.
fn resets_within(reset: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    match (reset - now).to_std() {
        Ok(remaining) => !remaining.is_zero() && remaining < window,
        // Negative: the reset is already in the past.
        Err(_) => false,
    }
}

impl PollerState {
    /// Creates the state for a freshly started poller: active cadence, no
    /// history.
    pub fn new(config: &PollerConfig) -> Self {
        Self {
            current_interval: config.active_interval,
            previous_session_utilization: 0.0,
            previous_weekly_utilization: 0.0,
            unchanged_streak: 0,
        }
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn previous_session_utilization(&self) -> f64 {
        self.previous_session_utilization
    }

    pub fn previous_weekly_utilization(&self) -> f64 {
        self.previous_weekly_utilization
    }

    pub fn unchanged_streak(&self) -> u32 {
        self.unchanged_streak
    }

    pub fn phase(&self, config: &PollerConfig) -> Phase {
        Phase::of(self.current_interval, config)
    }

    /// Folds a successful snapshot into the state and picks the next
    /// interval.
    ///
    /// An absent window counts as 0% for change detection.
    pub fn observe(
        &mut self,
        snapshot: &UsageSnapshot,
        now: DateTime<Utc>,
        config: &PollerConfig,
    ) -> PollOutcome {
        let session = WindowReading::read(
            "session",
            snapshot.session.as_ref(),
            now,
            config.reset_burst_window,
        );
        let weekly = WindowReading::read(
            "weekly",
            snapshot.weekly.as_ref(),
            now,
            config.reset_burst_window,
        );

        let session_util = session.utilization.unwrap_or_default();
        let weekly_util = weekly.utilization.unwrap_or_default();

        let changed = session_util != self.previous_session_utilization
            || weekly_util != self.previous_weekly_utilization;
        let burst_needed = session.burst_needed || weekly.burst_needed;

        if changed || burst_needed {
            self.unchanged_streak = 0;
            self.current_interval = config.active_interval;
        } else {
            self.unchanged_streak = self.unchanged_streak.saturating_add(1);
            if self.unchanged_streak >= config.idle_threshold {
                self.current_interval = self
                    .current_interval
                    .saturating_mul(2)
                    .min(config.idle_interval);
            }
        }

        self.previous_session_utilization = session_util;
        self.previous_weekly_utilization = weekly_util;

        PollOutcome {
            polled_at: now,
            session_utilization: session.utilization,
            weekly_utilization: weekly.utilization,
            session_reset: session.reset,
            weekly_reset: weekly.reset,
            changed,
            burst_needed,
            next_interval: self.current_interval,
            phase: self.phase(config),
        }
    }
}
