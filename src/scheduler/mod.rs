//! Adaptive per-account polling.
//!
//! Each configured account gets an [`AccountPoller`] that owns a
//! [`PollerState`]. After every successful fetch the state decides how long
//! to wait before the next one: fast while utilization is moving or a quota
//! reset is imminent, doubling towards the idle ceiling while nothing changes.
pub mod poller;
pub mod state;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use poller::{AccountPoller, PollerStatus};
pub use state::PollerState;

/// Tuning for the adaptive interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Fastest cadence, used whenever something changed.
    pub active_interval: Duration,
    /// Slowest cadence; the interval never grows past this.
    pub idle_interval: Duration,
    /// Consecutive unchanged polls before the interval starts doubling.
    pub idle_threshold: u32,
    /// How far ahead of a quota reset polling is forced back to active.
    pub reset_burst_window: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            active_interval: Duration::from_secs(30),
            idle_interval: Duration::from_secs(300),
            idle_threshold: 3,
            reset_burst_window: Duration::from_secs(120),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollerConfigError {
    #[error("active interval must be greater than zero")]
    ZeroActiveInterval,

    #[error("idle interval ({idle:?}) must not be shorter than the active interval ({active:?})")]
    IdleBelowActive { active: Duration, idle: Duration },

    #[error("idle threshold must be at least 1")]
    ZeroIdleThreshold,
}

impl PollerConfig {
    /// Rejects settings that would break the `[active, idle]` bound.
    pub fn validate(&self) -> Result<(), PollerConfigError> {
        if self.active_interval.is_zero() {
            return Err(PollerConfigError::ZeroActiveInterval);
        }
        if self.idle_interval < self.active_interval {
            return Err(PollerConfigError::IdleBelowActive {
                active: self.active_interval,
                idle: self.idle_interval,
            });
        }
        if self.idle_threshold == 0 {
            return Err(PollerConfigError::ZeroIdleThreshold);
        }
        Ok(())
    }
}

/// Where a poller sits between its fastest and slowest cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Active,
    BackingOff,
    Idle,
}

impl Phase {
    /// Derives the phase from an interval.
    pub fn of(interval: Duration, config: &PollerConfig) -> Self {
        if interval <= config.active_interval {
            Phase::Active
        } else if interval >= config.idle_interval {
            Phase::Idle
        } else {
            Phase::BackingOff
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Active => "active",
            Phase::BackingOff => "backing-off",
            Phase::Idle => "idle",
        };
        f.write_str(name)
    }
}
