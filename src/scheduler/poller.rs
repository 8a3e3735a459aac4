//! The poll loop for one account.

use super::{Phase, PollerConfig, PollerState};
use crate::config::AccountConfig;
use crate::core::{MetricSink, PollOutcome, UsageFetcher};
use crate::fetcher::FetchError;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

/// A read-only view of a poller, as served by the introspection endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollerStatus {
    pub account: String,
    pub interval_seconds: f64,
    pub phase: Phase,
    pub unchanged_streak: u32,
    pub session_utilization: f64,
    pub weekly_utilization: f64,
}

/// Polls one account forever, adapting its cadence to what it observes.
///
/// The state sits behind a lock so that readers such as the `/pollers`
/// endpoint can inspect it while the loop runs. The lock is never held across
/// a fetch or a sleep.
pub struct AccountPoller {
    account: AccountConfig,
    config: PollerConfig,
    state: Mutex<PollerState>,
    fetcher: Arc<dyn UsageFetcher>,
    sink: Arc<dyn MetricSink>,
}

impl AccountPoller {
    pub fn new(
        account: AccountConfig,
        config: PollerConfig,
        fetcher: Arc<dyn UsageFetcher>,
        sink: Arc<dyn MetricSink>,
    ) -> Self {
        let state = Mutex::new(PollerState::new(&config));
        Self {
            account,
            config,
            state,
            fetcher,
            sink,
        }
    }

    /// The account's display name, used as the metric label.
    pub fn name(&self) -> &str {
        &self.account.name
    }

    /// Returns a copy of the current state.
    pub async fn state(&self) -> PollerState {
        self.state.lock().await.clone()
    }

    pub async fn status(&self) -> PollerStatus {
        let state = self.state.lock().await;
        PollerStatus {
            account: self.account.name.clone(),
            interval_seconds: state.current_interval().as_secs_f64(),
            phase: state.phase(&self.config),
            unchanged_streak: state.unchanged_streak(),
            session_utilization: state.previous_session_utilization(),
            weekly_utilization: state.previous_weekly_utilization(),
        }
    }

    /// Performs one fetch and, if it succeeds, one interval decision.
    ///
    /// A failed fetch is logged and counted; the state is left untouched so
    /// the next poll happens at the unchanged interval.
    #[instrument(skip_all, fields(account = %self.account.name))]
    pub async fn poll_once(&self) -> Result<PollOutcome, FetchError> {
        let snapshot = match self.fetcher.fetch(&self.account).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Poll failed");
                self.sink.record_failure(&self.account.name);
                return Err(e);
            }
        };

        let outcome = {
            let mut state = self.state.lock().await;
            state.observe(&snapshot, Utc::now(), &self.config)
        };

        self.sink.record_poll(&self.account.name, &outcome);
        info!(
            "session={:.1}% weekly={:.1}% next={:?} phase={}",
            outcome.session_utilization.unwrap_or_default(),
            outcome.weekly_utilization.unwrap_or_default(),
            outcome.next_interval,
            outcome.phase
        );
        if outcome.burst_needed {
            debug!("Quota reset is imminent, staying at the active interval");
        }

        Ok(outcome)
    }

    /// Runs the poll, decide, sleep cycle until `shutdown_rx` fires.
    ///
    /// The first poll happens immediately.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(account = %self.account.name, "Poller started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                // Failures were already logged and counted.
                _ = self.poll_once() => {}
            }

            let interval = self.state.lock().await.current_interval();

            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!(account = %self.account.name, "Poller received shutdown signal, exiting.");
    }
}
