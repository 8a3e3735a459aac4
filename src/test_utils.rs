use crate::{
    config::AccountConfig,
    core::{MetricSink, PollOutcome, UsageFetcher, UsageSnapshot},
    fetcher::FetchError,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// Fake usage fetcher for testing.
///
/// Each account has a queue of scripted responses. Once the queue is empty
/// the fallback snapshot is returned, or a 503 if there is none.
#[derive(Default)]
pub struct FakeUsageFetcher {
    responses: Mutex<HashMap<String, VecDeque<Option<UsageSnapshot>>>>,
    fallback: Mutex<HashMap<String, UsageSnapshot>>,
    calls: Mutex<HashMap<String, Vec<Instant>>>,
}

impl FakeUsageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response for an account.
    pub fn push_snapshot(&self, account: &str, snapshot: UsageSnapshot) {
        self.responses
            .lock()
            .unwrap()
            .entry(account.to_string())
            .or_default()
            .push_back(Some(snapshot));
    }

    /// Queue a failed response for an account.
    pub fn push_failure(&self, account: &str) {
        self.responses
            .lock()
            .unwrap()
            .entry(account.to_string())
            .or_default()
            .push_back(None);
    }

    /// Returned whenever the account's queue is empty.
    pub fn set_fallback(&self, account: &str, snapshot: UsageSnapshot) {
        self.fallback
            .lock()
            .unwrap()
            .insert(account.to_string(), snapshot);
    }

    /// When each fetch for the account started, on the tokio clock.
    pub fn call_times(&self, account: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .get(account)
            .cloned()
            .unwrap_or_default()
    }

    pub fn call_count(&self, account: &str) -> usize {
        self.call_times(account).len()
    }
}

#[async_trait]
impl UsageFetcher for FakeUsageFetcher {
    async fn fetch(&self, account: &AccountConfig) -> Result<UsageSnapshot, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .entry(account.name.clone())
            .or_default()
            .push(Instant::now());

        let scripted = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&account.name)
            .and_then(VecDeque::pop_front);

        match scripted {
            Some(Some(snapshot)) => Ok(snapshot),
            Some(None) => Err(FetchError::Status(StatusCode::SERVICE_UNAVAILABLE)),
            None => self
                .fallback
                .lock()
                .unwrap()
                .get(&account.name)
                .cloned()
                .ok_or(FetchError::Status(StatusCode::SERVICE_UNAVAILABLE)),
        }
    }
}

/// A metric sink that remembers everything it was given.
#[derive(Default, Clone)]
pub struct RecordingSink {
    polls: Arc<Mutex<Vec<(String, PollOutcome)>>>,
    failures: Arc<Mutex<HashMap<String, u64>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn polls(&self, account: &str) -> Vec<PollOutcome> {
        self.polls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == account)
            .map(|(_, outcome)| outcome.clone())
            .collect()
    }

    pub fn failures(&self, account: &str) -> u64 {
        self.failures
            .lock()
            .unwrap()
            .get(account)
            .copied()
            .unwrap_or(0)
    }
}

impl MetricSink for RecordingSink {
    fn record_poll(&self, account: &str, outcome: &PollOutcome) {
        self.polls
            .lock()
            .unwrap()
            .push((account.to_string(), outcome.clone()));
    }

    fn record_failure(&self, account: &str) {
        *self
            .failures
            .lock()
            .unwrap()
            .entry(account.to_string())
            .or_insert(0) += 1;
    }
}
