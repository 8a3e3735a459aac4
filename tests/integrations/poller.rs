//! Integration tests for the per-account poll loop.

#[path = "../helpers/mod.rs"]
mod helpers;

use chrono::Utc;
use claude_usage_exporter::{
    core::{UsageSnapshot, UsageWindow},
    scheduler::{AccountPoller, Phase, PollerConfig},
    test_utils::{FakeUsageFetcher, RecordingSink},
};
use helpers::{account, snapshot};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;

fn poller(fetcher: &Arc<FakeUsageFetcher>, sink: &RecordingSink, name: &str) -> Arc<AccountPoller> {
    Arc::new(AccountPoller::new(
        account(name),
        PollerConfig::default(),
        fetcher.clone(),
        Arc::new(sink.clone()),
    ))
}

#[tokio::test]
async fn test_fetch_failure_leaves_state_untouched() {
    let fetcher = Arc::new(FakeUsageFetcher::new());
    let sink = RecordingSink::new();
    let poller = poller(&fetcher, &sink, "personal");

    for _ in 0..5 {
        fetcher.push_snapshot("personal", snapshot(42.0, 10.0));
    }
    for _ in 0..5 {
        poller.poll_once().await.unwrap();
    }
    let before = poller.state().await;
    assert_eq!(before.current_interval(), Duration::from_secs(120));

    fetcher.push_failure("personal");
    assert!(poller.poll_once().await.is_err());

    let after = poller.state().await;
    assert_eq!(after, before);
    assert_eq!(
        after.previous_session_utilization().to_bits(),
        before.previous_session_utilization().to_bits()
    );
    assert_eq!(
        after.previous_weekly_utilization().to_bits(),
        before.previous_weekly_utilization().to_bits()
    );
    assert_eq!(sink.failures("personal"), 1);
    assert_eq!(sink.polls("personal").len(), 5, "a failure records no gauges");
}

#[tokio::test]
async fn test_successful_poll_records_outcome() {
    let fetcher = Arc::new(FakeUsageFetcher::new());
    let sink = RecordingSink::new();
    let poller = poller(&fetcher, &sink, "personal");

    let reset = (Utc::now() + chrono::Duration::hours(3)).to_rfc3339();
    fetcher.push_snapshot(
        "personal",
        UsageSnapshot::new(
            Some(UsageWindow::new(130.0, Some(&reset))),
            Some(UsageWindow::new(55.0, Some("garbage"))),
        ),
    );

    let outcome = poller.poll_once().await.unwrap();
    let recorded = sink.polls("personal");
    assert_eq!(recorded, vec![outcome.clone()]);

    assert_eq!(outcome.session_utilization, Some(100.0));
    assert_eq!(outcome.weekly_utilization, Some(55.0));
    assert!(outcome.session_reset.is_some());
    assert_eq!(outcome.weekly_reset, None);
    assert!(outcome.changed);
    assert!(!outcome.burst_needed);
    assert_eq!(outcome.next_interval, Duration::from_secs(30));
    assert_eq!(outcome.phase, Phase::Active);
    assert_eq!(sink.failures("personal"), 0);
}

#[tokio::test]
async fn test_status_reflects_state() {
    let fetcher = Arc::new(FakeUsageFetcher::new());
    let sink = RecordingSink::new();
    let poller = poller(&fetcher, &sink, "work");
    fetcher.set_fallback("work", snapshot(12.0, 3.0));

    for _ in 0..4 {
        poller.poll_once().await.unwrap();
    }

    let status = poller.status().await;
    assert_eq!(status.account, "work");
    assert_eq!(status.interval_seconds, 60.0);
    assert_eq!(status.phase, Phase::BackingOff);
    assert_eq!(status.unchanged_streak, 3);
    assert_eq!(status.session_utilization, 12.0);
    assert_eq!(status.weekly_utilization, 3.0);
}

#[tokio::test(start_paused = true)]
async fn test_loop_backs_off_on_the_tokio_clock() {
    let fetcher = Arc::new(FakeUsageFetcher::new());
    let sink = RecordingSink::new();
    let poller = poller(&fetcher, &sink, "personal");
    fetcher.set_fallback("personal", snapshot(42.0, 10.0));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let start = tokio::time::Instant::now();
    let handle = tokio::spawn(poller.clone().run(shutdown_rx));

    tokio::time::sleep(Duration::from_secs(900)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let offsets: Vec<u64> = fetcher
        .call_times("personal")
        .iter()
        .map(|t| t.duration_since(start).as_secs())
        .collect();
    assert_eq!(offsets, vec![0, 30, 60, 90, 150, 270, 510, 810]);

    let intervals: Vec<u64> = sink
        .polls("personal")
        .iter()
        .map(|o| o.next_interval.as_secs())
        .collect();
    assert_eq!(intervals, vec![30, 30, 30, 60, 120, 240, 300, 300]);

    let phases: Vec<Phase> = sink.polls("personal").iter().map(|o| o.phase).collect();
    assert_eq!(
        phases,
        vec![
            Phase::Active,
            Phase::Active,
            Phase::Active,
            Phase::BackingOff,
            Phase::BackingOff,
            Phase::BackingOff,
            Phase::Idle,
            Phase::Idle,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_loop_keeps_interval_across_failures() {
    let fetcher = Arc::new(FakeUsageFetcher::new());
    let sink = RecordingSink::new();
    let poller = poller(&fetcher, &sink, "personal");

    // Reach 60s, then fail twice, then recover with unchanged usage.
    for _ in 0..4 {
        fetcher.push_snapshot("personal", snapshot(42.0, 10.0));
    }
    fetcher.push_failure("personal");
    fetcher.push_failure("personal");
    fetcher.set_fallback("personal", snapshot(42.0, 10.0));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let start = tokio::time::Instant::now();
    let handle = tokio::spawn(poller.clone().run(shutdown_rx));

    tokio::time::sleep(Duration::from_secs(275)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let offsets: Vec<u64> = fetcher
        .call_times("personal")
        .iter()
        .map(|t| t.duration_since(start).as_secs())
        .collect();
    // Polls 5 and 6 fail and keep the 60s cadence; poll 7 doubles to 120s.
    assert_eq!(offsets, vec![0, 30, 60, 90, 150, 210, 270]);
    assert_eq!(sink.failures("personal"), 2);
    assert_eq!(poller.state().await.current_interval(), Duration::from_secs(120));
}

#[tokio::test(start_paused = true)]
async fn test_accounts_poll_independently() {
    let fetcher = Arc::new(FakeUsageFetcher::new());
    let sink = RecordingSink::new();
    let quiet = poller(&fetcher, &sink, "quiet");
    let busy = poller(&fetcher, &sink, "busy");

    fetcher.set_fallback("quiet", snapshot(5.0, 5.0));
    for i in 0..20 {
        fetcher.push_snapshot("busy", snapshot(i as f64, 5.0));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = vec![
        tokio::spawn(quiet.clone().run(shutdown_rx.clone())),
        tokio::spawn(busy.clone().run(shutdown_rx)),
    ];

    tokio::time::sleep(Duration::from_secs(290)).await;
    shutdown_tx.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(busy.state().await.current_interval(), Duration::from_secs(30));
    assert_eq!(fetcher.call_count("busy"), 10);
    assert!(quiet.state().await.current_interval() > Duration::from_secs(30));
    assert!(fetcher.call_count("quiet") < fetcher.call_count("busy"));
}
