//! Integration tests for the HTTP usage fetcher.

#[path = "../helpers/mod.rs"]
mod helpers;

use claude_usage_exporter::{
    core::UsageFetcher,
    fetcher::{ClaudeUsageFetcher, FetchError, USER_AGENT},
};
use helpers::account;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher_for(server: &MockServer, timeout: Duration) -> ClaudeUsageFetcher {
    let client = ClaudeUsageFetcher::build_client(timeout).unwrap();
    ClaudeUsageFetcher::new(client, server.uri())
}

#[tokio::test]
async fn test_fetch_sends_identifying_headers_and_parses_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/organizations/org-personal/usage"))
        .and(header("Cookie", "sessionKey=sk-personal"))
        .and(header("Accept", "application/json"))
        .and(header("User-Agent", USER_AGENT))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "five_hour": { "utilization": 37.0, "resets_at": "2025-06-01T15:00:00+00:00" },
            "seven_day": { "utilization": 61.5, "resets_at": "2025-06-04T09:00:00+00:00" },
            "seven_day_opus": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = fetcher_for(&server, Duration::from_secs(5))
        .fetch(&account("personal"))
        .await
        .unwrap();

    let session = snapshot.session.unwrap();
    assert_eq!(session.utilization, 37.0);
    assert_eq!(
        session.resets_at.as_deref(),
        Some("2025-06-01T15:00:00+00:00")
    );
    assert_eq!(snapshot.weekly.unwrap().utilization, 61.5);
}

#[tokio::test]
async fn test_fetch_accepts_null_windows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "five_hour": null, "seven_day": null })),
        )
        .mount(&server)
        .await;

    let snapshot = fetcher_for(&server, Duration::from_secs(5))
        .fetch(&account("personal"))
        .await
        .unwrap();
    assert!(snapshot.session.is_none());
    assert!(snapshot.weekly.is_none());
}

#[tokio::test]
async fn test_non_ok_status_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let err = fetcher_for(&server, Duration::from_secs(5))
        .fetch(&account("personal"))
        .await
        .unwrap_err();
    match err {
        FetchError::Status(status) => assert_eq!(status.as_u16(), 403),
        other => panic!("expected a status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_body_is_a_decode_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&server)
        .await;

    let err = fetcher_for(&server, Duration::from_secs(5))
        .fetch(&account("personal"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)), "got {:?}", err);
    assert!(err.to_string().starts_with("decode:"));
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = fetcher_for(&server, Duration::from_millis(100))
        .fetch(&account("personal"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Timeout(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_unreachable_upstream_is_a_network_failure() {
    // Nothing listens on the discard port of the loopback address.
    let client = ClaudeUsageFetcher::build_client(Duration::from_secs(2)).unwrap();
    let fetcher = ClaudeUsageFetcher::new(client, "http://127.0.0.1:9");

    let err = fetcher.fetch(&account("personal")).await.unwrap_err();
    assert!(
        matches!(err, FetchError::Network(_) | FetchError::Timeout(_)),
        "got {:?}",
        err
    );
}
