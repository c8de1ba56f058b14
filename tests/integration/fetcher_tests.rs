//! Retry behavior of the fetcher against a live mock server

use crate::fixtures::user_agent;
use shelfwatch::crawler::{build_http_client, FetchFailure, Fetcher, RetryPolicy};
use std::time::{Duration, Instant};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher(max_retries: u32, base_delay_ms: u64) -> Fetcher {
    let client = build_http_client(&user_agent(), Duration::from_secs(5)).unwrap();
    Fetcher::new(
        client,
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
        },
    )
}

#[tokio::test]
async fn test_server_errors_are_retried_with_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.html"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let started = Instant::now();
    let result = fetcher(3, 50)
        .fetch(&format!("{}/index.html", server.uri()))
        .await;

    // 50ms after the first attempt, 100ms after the second, none after the last
    assert!(started.elapsed() >= Duration::from_millis(150));
    match result {
        Err(FetchFailure::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected exhausted retries, got {:?}", other),
    }
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/catalogue/gone_1/index.html"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let result = fetcher(3, 50)
        .fetch(&format!("{}/catalogue/gone_1/index.html", server.uri()))
        .await;

    assert!(matches!(
        result,
        Err(FetchFailure::ClientError { status: 404, .. })
    ));
}

#[tokio::test]
async fn test_recovers_after_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.html"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/index.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let body = fetcher(3, 10)
        .fetch(&format!("{}/index.html", server.uri()))
        .await
        .unwrap();
    assert_eq!(body, "<html>ok</html>");
}

#[tokio::test]
async fn test_sends_descriptive_user_agent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header(
            "user-agent",
            "ShelfwatchTest/1.0.0 (+https://example.com/contact; test@example.com)",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .expect(1)
        .mount(&server)
        .await;

    let body = fetcher(1, 10).fetch(&server.uri()).await.unwrap();
    assert_eq!(body, "hello");
}
