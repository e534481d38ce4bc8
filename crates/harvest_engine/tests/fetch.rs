use std::time::Duration;

use harvest_engine::{
    FailureKind, FetchSettings, RateLimitedFetcher, ReqwestTransport, RetryPolicy, Transport,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_settings() -> FetchSettings {
    FetchSettings {
        max_concurrent: 4,
        requests_per_second: 1000,
        request_timeout: Duration::from_secs(2),
        jitter_min: Duration::ZERO,
        jitter_max: Duration::ZERO,
        retry: RetryPolicy {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            ..RetryPolicy::default()
        },
        ..FetchSettings::default()
    }
}

fn fetcher(settings: FetchSettings) -> RateLimitedFetcher {
    RateLimitedFetcher::with_reqwest(settings).expect("client builds")
}

#[tokio::test]
async fn transport_returns_decoded_body_and_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/nft/pepe-1"))
        .and(header_exists("user-agent"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html>ok</html>", "text/html; charset=utf-8"),
        )
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new(&fast_settings()).unwrap();
    let url = format!("{}/nft/pepe-1", server.uri());
    let output = transport.get(&url, "test-agent/1.0").await.expect("fetch ok");

    assert_eq!(output.body, "<html>ok</html>");
    assert_eq!(output.metadata.status, 200);
    assert_eq!(output.metadata.final_url, url);
    assert_eq!(output.metadata.encoding, "UTF-8");
    assert!(output.metadata.content_type.unwrap().starts_with("text/html"));
}

#[tokio::test]
async fn not_found_is_terminal_and_remembered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = fetcher(fast_settings());
    let cancel = CancellationToken::new();
    let url = format!("{}/gone", server.uri());

    let first = fetcher.fetch_one(&url, &cancel).await;
    assert!(first.error().unwrap().is_not_found());

    let second = fetcher.fetch_one(&url, &cancel).await;
    assert_eq!(second.error(), first.error());

    let stats = fetcher.stats();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.not_found, 1);
    assert_eq!(stats.retries, 0);
    assert_eq!(stats.short_circuited, 1);
}

#[tokio::test]
async fn server_errors_exhaust_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let fetcher = fetcher(fast_settings());
    let url = format!("{}/flaky", server.uri());
    let result = fetcher.fetch_one(&url, &CancellationToken::new()).await;

    assert_eq!(result.error().unwrap().kind, FailureKind::HttpStatus(500));
    let stats = fetcher.stats();
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.http_errors, 3);
    assert_eq!(stats.failed_requests, 3);
    assert_eq!(stats.successful_requests, 0);
}

#[tokio::test]
async fn transient_error_recovers_on_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("fine", "text/plain"))
        .mount(&server)
        .await;

    let fetcher = fetcher(fast_settings());
    let url = format!("{}/busy", server.uri());
    let result = fetcher.fetch_one(&url, &CancellationToken::new()).await;

    assert_eq!(result.body(), Some("fine"));
    let stats = fetcher.stats();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.successful_requests, 1);
    assert_eq!(stats.success_rate(), 50.0);
}

#[tokio::test]
async fn soft_timeout_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let mut settings = fast_settings();
    settings.request_timeout = Duration::from_millis(200);
    settings.retry.soft_timeouts = true;
    let fetcher = fetcher(settings);
    let url = format!("{}/slow", server.uri());
    let result = fetcher.fetch_one(&url, &CancellationToken::new()).await;

    assert_eq!(result.error().unwrap().kind, FailureKind::Timeout);
    let stats = fetcher.stats();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.timeouts, 1);
}

#[tokio::test]
async fn oversized_body_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(100)))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = fast_settings();
    settings.max_bytes = 10;
    let fetcher = fetcher(settings);
    let url = format!("{}/big", server.uri());
    let result = fetcher.fetch_one(&url, &CancellationToken::new()).await;

    assert!(matches!(
        result.error().unwrap().kind,
        FailureKind::TooLarge { max_bytes: 10, .. }
    ));
}

#[tokio::test]
async fn escalated_not_found_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(3)
        .mount(&server)
        .await;

    let mut settings = fast_settings();
    settings.retry.escalate_not_found = true;
    let fetcher = fetcher(settings);
    let url = format!("{}/gone", server.uri());
    let result = fetcher.fetch_one(&url, &CancellationToken::new()).await;

    assert!(result.error().unwrap().is_not_found());
    assert_eq!(fetcher.stats().retries, 2);
}

#[tokio::test]
async fn invalid_url_fails_without_network() {
    let fetcher = fetcher(fast_settings());
    let result = fetcher.fetch_one("not a url", &CancellationToken::new()).await;
    assert_eq!(result.error().unwrap().kind, FailureKind::InvalidUrl);
    assert_eq!(fetcher.stats().other_errors, 1);
}

#[tokio::test]
async fn health_check_accepts_body_or_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let fetcher = fetcher(fast_settings());
    assert!(fetcher.health_check(&format!("{}/ok", server.uri())).await);
    assert!(fetcher.health_check(&format!("{}/gone", server.uri())).await);
    assert!(!fetcher.health_check(&format!("{}/broken", server.uri())).await);
}

#[tokio::test]
async fn reset_clears_counters_and_known_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let fetcher = fetcher(fast_settings());
    let cancel = CancellationToken::new();
    let url = format!("{}/gone", server.uri());

    fetcher.fetch_one(&url, &cancel).await;
    fetcher.reset();
    assert_eq!(fetcher.stats().total_requests, 0);

    fetcher.fetch_one(&url, &cancel).await;
    assert_eq!(fetcher.stats().short_circuited, 0);
    assert_eq!(fetcher.stats().total_requests, 1);
}
