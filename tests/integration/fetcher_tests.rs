use crate::common::{fetcher, page};
use spine_tracker::ingest::FetchError;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_fetch_returns_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/catalog"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(page(&[]), "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let body = fetcher(10, 0)
        .fetch(&format!("{}/catalog", server.uri()))
        .await
        .unwrap();

    assert!(body.contains("<title>Catalog</title>"));
}

#[tokio::test]
async fn test_requests_are_spaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(page(&[]), "text/html"))
        .expect(3)
        .mount(&server)
        .await;

    let fetcher = fetcher(200, 0);
    let started = Instant::now();
    for name in ["a", "b", "c"] {
        fetcher
            .fetch(&format!("{}/{}", server.uri(), name))
            .await
            .unwrap();
    }

    // Three requests need at least two gaps
    assert!(started.elapsed() >= Duration::from_millis(400));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_spacing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(page(&[]), "text/html"))
        .expect(4)
        .mount(&server)
        .await;

    let fetcher = std::sync::Arc::new(fetcher(150, 0));
    let started = Instant::now();
    let mut handles = Vec::new();
    for i in 0..4 {
        let fetcher = std::sync::Arc::clone(&fetcher);
        let url = format!("{}/page{}", server.uri(), i);
        handles.push(tokio::spawn(async move { fetcher.fetch(&url).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(started.elapsed() >= Duration::from_millis(450));
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(page(&[]), "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let body = fetcher(10, 3)
        .fetch(&format!("{}/flaky", server.uri()))
        .await
        .unwrap();

    assert!(body.contains("Catalog"));
}

#[tokio::test]
async fn test_retries_exhausted_reports_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let err = fetcher(10, 2)
        .fetch(&format!("{}/down", server.uri()))
        .await
        .unwrap_err();

    match err {
        FetchError::HttpStatus {
            status, attempts, ..
        } => {
            assert_eq!(status, 500);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/missing", server.uri());
    let err = fetcher(10, 3).fetch(&url).await.unwrap_err();

    assert!(matches!(
        err,
        FetchError::HttpStatus {
            status: 404,
            attempts: 1,
            ..
        }
    ));
    assert_eq!(err.url(), url);
}

#[tokio::test]
async fn test_non_html_response_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
        .expect(1)
        .mount(&server)
        .await;

    let err = fetcher(10, 3)
        .fetch(&format!("{}/api", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::ContentMismatch { .. }));
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    // Bind then drop so the port is very likely closed
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let err = fetcher(10, 1)
        .fetch(&format!("http://127.0.0.1:{}/", port))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Network { attempts: 2, .. }));
}
