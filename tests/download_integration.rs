//! Integration tests for the download module.
//!
//! These tests verify the full download flow with mock HTTP servers.

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use papercache_core::download::{DownloadError, HttpClient, RateLimiter, RetryPolicy, with_retry};
use support::socket_guard::start_mock_server_or_skip;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, Respond, ResponseTemplate};

/// Fails the first `fail_count` requests with 500, then returns `body`.
struct FlakyResponder {
    request_count: Arc<AtomicUsize>,
    fail_count: usize,
    body: Vec<u8>,
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let n = self.request_count.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_count {
            ResponseTemplate::new(500).set_body_bytes(b"internal server error".to_vec())
        } else {
            ResponseTemplate::new(200).set_body_bytes(self.body.clone())
        }
    }
}

#[tokio::test]
async fn test_download_full_flow_preserves_content() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let content: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
    Mock::given(method("GET"))
        .and(path("/pdf/2301.00001.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let dest = temp_dir.path().join("pdf/2301/2301.00001.pdf");

    let client = HttpClient::new();
    let bytes = client
        .download_to_path(
            &format!("{}/pdf/2301.00001.pdf", server.uri()),
            &dest,
            &CancellationToken::new(),
        )
        .await
        .expect("download should succeed");

    assert_eq!(bytes, content.len() as u64);
    assert_eq!(std::fs::read(&dest).expect("should read file"), content);
    let leftovers: Vec<_> = std::fs::read_dir(dest.parent().unwrap())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
        .collect();
    assert!(leftovers.is_empty(), "temporary files cleaned up");
}

#[tokio::test]
async fn test_concurrent_duplicate_downloads_converge() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let content = b"%PDF-1.4 the same bytes every time".to_vec();
    Mock::given(method("GET"))
        .and(path("/pdf/2301.00001.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(content.clone())
                .set_delay(Duration::from_millis(50)),
        )
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("2301.00001.pdf");
    let url = format!("{}/pdf/2301.00001.pdf", server.uri());
    let client = HttpClient::new();
    let cancel = CancellationToken::new();

    let results = futures_util::future::join_all(
        (0..4).map(|_| client.download_to_path(&url, &dest, &cancel)),
    )
    .await;

    assert!(results.iter().all(Result::is_ok), "{results:?}");
    assert_eq!(std::fs::read(&dest).unwrap(), content);
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_download_handles_404_gracefully() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/e-print/2301.99999"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().unwrap();

    let client = HttpClient::new();
    let err = client
        .download_to_temp(
            &format!("{}/e-print/2301.99999", server.uri()),
            temp_dir.path(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::HttpStatus { status: 404, .. }), "{err}");
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_retry_recovers_after_server_errors() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let request_count = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path("/api/query"))
        .respond_with(FlakyResponder {
            request_count: Arc::clone(&request_count),
            fail_count: 2,
            body: b"<feed/>".to_vec(),
        })
        .mount(&server)
        .await;

    let client = HttpClient::new();
    let url = format!("{}/api/query", server.uri());
    let policy = RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(20), 2.0);
    let body = with_retry(
        &policy,
        &RateLimiter::disabled(),
        &url,
        &CancellationToken::new(),
        || client.get_text(&url),
    )
    .await
    .expect("third attempt succeeds");

    assert_eq!(body, "<feed/>");
    assert_eq!(request_count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_gives_up_after_max_attempts() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/api/query"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let client = HttpClient::new();
    let url = format!("{}/api/query", server.uri());
    let policy = RetryPolicy::new(2, Duration::from_millis(5), Duration::from_millis(20), 2.0);
    let err = with_retry(
        &policy,
        &RateLimiter::disabled(),
        &url,
        &CancellationToken::new(),
        || client.get_text(&url),
    )
    .await
    .unwrap_err();

    assert_eq!(err.status(), Some(502));
}

#[tokio::test]
async fn test_download_client_is_reusable() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    for i in 1..=3 {
        Mock::given(method("GET"))
            .and(path(format!("/pdf/2301.0000{i}.pdf")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(format!("paper {i}")))
            .mount(&server)
            .await;
    }
    let temp_dir = TempDir::new().unwrap();
    let client = HttpClient::new();
    let cancel = CancellationToken::new();

    for i in 1..=3 {
        let dest = temp_dir.path().join(format!("2301.0000{i}.pdf"));
        client
            .download_to_path(&format!("{}/pdf/2301.0000{i}.pdf", server.uri()), &dest, &cancel)
            .await
            .expect("download succeeds");
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), format!("paper {i}"));
    }
}
