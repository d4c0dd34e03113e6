use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stego_trial_portal::config::ProviderConfig;
use stego_trial_portal::services::scanner::{ScanError, ScanProvider, StegoClient, poll_report};

const AGENT_TOKEN: &str = "agent-secret";

#[derive(Default)]
struct MockProvider {
    token_calls: AtomicUsize,
    scan_calls: AtomicUsize,
    report_calls: AtomicUsize,
    /// Reject the next authenticated call with 401
    reject_next: AtomicBool,
    current_token: Mutex<String>,
    expiration: Mutex<Option<String>>,
}

type Shared = Arc<MockProvider>;

async fn issue_token(
    State(mock): State<Shared>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    if body["agent_identifier_token"] != AGENT_TOKEN || body["agent_name"] != "TESTS" {
        return Err(StatusCode::FORBIDDEN);
    }
    // Simulate a slow token endpoint so concurrent callers overlap
    tokio::time::sleep(Duration::from_millis(20)).await;

    let n = mock.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
    let token = format!("tok-{}", n);
    *mock.current_token.lock().unwrap() = token.clone();

    let expiration = mock.expiration.lock().unwrap().clone();
    Ok(Json(json!({"token": token, "expiration_time": expiration})))
}

fn authorized(mock: &MockProvider, headers: &HeaderMap) -> bool {
    if mock.reject_next.swap(false, Ordering::SeqCst) {
        return false;
    }
    let expected = format!("Bearer {}", mock.current_token.lock().unwrap());
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected)
}

async fn read_upload(mut multipart: Multipart) -> Option<(String, String, usize)> {
    let mut filename = None;
    let mut agent = None;
    let mut size = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name() {
            Some("file") => size = field.bytes().await.ok().map(|b| b.len()),
            Some("filename") => filename = field.text().await.ok(),
            Some("agent_name") => agent = field.text().await.ok(),
            _ => {}
        }
    }
    Some((filename?, agent?, size?))
}

async fn scan(
    State(mock): State<Shared>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<Value>, (StatusCode, String)> {
    if !authorized(&mock, &headers) {
        return Err((StatusCode::UNAUTHORIZED, "expired token".to_string()));
    }
    let (filename, agent, size) = read_upload(multipart)
        .await
        .ok_or((StatusCode::BAD_REQUEST, "missing parts".to_string()))?;
    mock.scan_calls.fetch_add(1, Ordering::SeqCst);

    if filename.starts_with("boom") {
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "engine crashed".to_string()));
    }

    Ok(Json(json!({
        "files": [{
            "filename": filename,
            "agent": agent,
            "size": size,
            "detected": filename.starts_with("evil"),
            "severity": if filename.starts_with("evil") { "High" } else { "Clean" },
        }]
    })))
}

async fn scan_async(
    State(mock): State<Shared>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<Value>, StatusCode> {
    if !authorized(&mock, &headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    read_upload(multipart).await.ok_or(StatusCode::BAD_REQUEST)?;
    Ok(Json(json!({"job_id": 42, "status": "Queued"})))
}

async fn report(
    State(mock): State<Shared>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    if !authorized(&mock, &headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    if job_id != "42" {
        return Err(StatusCode::NOT_FOUND);
    }
    let n = mock.report_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if n < 3 {
        return Ok(Json(json!({"status": "In Progress"})));
    }
    Ok(Json(json!({
        "status": "Completed",
        "files": [{"detected": false, "severity": "Clean", "malware_scan_elapsed_time": 2.5}]
    })))
}

async fn start_mock(expiration: Option<&str>) -> (Shared, String) {
    let mock: Shared = Arc::new(MockProvider::default());
    *mock.expiration.lock().unwrap() = expiration.map(str::to_string);

    let app = Router::new()
        .route("/auth/token", post(issue_token))
        .route("/api/scan", post(scan))
        .route("/api/scan/async", post(scan_async))
        .route("/api/report/:job_id", get(report))
        .layer(DefaultBodyLimit::disable())
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (mock, format!("http://{}", addr))
}

fn client(base_url: &str) -> StegoClient {
    StegoClient::new(&ProviderConfig {
        base_url: base_url.to_string(),
        agent_token: Some(AGENT_TOKEN.to_string()),
        agent_name: "TESTS".to_string(),
        request_timeout: Duration::from_secs(5),
        ..ProviderConfig::default()
    })
    .unwrap()
}

fn sample_file(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, b"0123456789").unwrap();
    path
}

#[tokio::test]
async fn test_sync_scan_reuses_token() {
    let (mock, url) = start_mock(Some("2099-01-01T00:00:00Z")).await;
    let client = client(&url);
    let dir = tempfile::tempdir().unwrap();

    let path = sample_file(&dir, "cat.png");
    let first = client.submit_sync(&path, "cat.png").await.unwrap();
    assert_eq!(first["files"][0]["filename"], "cat.png");
    assert_eq!(first["files"][0]["agent"], "TESTS");
    assert_eq!(first["files"][0]["size"], 10);

    let path = sample_file(&dir, "evil.png");
    let second = client.submit_sync(&path, "evil.png").await.unwrap();
    assert_eq!(second["files"][0]["detected"], true);

    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 1);
    assert_eq!(mock.scan_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_naive_expiry_is_utc() {
    let (mock, url) = start_mock(Some("2099-06-30T12:00:00")).await;
    let client = client(&url);

    client.acquire_credential().await.unwrap();
    client.acquire_credential().await.unwrap();
    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_expiry_defaults_to_a_day() {
    let (mock, url) = start_mock(None).await;
    let client = client(&url);

    client.acquire_credential().await.unwrap();
    client.acquire_credential().await.unwrap();
    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_token_inside_margin_is_refreshed() {
    let soon = (chrono::Utc::now() + chrono::Duration::seconds(30)).to_rfc3339();
    let (mock, url) = start_mock(Some(&soon)).await;
    let client = client(&url);

    let first = client.acquire_credential().await.unwrap();
    let second = client.acquire_credential().await.unwrap();
    assert_ne!(first, second);
    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_refresh() {
    let (mock, url) = start_mock(Some("2099-01-01T00:00:00Z")).await;
    let client = Arc::new(client(&url));

    let tokens: Vec<String> = futures::future::join_all((0..8).map(|_| {
        let client = client.clone();
        async move { client.acquire_credential().await.unwrap() }
    }))
    .await;

    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 1);
    assert!(tokens.iter().all(|t| t == "tok-1"));
}

#[tokio::test]
async fn test_rejected_token_is_discarded() {
    let (mock, url) = start_mock(Some("2099-01-01T00:00:00Z")).await;
    let client = client(&url);
    let dir = tempfile::tempdir().unwrap();
    let path = sample_file(&dir, "a.png");

    client.submit_sync(&path, "a.png").await.unwrap();

    mock.reject_next.store(true, Ordering::SeqCst);
    let err = client.submit_sync(&path, "a.png").await.unwrap_err();
    assert!(matches!(err, ScanError::Provider { status: 401, .. }));

    client.submit_sync(&path, "a.png").await.unwrap();
    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_provider_error_status() {
    let (_mock, url) = start_mock(Some("2099-01-01T00:00:00Z")).await;
    let client = client(&url);
    let dir = tempfile::tempdir().unwrap();
    let path = sample_file(&dir, "boom.png");

    match client.submit_sync(&path, "boom.png").await {
        Err(ScanError::Provider { status, body }) => {
            assert_eq!(status, 500);
            assert!(body.contains("engine crashed"));
        }
        other => panic!("expected provider error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreadable_file_is_io_error() {
    let (_mock, url) = start_mock(Some("2099-01-01T00:00:00Z")).await;
    let client = client(&url);
    let dir = tempfile::tempdir().unwrap();

    let err = client
        .submit_sync(&dir.path().join("gone.png"), "gone.png")
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Io(_)));
}

#[tokio::test]
async fn test_async_submit_and_poll() {
    let (mock, url) = start_mock(Some("2099-01-01T00:00:00Z")).await;
    let client = client(&url);
    let dir = tempfile::tempdir().unwrap();
    let path = sample_file(&dir, "video.mp4");

    let job_id = client.submit_async(&path, "video.mp4").await.unwrap();
    assert_eq!(job_id, "42");

    let report = poll_report(&client, &job_id, 15, Duration::from_millis(5))
        .await
        .unwrap();
    assert_eq!(report["status"], "Completed");
    assert_eq!(report["files"][0]["malware_scan_elapsed_time"], 2.5);
    assert_eq!(mock.report_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_poll_budget_exhausted_returns_last_status() {
    let (mock, url) = start_mock(Some("2099-01-01T00:00:00Z")).await;
    let client = client(&url);

    let report = poll_report(&client, "42", 2, Duration::from_millis(5))
        .await
        .unwrap();
    assert_eq!(report["status"], "In Progress");
    assert_eq!(mock.report_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_health_check_gives_up_on_silent_provider() {
    // Connections are queued by the kernel but never answered
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let client = StegoClient::new(&ProviderConfig {
        base_url: url,
        request_timeout: Duration::from_millis(300),
        ..ProviderConfig::default()
    })
    .unwrap();

    let healthy = tokio::time::timeout(Duration::from_secs(5), client.health_check())
        .await
        .expect("health check must not hang");
    assert!(!healthy);
    drop(listener);
}

#[tokio::test]
async fn test_large_upload_is_sent_whole() {
    let (_mock, url) = start_mock(Some("2099-01-01T00:00:00Z")).await;
    let client = client(&url);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.png");
    std::fs::write(&path, vec![7u8; 3 * 1024 * 1024 + 17]).unwrap();

    let report = client.submit_sync(&path, "big.png").await.unwrap();
    assert_eq!(report["files"][0]["size"], 3 * 1024 * 1024 + 17);
}

#[tokio::test]
async fn test_unreachable_provider_is_transport_error() {
    // Bind then drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let client = client(&url);
    assert!(!client.health_check().await);
    assert!(matches!(
        client.acquire_credential().await,
        Err(ScanError::Transport(_))
    ));
}
