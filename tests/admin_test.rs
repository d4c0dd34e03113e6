mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use common::{ScriptedProvider, TestApp, clean_report, infected_report};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn test_admin_routes_require_admin() {
    let t = TestApp::new(ScriptedProvider::default()).await;
    t.create_user("user@example.com", 50, false).await;
    let token = t.login("user@example.com").await;

    assert_eq!(t.get("/admin/users", &token).await.0, StatusCode::FORBIDDEN);
    assert_eq!(t.get("/admin/stats", &token).await.0, StatusCode::FORBIDDEN);
    assert_eq!(
        t.get("/admin/users/export.csv", &token).await.0,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        t.get("/admin/stats", "bogus").await.0,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_admin_reporting() {
    let t = TestApp::new(ScriptedProvider::new(vec![
        Ok(clean_report()),
        Ok(infected_report()),
    ]))
    .await;
    t.create_user("admin@example.com", 50, true).await;
    let scanner_id = t.create_user("scanner@example.com", 50, false).await;
    let idle_id = t.create_user("idle@example.com", 50, false).await;

    let user_token = t.login("scanner@example.com").await;
    let (status, _) = t
        .upload(&user_token, &[("one.png", b"1"), ("two.png", b"2")])
        .await;
    assert_eq!(status, StatusCode::OK);

    let admin_token = t.login("admin@example.com").await;

    let (status, stats) = t.get("/admin/stats", &admin_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        stats,
        json!({"totalUsers": 3, "totalScans": 2, "threatsDetected": 1})
    );

    let (status, users) = t.get("/admin/users", &admin_token).await;
    assert_eq!(status, StatusCode::OK);
    let users = users.as_array().unwrap();
    assert_eq!(users.len(), 3);

    let scanner = users
        .iter()
        .find(|u| u["id"] == scanner_id.as_str())
        .unwrap();
    assert_eq!(scanner["filesScanned"], 2);
    assert_eq!(scanner["threatsDetected"], 1);
    assert_eq!(scanner["remainingScans"], 48);
    assert!(scanner["lastScanAt"].is_string());
    assert!(scanner.get("passwordHash").is_none());

    let idle = users.iter().find(|u| u["id"] == idle_id.as_str()).unwrap();
    assert!(idle["lastScanAt"].is_null());
}

#[tokio::test]
async fn test_admin_user_export() {
    let t = TestApp::new(ScriptedProvider::new(vec![Ok(infected_report())])).await;
    t.create_user("admin@example.com", 50, true).await;
    t.create_user("csv@example.com", 50, false).await;

    let user_token = t.login("csv@example.com").await;
    assert_eq!(t.upload(&user_token, &[("x.png", b"x")]).await.0, StatusCode::OK);

    let admin_token = t.login("admin@example.com").await;
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/users/export.csv")
                .header("Authorization", format!("Bearer {}", admin_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/csv")
    );
    assert!(
        response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("users.csv")
    );

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let csv = String::from_utf8(bytes.to_vec()).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("createdAt,email,name"));

    let row = lines
        .iter()
        .find(|l| l.contains("\"csv@example.com\""))
        .unwrap();
    assert!(row.contains("\"Test User\""));
    assert!(row.contains("\"1\",\"1\",\"49\""));
}

#[tokio::test]
async fn test_health() {
    let t = TestApp::new(ScriptedProvider::default()).await;
    let (status, body) = t
        .send(
            axum::http::Request::builder()
                .uri("/health")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "connected");
    assert_eq!(body["provider"], "reachable");
}
