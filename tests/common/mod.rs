#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use http_body_util::BodyExt;
use sea_orm::{ActiveModelTrait, Database, Set};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use stego_trial_portal::config::AppConfig;
use stego_trial_portal::entities::users;
use stego_trial_portal::infrastructure::database::run_migrations;
use stego_trial_portal::services::mailer::Mailer;
use stego_trial_portal::services::scanner::{ReportStatus, ScanError, ScanProvider};
use stego_trial_portal::utils::hash::hash_password;
use stego_trial_portal::{AppState, create_app};
use tempfile::TempDir;
use tower::ServiceExt;

pub const PASSWORD: &str = "correct-horse-battery";

/// Records every message so tests can read the emailed codes.
#[derive(Default)]
pub struct CapturingMailer {
    pub sent: Mutex<Vec<(String, String, String)>>,
}

impl CapturingMailer {
    /// Six-digit code from the latest message sent to `to`.
    pub fn last_code(&self, to: &str) -> Option<String> {
        let sent = self.sent.lock().unwrap();
        let (_, _, body) = sent.iter().rev().find(|(rcpt, _, _)| rcpt == to)?;
        body.split(|c: char| !c.is_ascii_digit())
            .find(|w| w.len() == 6)
            .map(str::to_string)
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Mailer for CapturingMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

/// Provider answering synchronous scans from a script. Once the script runs
/// out every file is reported clean.
#[derive(Default)]
pub struct ScriptedProvider {
    reports: Mutex<VecDeque<Result<Value, ScanError>>>,
    pub seen: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(reports: Vec<Result<Value, ScanError>>) -> Self {
        Self {
            reports: Mutex::new(reports.into()),
            seen: Mutex::new(Vec::new()),
        }
    }
}

pub fn clean_report() -> Value {
    json!({"files": [{"detected": false, "detections": [], "severity": "clean"}]})
}

pub fn infected_report() -> Value {
    json!({"files": [{
        "detected": true,
        "detections": [{"type": "lsb", "confidence": 0.97}],
        "severity": "High",
        "malware_scan_elapsed_time": 0.42
    }]})
}

#[async_trait]
impl ScanProvider for ScriptedProvider {
    async fn submit_sync(&self, path: &Path, filename: &str) -> Result<Value, ScanError> {
        assert!(path.exists(), "staged file must exist while scanning");
        self.seen.lock().unwrap().push(filename.to_string());
        self.reports
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(clean_report()))
    }

    async fn submit_async(&self, _path: &Path, filename: &str) -> Result<String, ScanError> {
        Ok(filename.to_string())
    }

    async fn fetch_report(&self, _job_id: &str) -> Result<ReportStatus, ScanError> {
        Ok(ReportStatus::Ready(clean_report()))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub mailer: Arc<CapturingMailer>,
    pub provider: Arc<ScriptedProvider>,
    pub uploads: TempDir,
}

impl TestApp {
    pub async fn new(provider: ScriptedProvider) -> Self {
        Self::with_config(provider, |_| {}).await
    }

    pub async fn with_config(provider: ScriptedProvider, tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        run_migrations(&db).await.unwrap();

        let uploads = tempfile::tempdir().unwrap();
        let mut config = AppConfig {
            uploads_dir: uploads.path().to_path_buf(),
            jwt_secret: "integration-secret".to_string(),
            ..AppConfig::development()
        };
        tweak(&mut config);

        let mailer = Arc::new(CapturingMailer::default());
        let provider = Arc::new(provider);
        let state = AppState::new(db, config, provider.clone(), mailer.clone());

        Self {
            app: create_app(state.clone()),
            state,
            mailer,
            provider,
            uploads,
        }
    }

    pub async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::String(
                String::from_utf8_lossy(&body).to_string(),
            ))
        };
        (status, json)
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// JSON POST that appears to come from `ip` (no socket peer under `oneshot`).
    pub async fn post_json_from(&self, uri: &str, body: Value, ip: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Content-Type", "application/json")
                .header("X-Forwarded-For", ip)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .uri(uri)
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn upload(&self, token: &str, files: &[(&str, &[u8])]) -> (StatusCode, Value) {
        let (content_type, body) = multipart_body("files", files);
        self.send(
            Request::builder()
                .method("POST")
                .uri("/files/upload")
                .header("Authorization", format!("Bearer {}", token))
                .header("Content-Type", content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }

    /// Inserts a verified local account and returns its id.
    pub async fn create_user(&self, email: &str, remaining: i32, is_admin: bool) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        users::ActiveModel {
            id: Set(id.clone()),
            email: Set(email.to_string()),
            name: Set(Some("Test User".to_string())),
            phone: Set(None),
            organization: Set(None),
            password_hash: Set(Some(hash_password(PASSWORD).unwrap())),
            provider: Set("local".to_string()),
            email_verified: Set(true),
            is_admin: Set(is_admin),
            files_scanned: Set(0),
            threats_detected: Set(0),
            remaining_scans: Set(remaining),
            created_at: Set(Utc::now()),
        }
        .insert(&self.state.db)
        .await
        .unwrap();
        id
    }

    pub async fn login(&self, email: &str) -> String {
        let (status, body) = self
            .post_json(
                "/auth/login",
                json!({"email": email, "password": PASSWORD}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body["token"].as_str().unwrap().to_string()
    }

    pub fn staged_files(&self) -> usize {
        std::fs::read_dir(self.uploads.path()).unwrap().count()
    }
}

pub fn multipart_body(field: &str, files: &[(&str, &[u8])]) -> (String, Vec<u8>) {
    let boundary = "----stego-test-boundary-7MA4YWxkTrZu0gW";
    let mut body = Vec::new();
    for (filename, data) in files {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\n\
                 Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={}", boundary), body)
}
