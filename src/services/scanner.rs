use crate::config::ProviderConfig;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;

/// Upper bound for the reachability check behind `/health`.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a file could not be handed to (or answered by) the provider.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned HTTP {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("invalid provider response: {0}")]
    Decode(String),

    #[error("failed to read upload: {0}")]
    Io(#[from] std::io::Error),

    #[error("provider credentials unavailable: {0}")]
    Credential(String),
}

impl From<reqwest::Error> for ScanError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ScanError::Decode(e.to_string())
        } else {
            ScanError::Transport(e.to_string())
        }
    }
}

/// Result of polling an asynchronous job.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportStatus {
    /// The provider is still working; carries the raw status payload.
    InProgress(Value),
    Ready(Value),
}

impl ReportStatus {
    pub fn from_payload(payload: Value) -> Self {
        let in_progress = payload
            .get("status")
            .and_then(Value::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case("in progress"));

        if in_progress {
            ReportStatus::InProgress(payload)
        } else {
            ReportStatus::Ready(payload)
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            ReportStatus::InProgress(v) | ReportStatus::Ready(v) => v,
        }
    }
}

/// Trait for detection provider implementations
#[async_trait]
pub trait ScanProvider: Send + Sync {
    /// Upload a file and wait for the full report.
    async fn submit_sync(&self, path: &Path, filename: &str) -> Result<Value, ScanError>;

    /// Upload a file and return the provider's job id.
    async fn submit_async(&self, path: &Path, filename: &str) -> Result<String, ScanError>;

    async fn fetch_report(&self, job_id: &str) -> Result<ReportStatus, ScanError>;

    /// Check if the provider is reachable
    async fn health_check(&self) -> bool;
}

/// Polls `job_id` at most `max_attempts` times. When the provider is still busy
/// after the last attempt, the last status payload is returned as the report.
pub async fn poll_report(
    provider: &dyn ScanProvider,
    job_id: &str,
    max_attempts: u32,
    interval: Duration,
) -> Result<Value, ScanError> {
    let attempts = max_attempts.max(1);
    let mut last = Value::Null;

    for attempt in 1..=attempts {
        match provider.fetch_report(job_id).await? {
            ReportStatus::Ready(report) => return Ok(report),
            ReportStatus::InProgress(status) => {
                tracing::debug!(job_id, attempt, "Report still in progress");
                last = status;
                if attempt < attempts {
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    tracing::warn!(
        job_id,
        attempts,
        "Report not ready after polling budget, using last status"
    );
    Ok(last)
}

#[derive(Debug, Clone)]
pub struct CachedCredential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedCredential {
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        now + margin < self.expires_at
    }
}

/// Bearer token cache owned by one client.
///
/// The slot stays locked for the whole refresh, so concurrent callers wait for
/// a single token request instead of each issuing their own.
#[derive(Debug)]
pub struct CredentialCache {
    refresh_margin: chrono::Duration,
    slot: Mutex<Option<CachedCredential>>,
}

impl CredentialCache {
    pub fn new(refresh_margin: Duration) -> Self {
        Self {
            refresh_margin: chrono::Duration::from_std(refresh_margin)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
            slot: Mutex::new(None),
        }
    }

    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<String, ScanError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<CachedCredential, ScanError>>,
    {
        let mut slot = self.slot.lock().await;

        if let Some(cached) = slot.as_ref()
            && cached.is_fresh(Utc::now(), self.refresh_margin)
        {
            return Ok(cached.token.clone());
        }

        let fresh = refresh().await?;
        let token = fresh.token.clone();
        *slot = Some(fresh);
        Ok(token)
    }

    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

/// Parses the provider's `expiration_time`. Timestamps without an offset are UTC.
pub fn parse_expiry(raw: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    let fallback = now + chrono::Duration::hours(24);
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return fallback;
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&Utc);
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return naive.and_utc();
        }
    }

    tracing::warn!("Unparsable token expiry '{}', assuming 24h", raw);
    fallback
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
    expiration_time: Option<String>,
}

/// HTTP client for the steganography/malware detection provider.
pub struct StegoClient {
    http: reqwest::Client,
    base_url: String,
    agent_token: Option<String>,
    agent_name: String,
    health_timeout: Duration,
    credentials: CredentialCache,
}

impl StegoClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ScanError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            agent_token: config.agent_token.clone(),
            agent_name: config.agent_name.clone(),
            health_timeout: config.request_timeout.min(HEALTH_CHECK_TIMEOUT),
            credentials: CredentialCache::new(config.token_refresh_margin),
        })
    }

    async fn request_token(&self) -> Result<CachedCredential, ScanError> {
        let agent_token = self.agent_token.as_deref().ok_or_else(|| {
            ScanError::Credential("STEGO_AGENT_TOKEN is not configured".to_string())
        })?;

        let url = format!("{}/auth/token", self.base_url);
        tracing::info!("🔑 Requesting provider token from {}", url);

        let response = self
            .http
            .post(&url)
            .json(&json!({
                "agent_identifier_token": agent_token,
                "agent_name": self.agent_name,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScanError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response.json().await?;
        Ok(CachedCredential {
            token: token.token,
            expires_at: parse_expiry(token.expiration_time.as_deref(), Utc::now()),
        })
    }

    /// Returns a cached bearer token, requesting a new one when it is missing or
    /// about to expire.
    pub async fn acquire_credential(&self) -> Result<String, ScanError> {
        self.credentials
            .get_or_refresh(|| self.request_token())
            .await
    }

    async fn upload_form(&self, path: &Path, filename: &str) -> Result<Form, ScanError> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, size).file_name(filename.to_string());

        Ok(Form::new()
            .part("file", part)
            .text("filename", filename.to_string())
            .text("agent_name", self.agent_name.clone()))
    }

    async fn send_json(&self, request: reqwest::RequestBuilder) -> Result<Value, ScanError> {
        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            // Force a fresh token on the next call
            self.credentials.invalidate().await;
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScanError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<Value>().await?)
    }
}

#[async_trait]
impl ScanProvider for StegoClient {
    async fn submit_sync(&self, path: &Path, filename: &str) -> Result<Value, ScanError> {
        let token = self.acquire_credential().await?;
        let form = self.upload_form(path, filename).await?;

        let report = self
            .send_json(
                self.http
                    .post(format!("{}/api/scan", self.base_url))
                    .bearer_auth(token)
                    .header(reqwest::header::ACCEPT, "application/json")
                    .multipart(form),
            )
            .await?;

        tracing::debug!("Provider report for {}: {}", filename, report);
        Ok(report)
    }

    async fn submit_async(&self, path: &Path, filename: &str) -> Result<String, ScanError> {
        let token = self.acquire_credential().await?;
        let form = self.upload_form(path, filename).await?;

        let accepted = self
            .send_json(
                self.http
                    .post(format!("{}/api/scan/async", self.base_url))
                    .bearer_auth(token)
                    .header(reqwest::header::ACCEPT, "application/json")
                    .multipart(form),
            )
            .await?;

        let job_id = match accepted.get("job_id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                return Err(ScanError::Decode(format!(
                    "async submission returned no job_id: {}",
                    accepted
                )));
            }
        };

        tracing::info!("🚀 Async scan started for {} (job {})", filename, job_id);
        Ok(job_id)
    }

    async fn fetch_report(&self, job_id: &str) -> Result<ReportStatus, ScanError> {
        let token = self.acquire_credential().await?;

        let payload = self
            .send_json(
                self.http
                    .get(format!("{}/api/report/{}", self.base_url, job_id))
                    .bearer_auth(token)
                    .header(reqwest::header::ACCEPT, "application/json"),
            )
            .await?;

        Ok(ReportStatus::from_payload(payload))
    }

    async fn health_check(&self) -> bool {
        // Any HTTP answer means the provider is reachable
        self.http
            .get(&self.base_url)
            .timeout(self.health_timeout)
            .send()
            .await
            .is_ok()
    }
}

/// No-op provider for development/testing: every file comes back clean.
pub struct NoOpProvider;

impl NoOpProvider {
    fn clean_report(filename: &str) -> Value {
        json!({
            "files": [{
                "filename": filename,
                "detected": false,
                "detections": [],
                "severity": "Clean",
            }]
        })
    }
}

#[async_trait]
impl ScanProvider for NoOpProvider {
    async fn submit_sync(&self, _path: &Path, filename: &str) -> Result<Value, ScanError> {
        tracing::warn!("NoOpProvider: Skipping detection for {} (development mode)", filename);
        Ok(Self::clean_report(filename))
    }

    async fn submit_async(&self, _path: &Path, filename: &str) -> Result<String, ScanError> {
        Ok(format!("noop:{}", filename))
    }

    async fn fetch_report(&self, job_id: &str) -> Result<ReportStatus, ScanError> {
        let filename = job_id.strip_prefix("noop:").unwrap_or(job_id);
        Ok(ReportStatus::Ready(Self::clean_report(filename)))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Factory function to create appropriate provider based on config
pub fn create_provider(config: &ProviderConfig) -> Result<Box<dyn ScanProvider>, ScanError> {
    match config.provider_type.to_lowercase().as_str() {
        "stego" => Ok(Box::new(StegoClient::new(config)?)),
        "noop" | "none" | "disabled" => Ok(Box::new(NoOpProvider)),
        other => {
            tracing::warn!("Unknown provider type '{}', using NoOpProvider", other);
            Ok(Box::new(NoOpProvider))
        }
    }
}
