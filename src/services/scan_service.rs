use crate::api::error::AppError;
use crate::config::{ProviderConfig, ScanMode};
use crate::entities::scans;
use crate::services::quota::{QuotaSnapshot, QuotaStore};
use crate::services::scanner::{ScanError, ScanProvider, poll_report};
use crate::services::verdict::{Verdict, interpret_report, summarize};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde::Serialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

/// A validated upload staged on disk, waiting to be scanned.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Per-file entry of an upload batch result.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    pub filename: String,
    pub status: Verdict,
    pub severity: String,
    #[schema(value_type = Option<Object>)]
    pub scan_time: Option<Value>,
    #[schema(value_type = Object)]
    pub details: Value,
}

struct Dispatched {
    verdict: Verdict,
    report: Value,
    outcome: ScanOutcome,
}

/// Runs upload batches through the detection provider and keeps the account's
/// counters and scan history in step.
pub struct ScanService {
    db: DatabaseConnection,
    provider: Arc<dyn ScanProvider>,
    quota: QuotaStore,
    mode: ScanMode,
    poll_max_attempts: u32,
    poll_interval: Duration,
}

impl ScanService {
    pub fn new(
        db: DatabaseConnection,
        provider: Arc<dyn ScanProvider>,
        provider_config: &ProviderConfig,
    ) -> Self {
        Self {
            quota: QuotaStore::new(db.clone()),
            db,
            provider,
            mode: provider_config.mode,
            poll_max_attempts: provider_config.poll_max_attempts,
            poll_interval: provider_config.poll_interval,
        }
    }

    pub fn quota(&self) -> &QuotaStore {
        &self.quota
    }

    /// Scans `files` in order for `user_id` and returns the outcomes newest first.
    ///
    /// Every staged file is removed from disk before this returns, whatever the
    /// result. A dispatch failure marks that file malicious and the batch moves on.
    pub async fn process_batch(
        &self,
        user_id: &str,
        files: Vec<UploadedFile>,
    ) -> Result<Vec<ScanOutcome>, AppError> {
        let quota = match self.quota.snapshot(user_id).await {
            Ok(q) => q,
            Err(e) => {
                remove_staged(&files).await;
                return Err(e);
            }
        };

        if quota.remaining_scans <= 0 {
            remove_staged(&files).await;
            tracing::warn!(user_id, "Upload rejected: scan quota exhausted");
            return Err(AppError::QuotaExceeded(
                "Scan limit reached for this account".to_string(),
            ));
        }

        tracing::info!(
            user_id,
            files = files.len(),
            remaining = quota.remaining_scans,
            "📥 Processing upload batch"
        );

        let mut results: Vec<ScanOutcome> = Vec::with_capacity(files.len());
        let mut scanned = 0;
        let mut threats = 0;
        let mut failure: Option<AppError> = None;

        let mut pending = files.into_iter();
        for file in pending.by_ref() {
            let dispatched = self.dispatch(&file).await;

            let recorded = self
                .record_scan(user_id, &file.filename, dispatched.verdict, dispatched.report)
                .await;

            remove_temp_file(&file.path).await;

            if let Err(e) = recorded {
                failure = Some(e);
                break;
            }

            scanned += 1;
            if dispatched.verdict.is_malicious() {
                threats += 1;
            }

            tracing::info!(
                user_id,
                filename = %file.filename,
                verdict = %dispatched.verdict,
                "Scan recorded"
            );
            results.insert(0, dispatched.outcome);
        }

        if failure.is_some() {
            let rest: Vec<UploadedFile> = pending.collect();
            remove_staged(&rest).await;
        }

        // Files already recorded keep their counters even if a later one failed
        let counters = self.quota.apply_batch(user_id, scanned, threats).await;

        if let Some(e) = failure {
            return Err(e);
        }
        counters?;

        Ok(results)
    }

    async fn dispatch(&self, file: &UploadedFile) -> Dispatched {
        match self.submit(&file.path, &file.filename).await {
            Ok(report) => {
                let verdict = interpret_report(Some(&report));
                let summary = summarize(Some(&report));
                Dispatched {
                    verdict,
                    outcome: ScanOutcome {
                        filename: file.filename.clone(),
                        status: verdict,
                        severity: summary.severity,
                        scan_time: summary.scan_time,
                        details: summary.details,
                    },
                    report,
                }
            }
            Err(e) => {
                tracing::error!(filename = %file.filename, "❌ Scan dispatch failed: {}", e);
                let details = json!([{
                    "finding": e.to_string(),
                    "severity": "High",
                    "type": "error",
                }]);
                Dispatched {
                    verdict: Verdict::Malicious,
                    report: json!({ "error": e.to_string(), "details": details.clone() }),
                    outcome: ScanOutcome {
                        filename: file.filename.clone(),
                        status: Verdict::Malicious,
                        severity: "Error".to_string(),
                        scan_time: None,
                        details,
                    },
                }
            }
        }
    }

    async fn submit(&self, path: &Path, filename: &str) -> Result<Value, ScanError> {
        match self.mode {
            ScanMode::Sync => self.provider.submit_sync(path, filename).await,
            ScanMode::Async => {
                let job_id = self.provider.submit_async(path, filename).await?;
                poll_report(
                    self.provider.as_ref(),
                    &job_id,
                    self.poll_max_attempts,
                    self.poll_interval,
                )
                .await
            }
        }
    }

    async fn record_scan(
        &self,
        user_id: &str,
        filename: &str,
        verdict: Verdict,
        report: Value,
    ) -> Result<scans::Model, AppError> {
        let record = scans::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            user_id: Set(user_id.to_string()),
            filename: Set(filename.to_string()),
            status: Set(verdict.as_str().to_string()),
            raw_report: Set(Some(report)),
            created_at: Set(Utc::now()),
        };

        Ok(record.insert(&self.db).await?)
    }

    pub async fn snapshot(&self, user_id: &str) -> Result<QuotaSnapshot, AppError> {
        self.quota.snapshot(user_id).await
    }
}

/// Deletes one staged file, logging anything but a missing file.
pub async fn remove_temp_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!("Failed to remove staged upload {}: {}", path.display(), e);
    }
}

/// Deletes staged files that will not be scanned.
pub async fn remove_staged(files: &[UploadedFile]) {
    for file in files {
        remove_temp_file(&file.path).await;
    }
}
