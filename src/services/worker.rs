use crate::services::otp::OtpService;
use crate::services::quota::QuotaStore;
use crate::utils::rate_limit::RateLimiter;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

/// Staged uploads older than this are considered orphaned.
pub const STALE_UPLOAD_AGE: Duration = Duration::from_secs(3600);

pub struct BackgroundWorker {
    otp: OtpService,
    quota: QuotaStore,
    limiters: Vec<RateLimiter>,
    uploads_dir: PathBuf,
    shutdown: watch::Receiver<bool>,
}

impl BackgroundWorker {
    pub fn new(
        otp: OtpService,
        quota: QuotaStore,
        limiters: Vec<RateLimiter>,
        uploads_dir: PathBuf,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            otp,
            quota,
            limiters,
            uploads_dir,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Background worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Background worker shutting down");
                    break;
                }
                _ = sleep(Duration::from_secs(3600)) => {
                    self.perform_cleanup().await;
                }
            }
        }
    }

    async fn perform_cleanup(&self) {
        tracing::info!("🧹 Running background cleanup tasks...");

        match self.otp.purge_expired().await {
            Ok(n) if n > 0 => tracing::info!("Purged {} expired one-time codes", n),
            Ok(_) => {}
            Err(e) => tracing::error!("Failed to purge expired codes: {}", e),
        }

        match purge_stale_uploads(&self.uploads_dir, STALE_UPLOAD_AGE).await {
            Ok(n) if n > 0 => tracing::info!("Removed {} orphaned staged uploads", n),
            Ok(_) => {}
            Err(e) => tracing::error!(
                "Failed to sweep {}: {}",
                self.uploads_dir.display(),
                e
            ),
        }

        for limiter in &self.limiters {
            limiter.prune();
        }
        self.quota.prune_locks();

        tracing::info!("✅ Background cleanup completed");
    }
}

/// Removes regular files in `dir` last modified more than `max_age` ago.
pub async fn purge_stale_uploads(dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();

        if age >= max_age {
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Could not remove {}: {}", entry.path().display(), e),
            }
        }
    }

    Ok(removed)
}
