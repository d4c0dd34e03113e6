use crate::config::ProviderConfig;
use crate::services::scanner::{ScanError, ScanProvider};
use std::sync::Arc;
use tracing::info;

pub async fn setup_provider(config: &ProviderConfig) -> Result<Arc<dyn ScanProvider>, ScanError> {
    let provider = crate::services::scanner::create_provider(config)?;

    // Warm up provider connection
    if provider.health_check().await {
        info!(
            "🔎 Scan provider '{}' reachable at {}",
            config.provider_type, config.base_url
        );
    } else {
        tracing::warn!(
            "⚠️  Scan provider unreachable! Uploads will be recorded as failed scans until it recovers."
        );
    }

    Ok(provider.into())
}
