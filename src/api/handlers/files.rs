use crate::AppState;
use crate::api::error::AppError;
use crate::entities::prelude::*;
use crate::services::reporting::{self, DateRange, UserStats};
use crate::services::scan_service::{ScanOutcome, UploadedFile, remove_staged, remove_temp_file};
use crate::utils::auth::Claims;
use crate::utils::validation::{sanitize_filename, validate_extension, validate_file_size};
use axum::{
    Extension, Json,
    extract::{Multipart, Query, State, multipart::Field},
};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::EntityTrait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

pub const DEFAULT_HISTORY_LIMIT: u64 = 50;
pub const MAX_HISTORY_LIMIT: u64 = 200;

#[derive(Serialize, ToSchema)]
pub struct UploadResponse {
    pub results: Vec<ScanOutcome>,
}

#[derive(Deserialize, IntoParams)]
pub struct StatsQuery {
    /// RFC 3339 timestamp or YYYY-MM-DD (inclusive)
    pub from: Option<String>,
    /// RFC 3339 timestamp or YYYY-MM-DD (inclusive)
    pub to: Option<String>,
}

#[derive(Deserialize, IntoParams)]
pub struct HistoryQuery {
    pub limit: Option<u64>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanHistoryItem {
    pub id: String,
    pub filename: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    #[schema(value_type = Option<Object>)]
    pub report: Option<Value>,
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    let err_msg = e.to_string();
    if err_msg.contains("length limit exceeded") {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequest(err_msg)
    }
}

/// Streams one part to `uploads_dir`, enforcing the allow-list and size bound.
async fn stage_field(state: &AppState, mut field: Field<'_>) -> Result<UploadedFile, AppError> {
    let original = field
        .file_name()
        .ok_or_else(|| AppError::BadRequest("File part is missing a filename".to_string()))?
        .to_string();

    let filename = sanitize_filename(&original)?;
    validate_extension(&filename, &state.config.allowed_extensions)?;

    let path = state
        .config
        .uploads_dir
        .join(format!("{}-{}", Uuid::new_v4(), filename));

    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to stage upload: {}", e)))?;

    let mut size: usize = 0;
    let written: Result<(), AppError> = async {
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            size += chunk.len();
            if let Err(e) = validate_file_size(size, state.config.max_file_size) {
                return Err(AppError::PayloadTooLarge(e.message));
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| AppError::Internal(format!("Failed to stage upload: {}", e)))?;
        }
        file.flush()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to stage upload: {}", e)))
    }
    .await;

    drop(file);

    if let Err(e) = written {
        remove_temp_file(&path).await;
        return Err(e);
    }

    Ok(UploadedFile {
        filename,
        path,
        size: size as u64,
    })
}

#[utoipa::path(
    post,
    path = "/files/upload",
    request_body(content = Object, description = "One or more parts named `files` (or `file`)", content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Per-file verdicts, most recent first", body = UploadResponse),
        (status = 400, description = "No files, or a file failed validation"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Scan quota exhausted"),
        (status = 413, description = "File too large"),
        (status = 429, description = "Too many uploads")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "files"
)]
pub async fn upload_files(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    if !state.upload_limiter.check(&claims.sub) {
        tracing::warn!(user_id = %claims.sub, "Upload rate limit hit");
        return Err(AppError::TooManyRequests(
            "Too many uploads, please try again later".to_string(),
        ));
    }

    // Refuse before anything is written to disk; process_batch re-checks
    if state.scan_service.snapshot(&claims.sub).await?.remaining_scans <= 0 {
        tracing::warn!(user_id = %claims.sub, "Upload rejected before staging: scan quota exhausted");
        return Err(AppError::QuotaExceeded(
            "Scan limit reached for this account".to_string(),
        ));
    }

    tokio::fs::create_dir_all(&state.config.uploads_dir)
        .await
        .map_err(|e| AppError::Internal(format!("Uploads directory unavailable: {}", e)))?;

    let mut staged: Vec<UploadedFile> = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                remove_staged(&staged).await;
                return Err(multipart_error(e));
            }
        };

        if !matches!(field.name(), Some("files") | Some("file")) {
            continue;
        }

        if staged.len() >= state.config.max_batch_files {
            remove_staged(&staged).await;
            return Err(AppError::BadRequest(format!(
                "At most {} files per upload",
                state.config.max_batch_files
            )));
        }

        match stage_field(&state, field).await {
            Ok(file) => staged.push(file),
            Err(e) => {
                tracing::warn!(user_id = %claims.sub, "Upload rejected: {}", e);
                remove_staged(&staged).await;
                return Err(e);
            }
        }
    }

    if staged.is_empty() {
        return Err(AppError::BadRequest("No files uploaded".to_string()));
    }

    let results = state.scan_service.process_batch(&claims.sub, staged).await?;
    Ok(Json(UploadResponse { results }))
}

fn parse_bound(raw: Option<&str>, end_of_day: bool) -> Result<Option<DateTime<Utc>>, AppError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("Invalid date: {}", raw)))?;
    let time = if end_of_day {
        date.and_hms_milli_opt(23, 59, 59, 999)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    Ok(time.map(|t| t.and_utc()))
}

#[utoipa::path(
    get,
    path = "/files/stats",
    params(StatsQuery),
    responses(
        (status = 200, description = "Scan counters for the caller", body = UserStats),
        (status = 400, description = "Invalid date"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "files"
)]
pub async fn get_stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<UserStats>, AppError> {
    let range = DateRange {
        from: parse_bound(query.from.as_deref(), false)?,
        to: parse_bound(query.to.as_deref(), true)?,
    };

    let user = Users::find_by_id(&claims.sub)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    Ok(Json(reporting::user_stats(&state.db, &user, range).await?))
}

#[utoipa::path(
    get,
    path = "/files/history",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Recent scans, newest first", body = [ScanHistoryItem]),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "files"
)]
pub async fn get_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ScanHistoryItem>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let rows = reporting::history(&state.db, &claims.sub, limit).await?;

    Ok(Json(
        rows.into_iter()
            .map(|r| ScanHistoryItem {
                id: r.id,
                filename: r.filename,
                status: r.status,
                created_at: r.created_at,
                report: r.raw_report,
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bound() {
        assert!(parse_bound(None, false).unwrap().is_none());
        assert!(parse_bound(Some("  "), false).unwrap().is_none());

        let from = parse_bound(Some("2024-03-01"), false).unwrap().unwrap();
        assert_eq!(from.to_rfc3339(), "2024-03-01T00:00:00+00:00");

        let to = parse_bound(Some("2024-03-01"), true).unwrap().unwrap();
        assert!(to > from);
        assert_eq!(to.date_naive(), from.date_naive());

        let ts = parse_bound(Some("2024-03-01T12:00:00+02:00"), false)
            .unwrap()
            .unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T10:00:00+00:00");

        assert!(matches!(
            parse_bound(Some("yesterday"), false),
            Err(AppError::BadRequest(_))
        ));
    }
}
