use crate::AppState;
use crate::api::error::AppError;
use crate::services::reporting::{self, AdminUserView, PlatformStats};
use axum::{
    Json,
    extract::State,
    http::header,
    response::IntoResponse,
};

#[utoipa::path(
    get,
    path = "/admin/users",
    responses(
        (status = 200, description = "All accounts with usage counters", body = [AdminUserView]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin access required")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "admin"
)]
pub async fn list_users(
    State(state): State<AppState>,
) -> Result<Json<Vec<AdminUserView>>, AppError> {
    Ok(Json(reporting::list_users(&state.db).await?))
}

#[utoipa::path(
    get,
    path = "/admin/stats",
    responses(
        (status = 200, description = "Platform-wide totals", body = PlatformStats),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin access required")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "admin"
)]
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<PlatformStats>, AppError> {
    Ok(Json(reporting::platform_stats(&state.db).await?))
}

#[utoipa::path(
    get,
    path = "/admin/users/export.csv",
    responses(
        (status = 200, description = "All accounts as CSV", content_type = "text/csv", body = String),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin access required")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "admin"
)]
pub async fn export_users_csv(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let users = reporting::list_users(&state.db).await?;
    tracing::info!(rows = users.len(), "Exporting user list");

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=users.csv"),
        ],
        reporting::users_csv(&users),
    ))
}
