use crate::api::error::AppError;
use crate::utils::auth::{Claims, validate_jwt};
use crate::{AppState, entities::prelude::Users};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sea_orm::EntityTrait;

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let unauthorized = || AppError::Unauthorized("Invalid or missing token".to_string());

    let token = bearer_token(&req).ok_or_else(unauthorized)?;
    let claims = validate_jwt(token, &state.config.jwt_secret).map_err(|_| unauthorized())?;

    // Tokens outlive deleted accounts
    let user_exists = Users::find_by_id(claims.sub.clone())
        .one(&state.db)
        .await?
        .is_some();

    if !user_exists {
        return Err(unauthorized());
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Must run inside `auth_middleware`.
pub async fn admin_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .ok_or_else(|| AppError::Unauthorized("Invalid or missing token".to_string()))?;

    let is_admin = Users::find_by_id(claims.sub.clone())
        .one(&state.db)
        .await?
        .is_some_and(|u| u.is_admin);

    if !is_admin {
        tracing::warn!(user_id = %claims.sub, "Non-admin attempted admin access");
        return Err(AppError::Forbidden("Admin access required".to_string()));
    }

    Ok(next.run(req).await)
}
